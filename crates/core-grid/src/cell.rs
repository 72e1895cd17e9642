use core_geom::{CELL_AREA, LocalCoord};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

use crate::{FlatGlyph, Glyph, GridError, UserId};

/// One entry of a position's write log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Write {
    pub author: UserId,
    pub glyph: Glyph,
    /// Per-(cell, user) sequence index, strictly increasing per author.
    pub seq: u32,
}

/// A user's history inside one cell.
///
/// `timeline` lists the sequence indices on the user's current branch in
/// ascending order; the first `depth` of them are visible. Writing while
/// `depth < timeline.len()` abandons the undone tail: those writes stay in the
/// position logs but no longer appear on the timeline, so no depth can reveal
/// them again.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Lane {
    timeline: Vec<u32>,
    depth: usize,
    next_seq: u32,
}

impl Lane {
    fn is_visible(&self, seq: u32) -> bool {
        self.timeline[..self.depth].binary_search(&seq).is_ok()
    }
}

type PositionLog = SmallVec<[Write; 2]>;

/// `CELL_SIZE` x `CELL_SIZE` positions, each with an append-only write log,
/// plus the per-user depth cursors for this cell.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CellRepr", into = "CellRepr")]
pub struct Cell {
    positions: Vec<PositionLog>,
    lanes: BTreeMap<UserId, Lane>,
}

impl Default for Cell {
    fn default() -> Self {
        Self::new()
    }
}

impl Cell {
    pub fn new() -> Self {
        Self {
            positions: vec![PositionLog::new(); CELL_AREA],
            lanes: BTreeMap::new(),
        }
    }

    /// Append a write by `user` at `local` with the user's next sequence index.
    pub fn add_change(&mut self, user: UserId, local: LocalCoord, glyph: Glyph) {
        let lane = self.lanes.entry(user).or_default();
        if lane.depth < lane.timeline.len() {
            trace!(target: "grid", %user, abandoned = lane.timeline.len() - lane.depth, "lane_branch");
            lane.timeline.truncate(lane.depth);
        }
        let seq = lane.next_seq;
        lane.next_seq += 1;
        lane.timeline.push(seq);
        lane.depth = lane.timeline.len();
        if let Some(log) = self.positions.get_mut(local.index()) {
            log.push(Write {
                author: user,
                glyph,
                seq,
            });
        }
    }

    /// Resolve every position to its visible glyph: the most recently
    /// appended write that is within its author's depth and whose author is
    /// not hidden.
    pub fn flatten(&self, hidden: &BTreeSet<UserId>) -> Vec<FlatGlyph> {
        self.positions
            .iter()
            .map(|log| self.resolve(log, hidden))
            .collect()
    }

    pub fn glyph_at(&self, hidden: &BTreeSet<UserId>, local: LocalCoord) -> FlatGlyph {
        self.positions
            .get(local.index())
            .map(|log| self.resolve(log, hidden))
            .unwrap_or_default()
    }

    fn resolve(&self, log: &PositionLog, hidden: &BTreeSet<UserId>) -> FlatGlyph {
        log.iter()
            .rev()
            .find(|w| {
                !hidden.contains(&w.author)
                    && self
                        .lanes
                        .get(&w.author)
                        .is_some_and(|lane| lane.is_visible(w.seq))
            })
            .map(|w| FlatGlyph::by(w.author, w.glyph))
            .unwrap_or_default()
    }

    /// Shift `user`'s depth by `delta`, clamped to `0..=timeline length`.
    pub fn move_undo_point(&mut self, user: UserId, delta: i32) {
        if delta == 0 {
            return;
        }
        let Some(lane) = self.lanes.get_mut(&user) else {
            return;
        };
        let target = lane.depth as i64 + i64::from(delta);
        lane.depth = target.clamp(0, lane.timeline.len() as i64) as usize;
    }

    /// Whether `user` ever wrote into this cell (visible or not).
    pub fn has_changes_by(&self, user: UserId) -> bool {
        self.lanes.get(&user).is_some_and(|lane| lane.next_seq > 0)
    }

    /// Current depth cursor of `user` in this cell.
    pub fn depth(&self, user: UserId) -> usize {
        self.lanes.get(&user).map_or(0, |lane| lane.depth)
    }

    /// Writes on `user`'s current branch, visible or undone.
    pub fn timeline_len(&self, user: UserId) -> usize {
        self.lanes.get(&user).map_or(0, |lane| lane.timeline.len())
    }

    /// Raw write log of one position, oldest first.
    pub fn log(&self, local: LocalCoord) -> &[Write] {
        self.positions
            .get(local.index())
            .map(|log| log.as_slice())
            .unwrap_or(&[])
    }

    /// Authors with at least one write in this cell.
    pub fn authors(&self) -> impl Iterator<Item = UserId> + '_ {
        self.lanes.keys().copied()
    }

    pub fn total_writes(&self) -> usize {
        self.positions.iter().map(|log| log.len()).sum()
    }
}

/// Wire/disk shape of a cell, validated on the way in.
#[derive(Serialize, Deserialize)]
struct CellRepr {
    positions: Vec<Vec<Write>>,
    lanes: Vec<(UserId, Lane)>,
}

impl From<Cell> for CellRepr {
    fn from(cell: Cell) -> Self {
        Self {
            positions: cell.positions.into_iter().map(|log| log.into_vec()).collect(),
            lanes: cell.lanes.into_iter().collect(),
        }
    }
}

impl TryFrom<CellRepr> for Cell {
    type Error = GridError;

    fn try_from(repr: CellRepr) -> Result<Self, Self::Error> {
        if repr.positions.len() != CELL_AREA {
            return Err(GridError::PositionCount {
                expected: CELL_AREA,
                found: repr.positions.len(),
            });
        }
        let lanes: BTreeMap<UserId, Lane> = repr.lanes.into_iter().collect();
        for (user, lane) in &lanes {
            if lane.depth > lane.timeline.len() {
                return Err(GridError::DepthOutOfRange {
                    user: *user,
                    depth: lane.depth,
                    len: lane.timeline.len(),
                });
            }
            let ordered = lane.timeline.windows(2).all(|w| w[0] < w[1]);
            let issued = lane.timeline.last().is_none_or(|s| *s < lane.next_seq);
            if !ordered || !issued {
                return Err(GridError::Timeline { user: *user });
            }
        }
        for write in repr.positions.iter().flatten() {
            let issued = lanes
                .get(&write.author)
                .is_some_and(|lane| write.seq < lane.next_seq);
            if !issued {
                return Err(GridError::UnknownSequence {
                    user: write.author,
                    seq: write.seq,
                });
            }
        }
        Ok(Self {
            positions: repr.positions.into_iter().map(PositionLog::from_vec).collect(),
            lanes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const U1: UserId = UserId(1);
    const U2: UserId = UserId(2);

    fn at(x: i32, y: i32) -> LocalCoord {
        LocalCoord::new(x, y)
    }

    #[test]
    fn latest_visible_write_wins() {
        let mut cell = Cell::new();
        cell.add_change(U1, at(0, 0), Glyph('a'));
        cell.add_change(U2, at(0, 0), Glyph('b'));
        let none = BTreeSet::new();
        assert_eq!(cell.glyph_at(&none, at(0, 0)), FlatGlyph::by(U2, Glyph('b')));
        let hide_u2 = BTreeSet::from([U2]);
        assert_eq!(cell.glyph_at(&hide_u2, at(0, 0)), FlatGlyph::by(U1, Glyph('a')));
    }

    #[test]
    fn depth_clamps_to_timeline() {
        let mut cell = Cell::new();
        cell.add_change(U1, at(1, 1), Glyph('x'));
        cell.move_undo_point(U1, -5);
        assert_eq!(cell.depth(U1), 0);
        cell.move_undo_point(U1, 9);
        assert_eq!(cell.depth(U1), 1);
        // Unknown users are ignored rather than materialized.
        cell.move_undo_point(U2, 3);
        assert!(!cell.has_changes_by(U2));
    }

    #[test]
    fn writing_after_undo_abandons_the_undone_tail() {
        let mut cell = Cell::new();
        cell.add_change(U1, at(0, 0), Glyph('a'));
        cell.add_change(U1, at(1, 0), Glyph('b'));
        cell.move_undo_point(U1, -1);
        cell.add_change(U1, at(2, 0), Glyph('c'));
        cell.move_undo_point(U1, 10);
        let none = BTreeSet::new();
        assert_eq!(cell.glyph_at(&none, at(1, 0)), FlatGlyph::default());
        assert_eq!(cell.glyph_at(&none, at(2, 0)).glyph, Glyph('c'));
        // The abandoned write is still in the log.
        assert_eq!(cell.log(at(1, 0)).len(), 1);
        assert_eq!(cell.timeline_len(U1), 2);
    }

    #[test]
    fn decode_rejects_wrong_shape() {
        let repr = CellRepr {
            positions: vec![Vec::new(); 3],
            lanes: Vec::new(),
        };
        assert_eq!(
            Cell::try_from(repr),
            Err(GridError::PositionCount {
                expected: CELL_AREA,
                found: 3
            })
        );
    }

    #[test]
    fn decode_rejects_unissued_sequence() {
        let mut positions = vec![Vec::new(); CELL_AREA];
        positions[0].push(Write {
            author: U1,
            glyph: Glyph('q'),
            seq: 4,
        });
        let repr = CellRepr {
            positions,
            lanes: Vec::new(),
        };
        assert!(matches!(
            Cell::try_from(repr),
            Err(GridError::UnknownSequence { seq: 4, .. })
        ));
    }

    #[test]
    fn json_decode_runs_validation() {
        let mut cell = Cell::new();
        cell.add_change(U1, at(2, 3), Glyph('k'));
        let value = serde_json::to_value(&cell).unwrap();
        let back: Cell = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(back, cell);

        let mut short = value.clone();
        short["positions"].as_array_mut().unwrap().pop();
        let err = serde_json::from_value::<Cell>(short).unwrap_err();
        assert!(err.to_string().contains("cell has 255 positions"), "{err}");

        let mut deep = value;
        deep["lanes"][0][1]["depth"] = serde_json::json!(7);
        let err = serde_json::from_value::<Cell>(deep).unwrap_err();
        assert!(err.to_string().contains("depth 7 beyond its 1 writes"), "{err}");
    }
}
