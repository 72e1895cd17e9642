use ahash::AHashMap;
use core_geom::{CELL_AREA, CellBounds, CellCoord, GlyphCoord, LocalCoord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

use crate::{Cell, FlatGlyph, Glyph, UserId};

/// Signed per-cell write counts: an undo snapshot, or the depth movement
/// derived from one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<(CellCoord, i32)>", into = "Vec<(CellCoord, i32)>")]
pub struct CellDeltas(BTreeMap<CellCoord, i32>);

impl CellDeltas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, cell: CellCoord, count: i32) {
        *self.0.entry(cell).or_insert(0) += count;
    }

    pub fn get(&self, cell: CellCoord) -> i32 {
        self.0.get(&cell).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|d| *d == 0)
    }

    pub fn negated(&self) -> Self {
        Self(self.0.iter().map(|(c, d)| (*c, -d)).collect())
    }

    pub fn cells(&self) -> impl Iterator<Item = CellCoord> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellCoord, i32)> + '_ {
        self.0.iter().map(|(c, d)| (*c, *d))
    }

    /// Keep only entries inside `bounds`.
    pub fn within(&self, bounds: &CellBounds) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(c, _)| bounds.contains(**c))
                .map(|(c, d)| (*c, *d))
                .collect(),
        )
    }
}

impl From<Vec<(CellCoord, i32)>> for CellDeltas {
    fn from(entries: Vec<(CellCoord, i32)>) -> Self {
        let mut out = Self::new();
        for (cell, count) in entries {
            out.add(cell, count);
        }
        out
    }
}

impl From<CellDeltas> for Vec<(CellCoord, i32)> {
    fn from(deltas: CellDeltas) -> Self {
        deltas.0.into_iter().collect()
    }
}

impl FromIterator<(CellCoord, i32)> for CellDeltas {
    fn from_iter<T: IntoIterator<Item = (CellCoord, i32)>>(iter: T) -> Self {
        let mut out = Self::new();
        for (cell, count) in iter {
            out.add(cell, count);
        }
        out
    }
}

/// Sparse mapping from cell coordinate to cell. Absent cells read as blank.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(from = "Vec<(CellCoord, Cell)>", into = "Vec<(CellCoord, Cell)>")]
pub struct Grid {
    cells: AHashMap<CellCoord, Cell>,
}

impl PartialEq for Grid {
    fn eq(&self, other: &Self) -> bool {
        self.cells.len() == other.cells.len()
            && self
                .cells
                .iter()
                .all(|(coord, cell)| other.cells.get(coord) == Some(cell))
    }
}

impl Eq for Grid {}

impl Grid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one write, creating the cell on first use.
    pub fn add_change(&mut self, user: UserId, cell: CellCoord, local: LocalCoord, glyph: Glyph) {
        trace!(target: "grid", %user, %cell, %local, glyph = %glyph, "add_change");
        self.cells
            .entry(cell)
            .or_default()
            .add_change(user, local, glyph);
    }

    /// Visible glyphs of `cell`; an absent cell flattens to all blanks.
    pub fn flatten(&self, hidden: &BTreeSet<UserId>, cell: CellCoord) -> Vec<FlatGlyph> {
        match self.cells.get(&cell) {
            Some(c) => c.flatten(hidden),
            None => vec![FlatGlyph::default(); CELL_AREA],
        }
    }

    pub fn glyph_at(&self, hidden: &BTreeSet<UserId>, at: GlyphCoord) -> FlatGlyph {
        let (cell, local) = at.split();
        self.cells
            .get(&cell)
            .map(|c| c.glyph_at(hidden, local))
            .unwrap_or_default()
    }

    /// Move `user`'s depth cursor in every named cell by its delta.
    pub fn move_undo_point(&mut self, user: UserId, deltas: &CellDeltas) {
        for (coord, delta) in deltas.iter() {
            if delta == 0 {
                continue;
            }
            if let Some(cell) = self.cells.get_mut(&coord) {
                cell.move_undo_point(user, delta);
            }
        }
        trace!(target: "grid", %user, cells = deltas.cells().count(), "move_undo_point");
    }

    pub fn has_changes_by(&self, user: UserId, cell: CellCoord) -> bool {
        self.cells.get(&cell).is_some_and(|c| c.has_changes_by(user))
    }

    pub fn cell(&self, coord: CellCoord) -> Option<&Cell> {
        self.cells.get(&coord)
    }

    /// Replace (or create) a cell wholesale, as delivered by the server.
    pub fn insert_cell(&mut self, coord: CellCoord, cell: Cell) {
        self.cells.insert(coord, cell);
    }

    /// Copies of all present cells inside `bounds`, ordered by coordinate.
    pub fn cells_in(&self, bounds: &CellBounds) -> Vec<(CellCoord, Cell)> {
        let mut out: Vec<(CellCoord, Cell)> = self
            .cells
            .iter()
            .filter(|(coord, _)| bounds.contains(**coord))
            .map(|(coord, cell)| (*coord, cell.clone()))
            .collect();
        out.sort_by_key(|(coord, _)| *coord);
        out
    }

    /// Drop every cell outside `bounds`.
    pub fn retain_within(&mut self, bounds: &CellBounds) {
        let before = self.cells.len();
        self.cells.retain(|coord, _| bounds.contains(*coord));
        trace!(target: "grid", before, after = self.cells.len(), "retain_within");
    }

    pub fn coords(&self) -> impl Iterator<Item = CellCoord> + '_ {
        self.cells.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl From<Vec<(CellCoord, Cell)>> for Grid {
    fn from(cells: Vec<(CellCoord, Cell)>) -> Self {
        Self {
            cells: cells.into_iter().collect(),
        }
    }
}

impl From<Grid> for Vec<(CellCoord, Cell)> {
    fn from(grid: Grid) -> Self {
        let mut out: Vec<(CellCoord, Cell)> = grid.cells.into_iter().collect();
        out.sort_by_key(|(coord, _)| *coord);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_geom::CellBounds;

    const U1: UserId = UserId(1);

    #[test]
    fn absent_cells_flatten_blank() {
        let grid = Grid::new();
        let flat = grid.flatten(&BTreeSet::new(), CellCoord::new(9, 9));
        assert_eq!(flat.len(), CELL_AREA);
        assert!(flat.iter().all(|f| *f == FlatGlyph::default()));
    }

    #[test]
    fn zero_deltas_do_not_touch_depth() {
        let mut grid = Grid::new();
        let (cell, local) = GlyphCoord::new(3, 3).split();
        grid.add_change(U1, cell, local, Glyph('z'));
        grid.move_undo_point(U1, &CellDeltas::from(vec![(cell, 0)]));
        assert_eq!(grid.cell(cell).map(|c| c.depth(U1)), Some(1));
    }

    #[test]
    fn retain_and_cells_in_respect_bounds() {
        let mut grid = Grid::new();
        for x in -2..=2 {
            grid.add_change(U1, CellCoord::new(x, 0), LocalCoord::origin(), Glyph('k'));
        }
        let b = CellBounds::new(CellCoord::new(0, 0), CellCoord::new(5, 5));
        assert_eq!(grid.cells_in(&b).len(), 3);
        grid.retain_within(&b);
        assert_eq!(grid.len(), 3);
        assert!(grid.cell(CellCoord::new(-1, 0)).is_none());
    }

    #[test]
    fn deltas_merge_and_negate() {
        let a = CellCoord::new(0, 0);
        let d: CellDeltas = [(a, 2), (a, 1)].into_iter().collect();
        assert_eq!(d.get(a), 3);
        assert_eq!(d.negated().get(a), -3);
        assert!(CellDeltas::from(vec![(a, 0)]).is_empty());
    }
}
