//! Dirty cell tracking for the rendering collaborator.
//!
//! Records cells whose flattened output may have changed since the renderer
//! last asked. A renderer diffs `flatten` output only for those cells and
//! regenerates just the affected meshes.
//!
//! Design constraints:
//! * Duplicate marks are deduped lazily when `take_in_bounds` is called.
//! * `mark_full` short-circuits everything else until the next take.
//! * Not thread-safe (mutably borrowed in event loop single-thread context).
//!
//! Invariants:
//! * `Damage::Cells` from `take_in_bounds` is sorted ascending and unique.
//! * After a take, internal storage is cleared (one-shot consumption).

use core_geom::{CellBounds, CellCoord};

/// What the renderer has to refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Damage {
    None,
    Cells(Vec<CellCoord>),
    /// Every resident cell (window moved or reconciliation was ambiguous).
    Full,
}

#[derive(Debug, Default)]
pub struct DirtyCellsTracker {
    cells: Vec<CellCoord>,
    full: bool,
}

impl DirtyCellsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, cell: CellCoord) {
        if !self.full {
            self.cells.push(cell);
        }
    }

    pub fn mark_all<I: IntoIterator<Item = CellCoord>>(&mut self, cells: I) {
        if !self.full {
            self.cells.extend(cells);
        }
    }

    pub fn mark_full(&mut self) {
        self.full = true;
        self.cells.clear();
    }

    /// Consume and return damage intersecting `bounds`.
    pub fn take_in_bounds(&mut self, bounds: &CellBounds) -> Damage {
        if std::mem::take(&mut self.full) {
            self.cells.clear();
            return Damage::Full;
        }
        let mut v: Vec<CellCoord> = self
            .cells
            .drain(..)
            .filter(|c| bounds.contains(*c))
            .collect();
        if v.is_empty() {
            return Damage::None;
        }
        v.sort_unstable();
        v.dedup();
        Damage::Cells(v)
    }

    pub fn is_empty(&self) -> bool {
        !self.full && self.cells.is_empty()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.full = false;
    }
}
