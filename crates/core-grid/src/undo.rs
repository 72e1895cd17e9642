//! Per-user undo/redo bookkeeping as counter snapshots.
//!
//! Every write a user performs bumps the in-progress counter for its cell.
//! Committing a batch pushes that counter onto the undo stack. Undo pops the
//! newest snapshot and returns its negation, which the caller feeds to
//! [`crate::Grid::move_undo_point`]; redo is the mirror image. Nothing here
//! touches the grid directly, so the same engine drives both the client's
//! optimistic state and the server's authoritative copy.

use core_geom::CellCoord;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::CellDeltas;

/// Maximum number of snapshots retained in undo history.
pub const UNDO_HISTORY_MAX: usize = 200;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoEngine {
    undo_stack: Vec<CellDeltas>,
    redo_stack: Vec<CellDeltas>,
    current: CellDeltas,
    #[serde(default = "UndoEngine::default_history_max")]
    history_max: usize,
}

impl Default for UndoEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl UndoEngine {
    pub fn new() -> Self {
        Self::with_history_max(UNDO_HISTORY_MAX)
    }

    pub fn with_history_max(history_max: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            current: CellDeltas::new(),
            history_max: history_max.max(1),
        }
    }

    fn default_history_max() -> usize {
        UNDO_HISTORY_MAX
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }
    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }
    /// Writes counted since the last committed batch.
    pub fn current(&self) -> &CellDeltas {
        &self.current
    }
    pub fn has_uncommitted(&self) -> bool {
        !self.current.is_empty()
    }
    pub fn can_undo(&self) -> bool {
        self.has_uncommitted() || !self.undo_stack.is_empty()
    }
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// The batch `undo` would hide next, without changing anything.
    pub fn peek_undo(&self) -> Option<&CellDeltas> {
        if self.has_uncommitted() {
            Some(&self.current)
        } else {
            self.undo_stack.last()
        }
    }

    /// The batch `redo` would reveal next.
    pub fn peek_redo(&self) -> Option<&CellDeltas> {
        if self.has_uncommitted() {
            // Undo would commit first and clear redo.
            return None;
        }
        self.redo_stack.last()
    }

    /// Count one write into the in-progress batch.
    pub fn note_write(&mut self, cell: CellCoord) {
        self.current.add(cell, 1);
    }

    /// Commit the in-progress batch. Returns false (and changes nothing) when
    /// no writes were counted since the previous commit.
    pub fn add_batch(&mut self) -> bool {
        if self.current.is_empty() {
            return false;
        }
        let snap = std::mem::take(&mut self.current);
        self.undo_stack.push(snap);
        trace!(target: "state.undo", undo_depth = self.undo_stack.len(), redo_depth = self.redo_stack.len(), "push_snapshot");
        if self.undo_stack.len() > self.history_max {
            let _ = self.undo_stack.remove(0);
            trace!(target: "state.undo", "undo_stack_trimmed");
        }
        self.redo_stack.clear();
        trace!(target: "state.undo", "redo_stack_cleared_on_new_batch");
        true
    }

    /// Pop the newest batch and return the depth deltas that hide it.
    ///
    /// An uncommitted batch is committed first so it is what gets undone.
    pub fn undo(&mut self) -> Option<CellDeltas> {
        self.add_batch();
        let last = self.undo_stack.pop()?;
        trace!(target: "state.undo", undo_depth = self.undo_stack.len(), redo_depth = self.redo_stack.len(), "undo_pop");
        let deltas = last.negated();
        self.redo_stack.push(last);
        Some(deltas)
    }

    /// Pop the newest undone batch and return the depth deltas that reveal it.
    ///
    /// Uncommitted writes start a new branch: they are committed, which
    /// clears the redo stack, and nothing is redone.
    pub fn redo(&mut self) -> Option<CellDeltas> {
        self.add_batch();
        let next = self.redo_stack.pop()?;
        trace!(target: "state.undo", redo_depth = self.redo_stack.len(), undo_depth = self.undo_stack.len(), "redo_pop");
        let deltas = next.clone();
        self.undo_stack.push(next);
        Some(deltas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(x: i32) -> CellCoord {
        CellCoord::new(x, 0)
    }

    #[test]
    fn empty_batch_is_noop() {
        let mut u = UndoEngine::new();
        assert!(!u.add_batch());
        assert_eq!(u.undo_depth(), 0);
        assert_eq!(u.undo(), None);
        assert_eq!(u.redo(), None);
    }

    #[test]
    fn undo_returns_negation_and_redo_restores() {
        let mut u = UndoEngine::new();
        u.note_write(c(0));
        u.note_write(c(0));
        u.note_write(c(1));
        assert!(u.add_batch());
        let back = u.undo().unwrap();
        assert_eq!(back.get(c(0)), -2);
        assert_eq!(back.get(c(1)), -1);
        assert_eq!(u.redo_depth(), 1);
        let fwd = u.redo().unwrap();
        assert_eq!(fwd.get(c(0)), 2);
        assert_eq!((u.undo_depth(), u.redo_depth()), (1, 0));
    }

    #[test]
    fn new_batch_clears_redo() {
        let mut u = UndoEngine::new();
        u.note_write(c(0));
        u.add_batch();
        u.undo();
        u.note_write(c(2));
        u.add_batch();
        assert_eq!(u.redo_depth(), 0);
        assert_eq!(u.redo(), None);
    }

    #[test]
    fn undo_commits_pending_writes_first() {
        let mut u = UndoEngine::new();
        u.note_write(c(3));
        let back = u.undo().unwrap();
        assert_eq!(back.get(c(3)), -1);
        assert!(!u.has_uncommitted());
    }

    #[test]
    fn redo_after_fresh_writes_commits_and_discards() {
        let mut u = UndoEngine::new();
        u.note_write(c(0));
        u.add_batch();
        u.undo();
        u.note_write(c(1));
        assert!(u.peek_redo().is_none());
        assert_eq!(u.redo(), None);
        assert_eq!((u.undo_depth(), u.redo_depth()), (1, 0));
        assert_eq!(u.peek_undo().map(|d| d.get(c(1))), Some(1));
    }

    #[test]
    fn history_is_bounded() {
        let mut u = UndoEngine::with_history_max(2);
        for i in 0..4 {
            u.note_write(c(i));
            u.add_batch();
        }
        assert_eq!(u.undo_depth(), 2);
        assert_eq!(u.undo().unwrap().get(c(3)), -1);
        assert_eq!(u.undo().unwrap().get(c(2)), -1);
        assert_eq!(u.undo(), None);
    }
}
