//! Partitioned glyph grid with per-user append-only write logs.
//!
//! A [`Grid`] maps cell coordinates to [`Cell`]s. Every position of a cell
//! keeps the full ordered log of writes made to it; nothing is ever removed.
//! What a position *shows* is decided by [`Cell::flatten`], which consults a
//! per-(user, cell) depth cursor: undo moves a user's cursor back over their
//! own writes and redo moves it forward again. Other users' writes carry
//! their own sequence numbers and are untouched, so undoing never erases a
//! collaborator's concurrent work.
//!
//! Invariants:
//! * Sequence indices for one (cell, user) are strictly increasing in
//!   insertion order, hence also for any (cell, position, user).
//! * The total write log length of every position is non-decreasing.
//! * A depth cursor is always within `0..=timeline length` of its lane.
//!
//! The [`undo`] module holds the per-user counter snapshots that compute the
//! depth deltas handed to [`Grid::move_undo_point`].

mod cell;
mod grid;
mod text;
pub mod undo;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use unicode_width::UnicodeWidthChar;

pub use cell::{Cell, Write};
pub use grid::{CellDeltas, Grid};
pub use text::edits_for_text;
pub use undo::{UNDO_HISTORY_MAX, UndoEngine};

/// Small integer identifying a user for the lifetime of a server's view of
/// their session.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub u32);

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

/// A single fixed-width character.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Glyph(pub char);

impl Glyph {
    pub const BLANK: Glyph = Glyph(' ');

    /// Accept only printable characters occupying exactly one column.
    pub fn checked(c: char) -> Result<Self, GlyphError> {
        if c.is_control() {
            return Err(GlyphError::Control(c));
        }
        match c.width() {
            Some(1) => Ok(Glyph(c)),
            width => Err(GlyphError::Width {
                glyph: c,
                width: width.unwrap_or(0),
            }),
        }
    }

    pub fn is_blank(self) -> bool {
        self == Self::BLANK
    }
}

impl Default for Glyph {
    fn default() -> Self {
        Self::BLANK
    }
}

impl fmt::Display for Glyph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The resolved content of one position: the visible glyph and who wrote it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FlatGlyph {
    pub author: Option<UserId>,
    pub glyph: Glyph,
}

impl FlatGlyph {
    pub fn by(author: UserId, glyph: Glyph) -> Self {
        Self {
            author: Some(author),
            glyph,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GlyphError {
    #[error("control character {0:?} cannot be placed on the grid")]
    Control(char),
    #[error("glyph {glyph:?} is {width} columns wide, expected 1")]
    Width { glyph: char, width: usize },
}

/// Structural problems found while decoding a cell from the wire or disk.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("cell has {found} positions, expected {expected}")]
    PositionCount { expected: usize, found: usize },
    #[error("lane of {user} has depth {depth} beyond its {len} writes")]
    DepthOutOfRange { user: UserId, depth: usize, len: usize },
    #[error("lane of {user} has a non-increasing timeline")]
    Timeline { user: UserId },
    #[error("write by {user} references sequence {seq} which was never issued")]
    UnknownSequence { user: UserId, seq: u32 },
}
