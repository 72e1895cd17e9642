//! Integer coordinate spaces and axis-aligned bounds for the glyph canvas.
//!
//! The canvas is an unbounded plane of fixed-width glyphs partitioned into
//! square cells of `CELL_SIZE` x `CELL_SIZE` glyphs. Four coordinate units are
//! tracked at the type level so a cell coordinate can never be passed where a
//! glyph coordinate is expected:
//!
//! * [`GlyphUnit`]: one step per glyph on the global plane.
//! * [`CellUnit`]: one step per cell.
//! * [`LocalUnit`]: glyph offset inside a single cell, always in `0..CELL_SIZE`.
//! * [`PixelUnit`]: screen pixels, only used at the input/render edge.
//!
//! Conversions are pure integer arithmetic. Glyph to cell uses floor
//! division (`div_euclid`) so negative coordinates land in the cell to their
//! upper-left, and `GlyphCoord::split` / `CellCoord::join` are exact inverses.

mod bounds;
mod coord;

pub use bounds::{Bounds, BoundsIter};
pub use coord::{
    CELL_AREA, CELL_SIZE, CellCoord, CellUnit, Coord, GlyphCoord, GlyphSize, GlyphUnit,
    LocalCoord, LocalUnit, PixelCoord, PixelUnit, Unit,
};

/// Cell-space bounds, the unit the viewport synchronizer and server speak.
pub type CellBounds = Bounds<CellUnit>;
/// Glyph-space bounds, the unit a client computes its visible area in.
pub type GlyphBounds = Bounds<GlyphUnit>;
