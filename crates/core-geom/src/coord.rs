use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Glyphs per cell side.
pub const CELL_SIZE: i32 = 16;
/// Positions held by a single cell.
pub const CELL_AREA: usize = (CELL_SIZE * CELL_SIZE) as usize;

/// Marker implemented by every coordinate unit.
pub trait Unit: Copy + Eq + Ord + Hash + fmt::Debug + Send + Sync + 'static {
    const NAME: &'static str;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GlyphUnit {}
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CellUnit {}
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LocalUnit {}
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PixelUnit {}

impl Unit for GlyphUnit {
    const NAME: &'static str = "glyph";
}
impl Unit for CellUnit {
    const NAME: &'static str = "cell";
}
impl Unit for LocalUnit {
    const NAME: &'static str = "local";
}
impl Unit for PixelUnit {
    const NAME: &'static str = "px";
}

/// A point tagged with its unit. Ordering is `x` then `y`, which keeps
/// `BTreeMap<CellCoord, _>` iteration deterministic.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Coord<U: Unit> {
    pub x: i32,
    pub y: i32,
    #[serde(skip)]
    unit: PhantomData<U>,
}

pub type GlyphCoord = Coord<GlyphUnit>;
pub type CellCoord = Coord<CellUnit>;
pub type LocalCoord = Coord<LocalUnit>;
pub type PixelCoord = Coord<PixelUnit>;

impl<U: Unit> Coord<U> {
    pub const fn new(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            unit: PhantomData,
        }
    }

    pub const fn origin() -> Self {
        Self::new(0, 0)
    }

    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x.saturating_add(dx), self.y.saturating_add(dy))
    }

    /// Component-wise minimum.
    pub fn min(self, other: Self) -> Self {
        Self::new(self.x.min(other.x), self.y.min(other.y))
    }

    /// Component-wise maximum.
    pub fn max(self, other: Self) -> Self {
        Self::new(self.x.max(other.x), self.y.max(other.y))
    }
}

impl<U: Unit> Default for Coord<U> {
    fn default() -> Self {
        Self::origin()
    }
}

impl<U: Unit> fmt::Debug for Coord<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}, {})", U::NAME, self.x, self.y)
    }
}

impl<U: Unit> fmt::Display for Coord<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl GlyphCoord {
    /// Cell containing this glyph (floor division).
    pub fn to_cell(self) -> CellCoord {
        CellCoord::new(self.x.div_euclid(CELL_SIZE), self.y.div_euclid(CELL_SIZE))
    }

    /// Offset of this glyph inside its cell.
    pub fn to_local(self) -> LocalCoord {
        LocalCoord::new(self.x.rem_euclid(CELL_SIZE), self.y.rem_euclid(CELL_SIZE))
    }

    pub fn split(self) -> (CellCoord, LocalCoord) {
        (self.to_cell(), self.to_local())
    }

    /// Top-left pixel of the glyph.
    pub fn to_pixel(self, size: GlyphSize) -> PixelCoord {
        PixelCoord::new(
            self.x.saturating_mul(size.width),
            self.y.saturating_mul(size.height),
        )
    }
}

impl CellCoord {
    /// Glyph coordinate of the cell's top-left position.
    pub fn origin_glyph(self) -> GlyphCoord {
        GlyphCoord::new(
            self.x.saturating_mul(CELL_SIZE),
            self.y.saturating_mul(CELL_SIZE),
        )
    }

    pub fn join(self, local: LocalCoord) -> GlyphCoord {
        self.origin_glyph().offset(local.x, local.y)
    }
}

impl LocalCoord {
    /// Row-major index into a cell's position array.
    ///
    /// Callers only construct local coordinates through `GlyphCoord::to_local`
    /// or `from_index`, so both components are already in `0..CELL_SIZE`.
    pub fn index(self) -> usize {
        let x = self.x.rem_euclid(CELL_SIZE) as usize;
        let y = self.y.rem_euclid(CELL_SIZE) as usize;
        y * CELL_SIZE as usize + x
    }

    pub fn from_index(index: usize) -> Self {
        let side = CELL_SIZE as usize;
        let index = index % CELL_AREA;
        LocalCoord::new((index % side) as i32, (index / side) as i32)
    }

    /// Iterate every position of a cell in row-major order.
    pub fn all() -> impl Iterator<Item = LocalCoord> {
        (0..CELL_AREA).map(LocalCoord::from_index)
    }
}

/// Pixel footprint of one glyph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlyphSize {
    pub width: i32,
    pub height: i32,
}

impl GlyphSize {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

impl Default for GlyphSize {
    fn default() -> Self {
        Self::new(10, 18)
    }
}

impl PixelCoord {
    /// Glyph under this pixel. A zero-sized glyph maps everything to the origin.
    pub fn to_glyph(self, size: GlyphSize) -> GlyphCoord {
        if size.width <= 0 || size.height <= 0 {
            return GlyphCoord::origin();
        }
        GlyphCoord::new(self.x.div_euclid(size.width), self.y.div_euclid(size.height))
    }
}
