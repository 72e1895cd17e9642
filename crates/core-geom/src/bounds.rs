use serde::{Deserialize, Serialize};
use std::fmt;

use crate::coord::{CellUnit, Coord, GlyphUnit, Unit};

/// Inclusive axis-aligned rectangle `[min, max]` in one unit.
///
/// Invariant: `min.x <= max.x + 1 && min.y <= max.y + 1`. The `+ 1` slack
/// is the empty rectangle, which only arises from shrinking with a negative
/// margin; `new` always produces a non-empty one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Bounds<U: Unit> {
    pub min: Coord<U>,
    pub max: Coord<U>,
}

impl<U: Unit> fmt::Debug for Bounds<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}, {} .. {}, {}]",
            U::NAME,
            self.min.x,
            self.min.y,
            self.max.x,
            self.max.y
        )
    }
}

impl<U: Unit> Bounds<U> {
    /// Rectangle spanning both corners in any order.
    pub fn new(a: Coord<U>, b: Coord<U>) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn point(p: Coord<U>) -> Self {
        Self { min: p, max: p }
    }

    /// Rectangle reaching `half_width` / `half_height` steps out from `center`.
    pub fn centered(center: Coord<U>, half_width: i32, half_height: i32) -> Self {
        let hw = half_width.max(0);
        let hh = half_height.max(0);
        Self::new(center.offset(-hw, -hh), center.offset(hw, hh))
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }

    pub fn width(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        (i64::from(self.max.x) - i64::from(self.min.x) + 1) as u64
    }

    pub fn height(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        (i64::from(self.max.y) - i64::from(self.min.y) + 1) as u64
    }

    pub fn area(&self) -> u64 {
        self.width().saturating_mul(self.height())
    }

    pub fn contains(&self, p: Coord<U>) -> bool {
        !self.is_empty()
            && p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
    }

    /// True when every point of `other` lies in `self`. The empty rectangle is
    /// contained in everything.
    pub fn contains_bounds(&self, other: &Self) -> bool {
        if other.is_empty() {
            return true;
        }
        self.contains(other.min) && self.contains(other.max)
    }

    pub fn intersects(&self, other: &Self) -> bool {
        self.intersection(other).is_some()
    }

    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let out = Self {
            min: self.min.max(other.min),
            max: self.max.min(other.max),
        };
        (!out.is_empty() && !self.is_empty() && !other.is_empty()).then_some(out)
    }

    /// Smallest rectangle covering both. An empty side is ignored.
    pub fn union(&self, other: &Self) -> Self {
        match (self.is_empty(), other.is_empty()) {
            (true, _) => *other,
            (_, true) => *self,
            _ => Self {
                min: self.min.min(other.min),
                max: self.max.max(other.max),
            },
        }
    }

    /// Grow by `margin` on every side; a negative margin shrinks and may
    /// produce the empty rectangle.
    pub fn expand(&self, margin: i32) -> Self {
        Self {
            min: self.min.offset(-margin, -margin),
            max: self.max.offset(margin, margin),
        }
    }

    /// Row-major iteration over every integer coordinate.
    pub fn iter(&self) -> BoundsIter<U> {
        BoundsIter {
            bounds: *self,
            next: (!self.is_empty()).then_some(self.min),
        }
    }
}

impl Bounds<GlyphUnit> {
    /// Cells overlapping any glyph of these bounds.
    pub fn to_cell_bounds(&self) -> Bounds<CellUnit> {
        Bounds {
            min: self.min.to_cell(),
            max: self.max.to_cell(),
        }
    }
}

impl Bounds<CellUnit> {
    /// Glyph rectangle covered by these cells.
    pub fn to_glyph_bounds(&self) -> Bounds<GlyphUnit> {
        Bounds {
            min: self.min.origin_glyph(),
            max: self.max.origin_glyph().offset(crate::CELL_SIZE - 1, crate::CELL_SIZE - 1),
        }
    }
}

impl<U: Unit> IntoIterator for &Bounds<U> {
    type Item = Coord<U>;
    type IntoIter = BoundsIter<U>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct BoundsIter<U: Unit> {
    bounds: Bounds<U>,
    next: Option<Coord<U>>,
}

impl<U: Unit> Iterator for BoundsIter<U> {
    type Item = Coord<U>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = if current.x < self.bounds.max.x {
            Some(Coord::new(current.x + 1, current.y))
        } else if current.y < self.bounds.max.y {
            Some(Coord::new(self.bounds.min.x, current.y + 1))
        } else {
            None
        };
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CellCoord, GlyphCoord};

    fn cb(x0: i32, y0: i32, x1: i32, y1: i32) -> Bounds<CellUnit> {
        Bounds::new(CellCoord::new(x0, y0), CellCoord::new(x1, y1))
    }

    #[test]
    fn new_normalizes_corners() {
        let b = cb(3, -1, -2, 4);
        assert_eq!(b.min, CellCoord::new(-2, -1));
        assert_eq!(b.max, CellCoord::new(3, 4));
        assert_eq!(b.width(), 6);
        assert_eq!(b.height(), 6);
    }

    #[test]
    fn containment_is_inclusive() {
        let b = cb(0, 0, 2, 2);
        assert!(b.contains(CellCoord::new(2, 2)));
        assert!(!b.contains(CellCoord::new(3, 2)));
        assert!(b.contains_bounds(&cb(1, 1, 2, 2)));
        assert!(!b.contains_bounds(&cb(1, 1, 3, 2)));
    }

    #[test]
    fn shrinking_past_zero_is_empty() {
        let b = cb(0, 0, 1, 1).expand(-1);
        assert!(b.is_empty());
        assert_eq!(b.area(), 0);
        assert_eq!(b.iter().count(), 0);
        assert!(!b.contains(CellCoord::new(0, 0)));
        assert!(cb(5, 5, 5, 5).contains_bounds(&b));
    }

    #[test]
    fn intersection_and_union() {
        let a = cb(0, 0, 4, 4);
        let b = cb(3, 3, 8, 8);
        assert_eq!(a.intersection(&b), Some(cb(3, 3, 4, 4)));
        assert!(!a.intersects(&cb(5, 0, 6, 1)));
        assert_eq!(a.union(&b), cb(0, 0, 8, 8));
    }

    #[test]
    fn iter_is_row_major() {
        let cells: Vec<_> = cb(0, 0, 1, 1).iter().collect();
        assert_eq!(
            cells,
            vec![
                CellCoord::new(0, 0),
                CellCoord::new(1, 0),
                CellCoord::new(0, 1),
                CellCoord::new(1, 1)
            ]
        );
    }

    #[test]
    fn glyph_bounds_cover_cells() {
        let g = Bounds::new(GlyphCoord::new(-1, 0), GlyphCoord::new(16, 15));
        assert_eq!(g.to_cell_bounds(), cb(-1, 0, 1, 0));
        let back = cb(0, 0, 0, 0).to_glyph_bounds();
        assert_eq!(back.max, GlyphCoord::new(15, 15));
    }
}
