//! Viewport-bounded partial synchronization.
//!
//! A client keeps only a window of cells resident. `ViewportSync` remembers
//! the (overscanned) window last requested from the server and decides, for
//! each newly computed visible rectangle, whether a new request is needed.
//! Visible rectangles that stay inside the requested window cost nothing;
//! anything poking out triggers a request for the new rectangle grown by
//! `overscan` cells on every side, so continuous panning re-requests only
//! every `overscan` cells of travel.
//!
//! Superseded requests are never cancelled: the next request's reply simply
//! replaces the resident window.

use core_geom::CellBounds;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewportSync {
    requested: Option<CellBounds>,
    overscan: i32,
}

impl ViewportSync {
    pub fn new(overscan: i32) -> Self {
        Self {
            requested: None,
            overscan: overscan.max(0),
        }
    }

    /// Start from a window the server already streamed (the snapshot bounds).
    pub fn with_requested(overscan: i32, requested: CellBounds) -> Self {
        Self {
            requested: Some(requested),
            overscan: overscan.max(0),
        }
    }

    pub fn requested(&self) -> Option<CellBounds> {
        self.requested
    }

    pub fn overscan(&self) -> i32 {
        self.overscan
    }

    /// Window to request for `visible`, independent of what was requested before.
    pub fn overscanned(&self, visible: CellBounds) -> CellBounds {
        visible.expand(self.overscan)
    }

    /// Returns the window to request when `visible` is not already covered,
    /// recording it as the new requested window.
    pub fn on_visible(&mut self, visible: CellBounds) -> Option<CellBounds> {
        if self
            .requested
            .is_some_and(|requested| requested.contains_bounds(&visible))
        {
            return None;
        }
        let next = self.overscanned(visible);
        debug!(target: "sync.viewport", previous = ?self.requested, next = ?next, "request_bounds");
        self.requested = Some(next);
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_geom::CellCoord;

    fn cb(x0: i32, y0: i32, x1: i32, y1: i32) -> CellBounds {
        CellBounds::new(CellCoord::new(x0, y0), CellCoord::new(x1, y1))
    }

    #[test]
    fn first_visible_always_requests() {
        let mut v = ViewportSync::new(1);
        assert_eq!(v.on_visible(cb(0, 0, 2, 2)), Some(cb(-1, -1, 3, 3)));
    }

    #[test]
    fn same_bounds_twice_requests_once() {
        let mut v = ViewportSync::new(1);
        assert!(v.on_visible(cb(0, 0, 2, 2)).is_some());
        assert!(v.on_visible(cb(0, 0, 2, 2)).is_none());
    }

    #[test]
    fn small_pan_inside_overscan_is_free() {
        let mut v = ViewportSync::with_requested(2, cb(-2, -2, 4, 4));
        assert!(v.on_visible(cb(1, 1, 3, 3)).is_none());
        assert_eq!(v.on_visible(cb(3, 0, 5, 2)), Some(cb(1, -2, 7, 4)));
        assert_eq!(v.requested(), Some(cb(1, -2, 7, 4)));
    }

    #[test]
    fn negative_overscan_is_treated_as_zero() {
        let v = ViewportSync::new(-4);
        assert_eq!(v.overscan(), 0);
        assert_eq!(v.overscanned(cb(0, 0, 1, 1)), cb(0, 0, 1, 1));
    }
}
