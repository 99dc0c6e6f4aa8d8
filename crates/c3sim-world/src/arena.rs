//! Arena occupancy.
//!
//! The arena is a square floor with an inset wall ring and a free yard inside
//! it.  A door band centred on x = 0 runs the full height of the arena and
//! cuts the ring at the top and at the bottom:
//!
//! ```text
//!   +---------------------------+   outer floor (free)
//!   |   #########   #########   |
//!   |   #       |   |       #   |   # wall ring
//!   |   #       |   |       #   |   | door band edges
//!   |   #     yard (free)   #   |
//!   |   #########   #########   |
//!   +---------------------------+
//! ```
//!
//! [`OccupancyMap::is_wall`] is the only source of collision truth.  It
//! quantises metric coordinates onto a fixed cell grid and runs nested
//! rectangle tests; no bitmap is stored.  Anything outside the outer floor is
//! wall.  The metric-to-display conversion for external renderers lives here
//! too so that physics never sees pixels.

use c3sim_types::SimError;
use serde::{Deserialize, Serialize};

/// Occupancy grid resolution (cells per metre, 5 mm cells).
pub const CELLS_PER_METER: f64 = 200.0;

/// Display scale used by [`metric_to_display`].
pub const PIXELS_PER_METER: f64 = 200.0;

/// Wall/free classifier over continuous world coordinates.
pub trait Occupancy {
    /// `true` when the point `(x, y)` (metres) is inside a wall.
    fn is_wall(&self, x: f64, y: f64) -> bool;

    fn is_free(&self, x: f64, y: f64) -> bool {
        !self.is_wall(x, y)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Layout
// ────────────────────────────────────────────────────────────────────────────

/// Arena dimensions in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaLayout {
    /// Half the side length of the square outer floor.
    pub half_extent: f64,
    /// Distance from the outer edge to the outside of the wall ring.
    pub wall_inset: f64,
    /// Thickness of the wall ring.
    pub wall_thickness: f64,
    /// Width of the door band centred on x = 0.
    pub door_width: f64,
}

impl Default for ArenaLayout {
    fn default() -> Self {
        Self {
            half_extent: 2.5,
            wall_inset: 0.75,
            wall_thickness: 0.1,
            door_width: 1.0,
        }
    }
}

impl ArenaLayout {
    /// Check that the dimensions describe a ring with a yard inside it.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Config`] naming the first offending dimension.
    pub fn validate(&self) -> Result<(), SimError> {
        let dims = [
            ("half_extent", self.half_extent),
            ("wall_inset", self.wall_inset),
            ("wall_thickness", self.wall_thickness),
            ("door_width", self.door_width),
        ];
        for (name, value) in dims {
            if !value.is_finite() || value < 0.0 {
                return Err(SimError::Config(format!(
                    "arena.{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if self.half_extent <= 0.0 {
            return Err(SimError::Config("arena.half_extent must be positive".to_string()));
        }
        if self.wall_inset + self.wall_thickness >= self.half_extent {
            return Err(SimError::Config(format!(
                "arena wall ring ({} + {}) leaves no yard inside half extent {}",
                self.wall_inset, self.wall_thickness, self.half_extent
            )));
        }
        if self.door_width >= 2.0 * (self.half_extent - self.wall_inset) {
            return Err(SimError::Config(format!(
                "arena.door_width {} removes the whole wall ring",
                self.door_width
            )));
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Occupancy map
// ────────────────────────────────────────────────────────────────────────────

/// Half-open cell interval `[lo, hi)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    lo: i64,
    hi: i64,
}

impl Span {
    fn contains(&self, cell: i64) -> bool {
        (self.lo..self.hi).contains(&cell)
    }
}

/// Closed-form occupancy of an [`ArenaLayout`].
#[derive(Debug, Clone, PartialEq)]
pub struct OccupancyMap {
    layout: ArenaLayout,
    size: i64,
    wall: Span,
    yard: Span,
    door: Span,
}

impl OccupancyMap {
    pub fn new(layout: ArenaLayout) -> Self {
        let cells = |metres: f64| (metres * CELLS_PER_METER).round() as i64;
        let size = cells(2.0 * layout.half_extent);
        let wall_lo = cells(layout.wall_inset);
        let yard_lo = wall_lo + cells(layout.wall_thickness);
        let door_cells = cells(layout.door_width);
        let door_lo = (size - door_cells) / 2;
        Self {
            layout,
            size,
            wall: Span {
                lo: wall_lo,
                hi: size - wall_lo,
            },
            yard: Span {
                lo: yard_lo,
                hi: size - yard_lo,
            },
            door: Span {
                lo: door_lo,
                hi: door_lo + door_cells,
            },
        }
    }

    pub fn layout(&self) -> &ArenaLayout {
        &self.layout
    }

    /// Grid cell `(column, row)` holding `(x, y)`.  Rows grow downwards.
    pub fn cell_of(&self, x: f64, y: f64) -> (i64, i64) {
        let half = self.layout.half_extent;
        (
            ((x + half) * CELLS_PER_METER).floor() as i64,
            ((half - y) * CELLS_PER_METER).floor() as i64,
        )
    }

    fn cell_is_wall(&self, col: i64, row: i64) -> bool {
        let outside = col < 0 || row < 0 || col >= self.size || row >= self.size;
        if outside {
            return true;
        }
        let in_ring = self.wall.contains(col)
            && self.wall.contains(row)
            && !(self.yard.contains(col) && self.yard.contains(row));
        in_ring && !self.door.contains(col)
    }
}

impl Default for OccupancyMap {
    fn default() -> Self {
        Self::new(ArenaLayout::default())
    }
}

impl Occupancy for OccupancyMap {
    fn is_wall(&self, x: f64, y: f64) -> bool {
        if !x.is_finite() || !y.is_finite() {
            return true;
        }
        let (col, row) = self.cell_of(x, y);
        self.cell_is_wall(col, row)
    }
}

/// Convert world metres to display pixels (origin top-left, y down) for an
/// arena of the given half extent.
pub fn metric_to_display(layout: &ArenaLayout, x: f64, y: f64) -> (f64, f64) {
    (
        (x + layout.half_extent) * PIXELS_PER_METER,
        (layout.half_extent - y) * PIXELS_PER_METER,
    )
}
