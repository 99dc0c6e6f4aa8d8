//! `c3sim-world` – the simulated arena and robot.
//!
//! Pure, synchronous models with no I/O.  Everything works in metric world
//! coordinates.
//!
//! # Modules
//!
//! - [`arena`] – [`OccupancyMap`][arena::OccupancyMap]: wall/free truth for the
//!   arena layout, plus the one metric-to-display conversion.
//! - [`drive`] – [`DriveModel`][drive::DriveModel]: differential-drive pose
//!   integration with footprint collision arbitration.
//! - [`ir`] – [`IrSensorArray`][ir::IrSensorArray]: seven ray-marched range
//!   beams.

pub mod arena;
pub mod drive;
pub mod ir;

pub use arena::{ArenaLayout, Occupancy, OccupancyMap};
pub use drive::{DriveModel, Motion, StepOutcome};
pub use ir::{IrScan, IrSensorArray};
