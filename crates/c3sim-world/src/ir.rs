//! Front IR ranging array.
//!
//! Seven beams fan out from a point one robot radius ahead of the centre.
//! Each beam is ray-marched outwards in fixed steps against the occupancy map
//! and reports the distance of the first wall sample, or the maximum range
//! when nothing is hit.  Readings are deterministic for a given pose and map.

use c3sim_types::{Pose, SimError};

use crate::arena::Occupancy;

pub const IR_SENSOR_COUNT: usize = 7;

/// Beam offsets from the heading, right to left (degrees).
pub const IR_SENSOR_ANGLES_DEG: [f64; IR_SENSOR_COUNT] =
    [-65.3, -34.0, -14.25, 3.0, 20.0, 38.0, 65.3];

/// Frame names of the beams, in the same order as [`IR_SENSOR_ANGLES_DEG`].
pub const IR_SENSOR_FRAMES: [&str; IR_SENSOR_COUNT] = [
    "ir_intensity_right",
    "ir_intensity_front_right",
    "ir_intensity_front_center_right",
    "ir_intensity_front_center_left",
    "ir_intensity_front_left",
    "ir_intensity_left",
    "ir_intensity_side_left",
];

pub const DEFAULT_IR_MAX_RANGE: f64 = 0.1;
pub const DEFAULT_IR_STEP: f64 = 0.0025;

/// Upper bound on ray-march steps per beam.
pub const MAX_IR_STEPS_PER_BEAM: usize = 10_000;

/// Ordered range readings, one per beam (metres).
pub type IrScan = [f64; IR_SENSOR_COUNT];

/// Ray-marching model of the IR array.
#[derive(Debug, Clone, PartialEq)]
pub struct IrSensorArray {
    mount_offset: f64,
    max_range: f64,
    step: f64,
    steps: usize,
    offsets_rad: [f64; IR_SENSOR_COUNT],
}

impl IrSensorArray {
    /// Build an array mounted `mount_offset` metres ahead of the robot
    /// centre.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Config`] unless `max_range` is positive, `step`
    /// lies in `(0, max_range]` and a beam takes at most
    /// [`MAX_IR_STEPS_PER_BEAM`] steps.
    pub fn new(mount_offset: f64, max_range: f64, step: f64) -> Result<Self, SimError> {
        if !max_range.is_finite() || max_range <= 0.0 {
            return Err(SimError::Config(format!(
                "ir max range must be positive, got {max_range}"
            )));
        }
        if !step.is_finite() || step <= 0.0 || step > max_range {
            return Err(SimError::Config(format!(
                "ir step must lie in (0, {max_range}], got {step}"
            )));
        }
        if !mount_offset.is_finite() || mount_offset < 0.0 {
            return Err(SimError::Config(format!(
                "ir mount offset must be non-negative, got {mount_offset}"
            )));
        }
        let steps = (max_range / step).round();
        if steps > MAX_IR_STEPS_PER_BEAM as f64 {
            return Err(SimError::Config(format!(
                "ir range {max_range} at step {step} needs {steps} samples per beam, \
                 more than {MAX_IR_STEPS_PER_BEAM}"
            )));
        }
        Ok(Self {
            mount_offset,
            max_range,
            step,
            steps: steps as usize,
            offsets_rad: IR_SENSOR_ANGLES_DEG.map(f64::to_radians),
        })
    }

    pub fn max_range(&self) -> f64 {
        self.max_range
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    /// Occupancy queries made by one beam in the worst case.
    pub fn samples_per_beam(&self) -> usize {
        self.steps + 1
    }

    /// Read every beam from `pose`.
    pub fn scan(&self, pose: &Pose, map: &impl Occupancy) -> IrScan {
        let origin_x = pose.x + self.mount_offset * pose.theta.cos();
        let origin_y = pose.y + self.mount_offset * pose.theta.sin();
        self.offsets_rad
            .map(|offset| self.cast(origin_x, origin_y, pose.theta + offset, map))
    }

    /// March one beam from `(x, y)` along `direction` (radians).
    pub fn cast(&self, x: f64, y: f64, direction: f64, map: &impl Occupancy) -> f64 {
        let (sin, cos) = direction.sin_cos();
        (0..=self.steps)
            .map(|k| k as f64 * self.step)
            .find(|&d| d <= self.max_range && map.is_wall(x + d * cos, y + d * sin))
            .unwrap_or(self.max_range)
    }

    /// Pair each reading with its beam's frame name.
    pub fn named(scan: &IrScan) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        IR_SENSOR_FRAMES.iter().copied().zip(scan.iter().copied())
    }
}

impl Default for IrSensorArray {
    fn default() -> Self {
        Self {
            mount_offset: crate::drive::DEFAULT_ROBOT_RADIUS,
            max_range: DEFAULT_IR_MAX_RANGE,
            step: DEFAULT_IR_STEP,
            steps: (DEFAULT_IR_MAX_RANGE / DEFAULT_IR_STEP).round() as usize,
            offsets_rad: IR_SENSOR_ANGLES_DEG.map(f64::to_radians),
        }
    }
}
