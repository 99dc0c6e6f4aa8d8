//! Differential-drive kinematics with footprint collision arbitration.
//!
//! Each step integrates the command over a fixed `dt`:
//!
//! ```text
//! x' = x + v·cos(θ)·dt
//! y' = y + v·sin(θ)·dt
//! θ' = θ + ω·dt
//! ```
//!
//! The robot's circular footprint is sampled at the centre and at twelve rim
//! points (every 30°) around `(x', y')`.  If any sample is wall the step is
//! [`Motion::Colliding`]: translation is rejected and only the heading
//! advances.  Otherwise the step is [`Motion::Free`] and the whole candidate
//! pose is committed.

use std::f64::consts::TAU;

use c3sim_types::{Pose, VelocityCommand};

use crate::arena::Occupancy;

/// Physical radius of a Create 3 base (metres).
pub const DEFAULT_ROBOT_RADIUS: f64 = 0.17;

/// Rim samples around the footprint (one every 30°).
pub const FOOTPRINT_RIM_SAMPLES: usize = 12;

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    /// The candidate footprint was clear; the full pose was committed.
    Free,
    /// The candidate footprint touched a wall; position was kept, heading
    /// advanced.
    Colliding,
}

/// Pose committed by [`DriveModel::step`] and how it was arrived at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub pose: Pose,
    pub motion: Motion,
}

/// Fixed-timestep differential-drive integrator.
#[derive(Debug, Clone, PartialEq)]
pub struct DriveModel {
    radius: f64,
    dt: f64,
}

impl DriveModel {
    /// Create a model for a robot of `radius` metres stepped every `dt`
    /// seconds.
    pub fn new(radius: f64, dt: f64) -> Self {
        Self { radius, dt }
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Unchecked pose after one step of `cmd` from `pose`.
    pub fn candidate(&self, pose: &Pose, cmd: &VelocityCommand) -> Pose {
        Pose {
            x: pose.x + cmd.linear_x * pose.theta.cos() * self.dt,
            y: pose.y + cmd.linear_x * pose.theta.sin() * self.dt,
            theta: pose.theta + cmd.angular_z * self.dt,
        }
    }

    /// Centre followed by the rim samples of a footprint centred on `(x, y)`.
    pub fn footprint(&self, x: f64, y: f64) -> impl Iterator<Item = (f64, f64)> + '_ {
        std::iter::once((x, y)).chain((0..FOOTPRINT_RIM_SAMPLES).map(move |i| {
            let angle = TAU * i as f64 / FOOTPRINT_RIM_SAMPLES as f64;
            (x + self.radius * angle.cos(), y + self.radius * angle.sin())
        }))
    }

    /// `true` when any footprint sample at `(x, y)` is wall.
    pub fn collides(&self, x: f64, y: f64, map: &impl Occupancy) -> bool {
        self.footprint(x, y).any(|(px, py)| map.is_wall(px, py))
    }

    /// Advance `pose` by one step of `cmd`, arbitrating against `map`.
    pub fn step(&self, pose: &Pose, cmd: &VelocityCommand, map: &impl Occupancy) -> StepOutcome {
        let next = self.candidate(pose, cmd);
        if self.collides(next.x, next.y, map) {
            StepOutcome {
                pose: Pose {
                    x: pose.x,
                    y: pose.y,
                    theta: next.theta,
                },
                motion: Motion::Colliding,
            }
        } else {
            StepOutcome {
                pose: next,
                motion: Motion::Free,
            }
        }
    }
}
