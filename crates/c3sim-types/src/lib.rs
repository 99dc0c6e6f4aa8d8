//! `c3sim-types` – shared data model for the Create 3 arena simulator.
//!
//! Holds the robot state records ([`Pose`], [`VelocityCommand`]), the
//! ROS-shaped wire messages published to clients ([`Odometry`], [`Imu`],
//! [`IrIntensityVector`]), the bridge frame envelope ([`BridgeFrame`]) and the
//! workspace-wide [`SimError`].
//!
//! World frame: origin at the arena centre, +x right, +y up, heading measured
//! counter-clockwise from +x.  All quantities are SI (metres, radians,
//! seconds).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ────────────────────────────────────────────────────────────────────────────
// Topic naming
// ────────────────────────────────────────────────────────────────────────────

/// Type label of the velocity command topic.
pub const TWIST_TYPE: &str = "geometry_msgs/Twist";
/// Type label of the odometry topic.
pub const ODOMETRY_TYPE: &str = "nav_msgs/Odometry";
/// Type label of the IMU topic.
pub const IMU_TYPE: &str = "sensor_msgs/Imu";
/// Type label of the IR range topic.
pub const IR_INTENSITY_TYPE: &str = "irobot_create_msgs/IrIntensityVector";

/// Build the fully qualified topic name `/<robot>/<suffix>`.
///
/// Surrounding slashes on `robot` are ignored so `"juliet"`, `"/juliet"` and
/// `"juliet/"` all yield the same name.
pub fn robot_topic(robot: &str, suffix: &str) -> String {
    format!("/{}/{}", robot.trim_matches('/'), suffix.trim_matches('/'))
}

// ────────────────────────────────────────────────────────────────────────────
// Robot state
// ────────────────────────────────────────────────────────────────────────────

/// Planar robot pose.
///
/// `theta` is never wrapped: it accumulates exactly as integrated and every
/// trigonometric consumer takes it as is.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    /// X position in the world frame (metres).
    pub x: f64,
    /// Y position in the world frame (metres).
    pub y: f64,
    /// Heading, counter-clockwise from +X (radians, unbounded).
    pub theta: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self { x, y, theta }
    }

    /// Planar orientation as a unit quaternion about +Z.
    pub fn orientation(&self) -> Quaternion {
        Quaternion::from_yaw(self.theta)
    }
}

/// Velocity command consumed by the drive model.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VelocityCommand {
    /// Forward speed (m/s).
    pub linear_x: f64,
    /// Yaw rate (rad/s).
    pub angular_z: f64,
}

impl VelocityCommand {
    pub fn new(linear_x: f64, angular_z: f64) -> Self {
        Self {
            linear_x,
            angular_z,
        }
    }

    /// Extract a command from a Twist-shaped JSON value.
    ///
    /// Only `linear.x` and `angular.z` are read; every other field is
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidMessage`] when either scalar is missing or
    /// is not a number.
    pub fn from_twist(topic: &str, msg: &Value) -> Result<Self, SimError> {
        let field = |axis: &str, component: &str| {
            msg.get(axis)
                .and_then(|v| v.get(component))
                .and_then(Value::as_f64)
                .ok_or_else(|| SimError::InvalidMessage {
                    topic: topic.to_string(),
                    details: format!("missing numeric {axis}.{component}"),
                })
        };
        Ok(Self {
            linear_x: field("linear", "x")?,
            angular_z: field("angular", "z")?,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Geometry primitives
// ────────────────────────────────────────────────────────────────────────────

/// 3-D vector as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::default()
    }
}

/// Rotation quaternion (x, y, z, w order on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    /// Rotation of `yaw` radians about +Z.
    pub fn from_yaw(yaw: f64) -> Self {
        let half = yaw / 2.0;
        Self {
            x: 0.0,
            y: 0.0,
            z: half.sin(),
            w: half.cos(),
        }
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::from_yaw(0.0)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Wire messages
// ────────────────────────────────────────────────────────────────────────────

/// ROS-style timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Time {
    pub sec: i64,
    pub nanosec: u32,
}

impl Time {
    /// Convert a non-negative simulation time in seconds.
    pub fn from_secs_f64(secs: f64) -> Self {
        let secs = secs.max(0.0);
        let whole = secs.floor();
        let nanosec = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
        Self {
            sec: whole as i64,
            nanosec,
        }
    }
}

/// ROS-style message header.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Header {
    pub stamp: Time,
    pub frame_id: String,
}

impl Header {
    pub fn new(stamp: Time, frame_id: impl Into<String>) -> Self {
        Self {
            stamp,
            frame_id: frame_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseMsg {
    pub position: Vector3,
    pub orientation: Quaternion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwistMsg {
    pub linear: Vector3,
    pub angular: Vector3,
}

/// `nav_msgs/Odometry` subset published on `/<robot>/odom`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Odometry {
    pub header: Header,
    pub child_frame_id: String,
    pub pose: PoseMsg,
    pub twist: TwistMsg,
}

impl Odometry {
    pub fn new(stamp: Time, pose: &Pose, cmd: &VelocityCommand) -> Self {
        Self {
            header: Header::new(stamp, "odom"),
            child_frame_id: "base_link".to_string(),
            pose: PoseMsg {
                position: Vector3::new(pose.x, pose.y, 0.0),
                orientation: pose.orientation(),
            },
            twist: TwistMsg {
                linear: Vector3::new(cmd.linear_x, 0.0, 0.0),
                angular: Vector3::new(0.0, 0.0, cmd.angular_z),
            },
        }
    }
}

/// `sensor_msgs/Imu` subset published on `/<robot>/imu`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Imu {
    pub header: Header,
    pub orientation: Quaternion,
    pub angular_velocity: Vector3,
    pub linear_acceleration: Vector3,
}

impl Imu {
    pub fn new(stamp: Time, pose: &Pose, cmd: &VelocityCommand) -> Self {
        Self {
            header: Header::new(stamp, "base_link"),
            orientation: pose.orientation(),
            angular_velocity: Vector3::new(0.0, 0.0, cmd.angular_z),
            linear_acceleration: Vector3::zero(),
        }
    }
}

/// One named range reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrIntensity {
    pub header: Header,
    /// Distance to the first wall hit along the beam (metres).
    pub value: f64,
}

/// Range readings published on `/<robot>/ir_intensity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrIntensityVector {
    pub header: Header,
    pub readings: Vec<IrIntensity>,
}

impl IrIntensityVector {
    /// Pair each sensor frame name with its reading, in order.
    pub fn new<'a>(stamp: Time, readings: impl IntoIterator<Item = (&'a str, f64)>) -> Self {
        Self {
            header: Header::new(stamp, "base_link"),
            readings: readings
                .into_iter()
                .map(|(frame, value)| IrIntensity {
                    header: Header::new(stamp, frame),
                    value,
                })
                .collect(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Bridge frame
// ────────────────────────────────────────────────────────────────────────────

/// The `publish` operation, the only op that carries data.
pub const OP_PUBLISH: &str = "publish";

/// Envelope of every frame exchanged with a client:
/// `{"op": "...", "topic": "...", "msg": {...}}`.
///
/// `topic` and `msg` are optional at the parsing level because control ops
/// such as `advertise` may omit `msg`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeFrame {
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<Value>,
}

impl BridgeFrame {
    /// Build an outbound `publish` frame.
    pub fn publish(topic: impl Into<String>, msg: Value) -> Self {
        Self {
            op: OP_PUBLISH.to_string(),
            topic: Some(topic.into()),
            msg: Some(msg),
        }
    }

    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::MalformedFrame`] when `text` is not JSON or lacks a
    /// string `op`.
    pub fn parse(text: &str) -> Result<Self, SimError> {
        serde_json::from_str(text).map_err(|e| SimError::MalformedFrame(e.to_string()))
    }

    /// Serialise to the JSON text sent over the wire.
    pub fn to_json(&self) -> Result<String, SimError> {
        serde_json::to_string(self).map_err(|e| SimError::Serialization(e.to_string()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Error type shared by every simulator crate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Malformed Frame: {0}")]
    MalformedFrame(String),

    #[error("Invalid Message on {topic}: {details}")]
    InvalidMessage { topic: String, details: String },

    #[error("Serialization Error: {0}")]
    Serialization(String),
}
