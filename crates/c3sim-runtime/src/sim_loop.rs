//! [`SimLoop`] – the fixed-rate simulation tick.
//!
//! Each tick:
//!
//! 1. **Command** – read the latest `/<robot>/cmd_vel` value.  A value that
//!    was already consumed is skipped; an unusable one is logged once and the
//!    previous command stays in force.  With no value at all the robot keeps
//!    its last command (initially standing still).
//! 2. **Drive** – [`DriveModel::step`] integrates the command and commits the
//!    new pose, or keeps the position when the footprint would hit a wall.
//! 3. **Sense** – [`IrSensorArray::scan`] ranges the committed pose.
//! 4. **Publish** – odometry, IMU and IR readings go to their topics; the
//!    bridge forwards them to the bound client.
//!
//! [`RobotSim`] is the only writer of pose and command state and is owned by
//! the tick task, so no reader ever sees a half-updated pose.  Network tasks
//! only publish onto the command topic, whose latest value is swapped under a
//! short lock.  The tick never waits on network delivery.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::{Arc, atomic::AtomicBool};
//! use c3sim_runtime::sim_loop::{SimConfig, SimLoop};
//!
//! #[tokio::main]
//! async fn main() {
//!     let shutdown = Arc::new(AtomicBool::new(false));
//!     SimLoop::new(SimConfig::default())
//!         .expect("valid configuration")
//!         .run(shutdown)
//!         .await
//!         .expect("simulation failed");
//! }
//! ```

use std::net::SocketAddr;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use c3sim_middleware::{BridgeServer, Topic, TopicRegistry};
use c3sim_types::{
    IMU_TYPE, IR_INTENSITY_TYPE, Imu, IrIntensityVector, ODOMETRY_TYPE, Odometry, Pose,
    SimError, TWIST_TYPE, Time, VelocityCommand, robot_topic,
};
use c3sim_world::drive::DEFAULT_ROBOT_RADIUS;
use c3sim_world::ir::{DEFAULT_IR_MAX_RANGE, DEFAULT_IR_STEP};
use c3sim_world::{ArenaLayout, DriveModel, IrScan, IrSensorArray, Motion, OccupancyMap};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_TICK_RATE_HZ: f64 = 60.0;
pub const DEFAULT_PORT: u16 = 9012;
pub const DEFAULT_ROBOT_NAME: &str = "juliet";

/// Accepted tick rates (Hz).  Outside this range the timer period is either
/// unrepresentable or too short to schedule.
pub const MIN_TICK_RATE_HZ: f64 = 1e-3;
pub const MAX_TICK_RATE_HZ: f64 = 10_000.0;

/// Validated runtime parameters for one simulated robot.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Socket address the bridge listens on.
    pub listen_addr: SocketAddr,
    /// Robot name used as the topic namespace.
    pub robot_name: String,
    /// Simulation ticks per second.
    pub tick_rate_hz: f64,
    /// Footprint radius, also the IR mount offset (metres).
    pub robot_radius: f64,
    pub start_pose: Pose,
    pub arena: ArenaLayout,
    pub ir_max_range: f64,
    pub ir_step: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            robot_name: DEFAULT_ROBOT_NAME.to_string(),
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
            robot_radius: DEFAULT_ROBOT_RADIUS,
            start_pose: Pose::default(),
            arena: ArenaLayout::default(),
            ir_max_range: DEFAULT_IR_MAX_RANGE,
            ir_step: DEFAULT_IR_STEP,
        }
    }
}

impl SimConfig {
    /// Fixed timestep in seconds.
    pub fn dt(&self) -> f64 {
        1.0 / self.tick_rate_hz
    }

    /// Wall-clock period between ticks.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Config`] when the period is zero or not
    /// representable as a [`Duration`].
    pub fn tick_period(&self) -> Result<Duration, SimError> {
        Duration::try_from_secs_f64(self.dt())
            .ok()
            .filter(|period| !period.is_zero())
            .ok_or_else(|| {
                SimError::Config(format!(
                    "tick_rate_hz {} gives no usable tick period",
                    self.tick_rate_hz
                ))
            })
    }

    /// # Errors
    ///
    /// Returns [`SimError::Config`] for the first parameter that cannot drive
    /// a simulation.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.robot_name.trim_matches('/').trim().is_empty() {
            return Err(SimError::Config("robot_name is empty".to_string()));
        }
        if !(MIN_TICK_RATE_HZ..=MAX_TICK_RATE_HZ).contains(&self.tick_rate_hz) {
            return Err(SimError::Config(format!(
                "tick_rate_hz must lie in [{MIN_TICK_RATE_HZ}, {MAX_TICK_RATE_HZ}], got {}",
                self.tick_rate_hz
            )));
        }
        self.tick_period()?;
        if !self.robot_radius.is_finite() || self.robot_radius <= 0.0 {
            return Err(SimError::Config(format!(
                "robot_radius must be positive, got {}",
                self.robot_radius
            )));
        }
        let start = self.start_pose;
        if !(start.x.is_finite() && start.y.is_finite() && start.theta.is_finite()) {
            return Err(SimError::Config("start pose must be finite".to_string()));
        }
        self.arena.validate()?;
        IrSensorArray::new(self.robot_radius, self.ir_max_range, self.ir_step)?;
        Ok(())
    }
}

/// Fully qualified topic names of one robot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotTopics {
    pub cmd_vel: String,
    pub odom: String,
    pub imu: String,
    pub ir_intensity: String,
}

impl RobotTopics {
    pub fn new(robot_name: &str) -> Self {
        Self {
            cmd_vel: robot_topic(robot_name, "cmd_vel"),
            odom: robot_topic(robot_name, "odom"),
            imu: robot_topic(robot_name, "imu"),
            ir_intensity: robot_topic(robot_name, "ir_intensity"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RobotSim
// ─────────────────────────────────────────────────────────────────────────────

/// Summary of one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// Ticks completed, including this one.
    pub tick: u64,
    pub pose: Pose,
    pub command: VelocityCommand,
    pub motion: Motion,
    pub ranges: IrScan,
}

/// The simulated robot: pose, command and the models that advance them.
pub struct RobotSim {
    topics: RobotTopics,
    map: OccupancyMap,
    drive: DriveModel,
    ir: IrSensorArray,
    pose: Pose,
    command: VelocityCommand,
    /// Publish sequence of the last command message consumed.
    command_seq: u64,
    ticks: u64,
    collisions: u64,
    cmd_vel: Arc<Topic>,
    odom: Arc<Topic>,
    imu: Arc<Topic>,
    ir_intensity: Arc<Topic>,
}

impl RobotSim {
    /// Build the robot described by `config` and look up its topics in
    /// `registry`, creating them if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Config`] when `config` fails validation.
    pub fn new(config: &SimConfig, registry: &TopicRegistry) -> Result<Self, SimError> {
        config.validate()?;
        let topics = RobotTopics::new(&config.robot_name);
        let ir = IrSensorArray::new(config.robot_radius, config.ir_max_range, config.ir_step)?;
        Ok(Self {
            cmd_vel: registry.get_or_create(&topics.cmd_vel, TWIST_TYPE),
            odom: registry.get_or_create(&topics.odom, ODOMETRY_TYPE),
            imu: registry.get_or_create(&topics.imu, IMU_TYPE),
            ir_intensity: registry.get_or_create(&topics.ir_intensity, IR_INTENSITY_TYPE),
            topics,
            map: OccupancyMap::new(config.arena),
            drive: DriveModel::new(config.robot_radius, config.dt()),
            ir,
            pose: config.start_pose,
            command: VelocityCommand::default(),
            command_seq: 0,
            ticks: 0,
            collisions: 0,
        })
    }

    pub fn topics(&self) -> &RobotTopics {
        &self.topics
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn command(&self) -> VelocityCommand {
        self.command
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Ticks whose translation was rejected by a wall.
    pub fn collisions(&self) -> u64 {
        self.collisions
    }

    pub fn map(&self) -> &OccupancyMap {
        &self.map
    }

    /// Simulation clock in seconds.
    pub fn sim_time(&self) -> f64 {
        self.ticks as f64 * self.drive.dt()
    }

    /// Advance the simulation by one timestep and publish the new state.
    #[instrument(level = "debug", skip(self), fields(tick = self.ticks + 1))]
    pub fn tick(&mut self) -> TickReport {
        self.refresh_command();

        let outcome = self.drive.step(&self.pose, &self.command, &self.map);
        if outcome.motion == Motion::Colliding {
            self.collisions += 1;
            debug!(x = self.pose.x, y = self.pose.y, "translation blocked by wall");
        }
        self.pose = outcome.pose;
        self.ticks += 1;

        let ranges = self.ir.scan(&self.pose, &self.map);
        self.publish_state(&ranges);

        TickReport {
            tick: self.ticks,
            pose: self.pose,
            command: self.command,
            motion: outcome.motion,
            ranges,
        }
    }

    fn refresh_command(&mut self) {
        let Some((seq, msg)) = self.cmd_vel.latest_with_sequence() else {
            return;
        };
        if seq == self.command_seq {
            return;
        }
        self.command_seq = seq;
        match VelocityCommand::from_twist(self.cmd_vel.name(), &msg) {
            Ok(command) => {
                if command != self.command {
                    debug!(v = command.linear_x, w = command.angular_z, "velocity command updated");
                }
                self.command = command;
            }
            Err(e) => warn!(error = %e, "velocity command rejected; keeping last command"),
        }
    }

    fn publish_state(&self, ranges: &IrScan) {
        let stamp = Time::from_secs_f64(self.sim_time());
        publish_as(&self.odom, &Odometry::new(stamp, &self.pose, &self.command));
        publish_as(&self.imu, &Imu::new(stamp, &self.pose, &self.command));
        publish_as(
            &self.ir_intensity,
            &IrIntensityVector::new(stamp, IrSensorArray::named(ranges)),
        );
    }
}

fn publish_as<T: Serialize>(topic: &Topic, msg: &T) {
    match serde_json::to_value(msg) {
        Ok(value) => topic.publish(value),
        Err(e) => warn!(topic = topic.name(), error = %e, "state message not serialisable"),
    }
}

impl std::fmt::Debug for RobotSim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobotSim")
            .field("topics", &self.topics)
            .field("pose", &self.pose)
            .field("command", &self.command)
            .field("ticks", &self.ticks)
            .field("collisions", &self.collisions)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SimLoop
// ─────────────────────────────────────────────────────────────────────────────

/// A [`RobotSim`] wired to a [`BridgeServer`] and driven at a fixed rate.
pub struct SimLoop {
    config: SimConfig,
    robot: RobotSim,
    bridge: BridgeServer,
}

impl SimLoop {
    /// Wire up topics, bridge and robot for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Config`] when `config` fails validation; nothing is
    /// bound or started in that case.
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;
        let registry = TopicRegistry::new();
        let topics = RobotTopics::new(&config.robot_name);

        let mut bridge = BridgeServer::new(registry.clone());
        bridge.accept_inbound(&topics.cmd_vel, TWIST_TYPE);
        bridge.advertise(&topics.odom, ODOMETRY_TYPE);
        bridge.advertise(&topics.imu, IMU_TYPE);
        bridge.advertise(&topics.ir_intensity, IR_INTENSITY_TYPE);

        let robot = RobotSim::new(&config, &registry)?;
        Ok(Self {
            config,
            robot,
            bridge,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn robot(&self) -> &RobotSim {
        &self.robot
    }

    pub fn robot_mut(&mut self) -> &mut RobotSim {
        &mut self.robot
    }

    pub fn bridge(&self) -> &BridgeServer {
        &self.bridge
    }

    /// Bind the configured address and run until `shutdown` is set.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Transport`] if the listen address cannot be bound.
    pub async fn run(self, shutdown: Arc<AtomicBool>) -> Result<(), SimError> {
        let listener = BridgeServer::bind(self.config.listen_addr).await?;
        self.run_on(listener, shutdown).await
    }

    /// Serve clients on `listener` and tick until `shutdown` is set.
    pub async fn run_on(
        mut self,
        listener: TcpListener,
        shutdown: Arc<AtomicBool>,
    ) -> Result<(), SimError> {
        let period = self.config.tick_period()?;
        let server = tokio::spawn(self.bridge.clone().serve(listener));

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            robot = %self.config.robot_name,
            rate_hz = self.config.tick_rate_hz,
            "simulation started"
        );
        while !shutdown.load(Ordering::SeqCst) {
            interval.tick().await;
            self.robot.tick();
        }

        server.abort();
        info!(
            ticks = self.robot.ticks(),
            collisions = self.robot.collisions(),
            "simulation stopped"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use c3sim_middleware::Connection;
    use c3sim_middleware::outbox::{OutboxReceiver, outbox};
    use serde_json::{Value, json};

    const TWIST_FORWARD: &str =
        r#"{"op":"publish","topic":"/juliet/cmd_vel","msg":{"linear":{"x":0.2},"angular":{"z":0.0}}}"#;

    fn make_robot() -> (TopicRegistry, RobotSim) {
        let registry = TopicRegistry::new();
        let robot = RobotSim::new(&SimConfig::default(), &registry).unwrap();
        (registry, robot)
    }

    fn bind_client(sim: &SimLoop) -> OutboxReceiver {
        let (tx, rx) = outbox();
        sim.bridge()
            .link()
            .bind(Connection::new(SocketAddr::from(([127, 0, 0, 1], 1)), tx));
        rx
    }

    fn next_frame(rx: &mut OutboxReceiver) -> Value {
        serde_json::from_str(&rx.try_recv().expect("frame queued")).unwrap()
    }

    #[test]
    fn default_config_is_valid() {
        SimConfig::default().validate().unwrap();
        assert!((SimConfig::default().dt() - 1.0 / 60.0).abs() < 1e-15);
    }

    #[test]
    fn invalid_config_fails_closed() {
        let cases = [
            SimConfig {
                robot_name: "/".to_string(),
                ..SimConfig::default()
            },
            SimConfig {
                tick_rate_hz: 0.0,
                ..SimConfig::default()
            },
            SimConfig {
                robot_radius: -0.1,
                ..SimConfig::default()
            },
            SimConfig {
                ir_step: 1.0,
                ..SimConfig::default()
            },
            SimConfig {
                tick_rate_hz: 1e10,
                ..SimConfig::default()
            },
            SimConfig {
                tick_rate_hz: 1e-300,
                ..SimConfig::default()
            },
            SimConfig {
                tick_rate_hz: f64::NAN,
                ..SimConfig::default()
            },
            SimConfig {
                ir_max_range: 1e3,
                ir_step: 1e-9,
                ..SimConfig::default()
            },
        ];
        for config in cases {
            assert!(matches!(SimLoop::new(config), Err(SimError::Config(_))));
        }
    }

    #[test]
    fn tick_period_tracks_rate() {
        let slow = SimConfig {
            tick_rate_hz: 0.5,
            ..SimConfig::default()
        };
        assert_eq!(slow.tick_period(), Ok(Duration::from_secs(2)));
        let quick = SimConfig {
            tick_rate_hz: 4.0,
            ..SimConfig::default()
        };
        assert_eq!(quick.tick_period(), Ok(Duration::from_millis(250)));

        for tick_rate_hz in [MIN_TICK_RATE_HZ, MAX_TICK_RATE_HZ] {
            SimConfig {
                tick_rate_hz,
                ..SimConfig::default()
            }
            .validate()
            .unwrap();
        }
    }

    #[tokio::test]
    async fn unusable_tick_rate_is_an_error_not_a_panic() {
        let mut sim = SimLoop::new(SimConfig::default()).unwrap();
        sim.config.tick_rate_hz = 1e10;
        let listener = BridgeServer::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let result = sim.run_on(listener, Arc::new(AtomicBool::new(false))).await;
        assert!(matches!(result, Err(SimError::Config(_))));
    }

    #[test]
    fn idle_robot_stays_put() {
        let (_registry, mut robot) = make_robot();
        for _ in 0..300 {
            let report = robot.tick();
            assert_eq!(report.motion, Motion::Free);
        }
        assert_eq!(robot.pose(), Pose::default());
        assert_eq!(robot.ticks(), 300);
    }

    #[test]
    fn one_second_at_twenty_centimetres_per_second() {
        let (registry, mut robot) = make_robot();
        registry
            .get_or_create("/juliet/cmd_vel", TWIST_TYPE)
            .publish(json!({"linear": {"x": 0.2}, "angular": {"z": 0.0}}));

        for _ in 0..60 {
            robot.tick();
        }
        let pose = robot.pose();
        assert!((pose.x - 0.2).abs() < 1e-9, "x = {}", pose.x);
        assert_eq!(pose.y, 0.0);
        assert_eq!(robot.collisions(), 0);
        assert!((robot.sim_time() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn last_command_persists_and_bad_command_is_ignored() {
        let (registry, mut robot) = make_robot();
        let cmd_vel = registry.get_or_create("/juliet/cmd_vel", TWIST_TYPE);
        cmd_vel.publish(json!({"linear": {"x": 0.1}, "angular": {"z": 0.5}}));
        robot.tick();
        assert_eq!(robot.command(), VelocityCommand::new(0.1, 0.5));

        for _ in 0..10 {
            robot.tick();
        }
        assert_eq!(robot.command(), VelocityCommand::new(0.1, 0.5));

        cmd_vel.publish(json!({"linear": {"y": 3.0}}));
        robot.tick();
        assert_eq!(robot.command(), VelocityCommand::new(0.1, 0.5));
    }

    #[test]
    fn wall_contact_is_counted_and_rotation_continues() {
        let registry = TopicRegistry::new();
        let config = SimConfig {
            start_pose: Pose::new(1.65 - DEFAULT_ROBOT_RADIUS - 0.001, 0.0, 0.0),
            ..SimConfig::default()
        };
        let mut robot = RobotSim::new(&config, &registry).unwrap();
        registry
            .get_or_create("/juliet/cmd_vel", TWIST_TYPE)
            .publish(json!({"linear": {"x": 0.2}, "angular": {"z": 0.3}}));

        let report = robot.tick();
        assert_eq!(report.motion, Motion::Colliding);
        assert_eq!(report.pose.x, config.start_pose.x);
        assert!((report.pose.theta - 0.3 / 60.0).abs() < 1e-12);
        assert_eq!(robot.collisions(), 1);
        // Front beams see the wall a few millimetres away.
        assert!(report.ranges[3] < DEFAULT_IR_MAX_RANGE);
    }

    #[test]
    fn inbound_command_then_tick_publishes_odometry_frame() {
        let mut sim = SimLoop::new(SimConfig::default()).unwrap();
        let mut rx = bind_client(&sim);

        sim.bridge().handle_incoming_text(TWIST_FORWARD);
        sim.robot_mut().tick();

        let odom = next_frame(&mut rx);
        assert_eq!(odom["op"], json!("publish"));
        assert_eq!(odom["topic"], json!("/juliet/odom"));
        let x = odom["msg"]["pose"]["position"]["x"].as_f64().unwrap();
        assert!(x > 0.0);
        assert_eq!(odom["msg"]["pose"]["position"]["y"], json!(0.0));
        assert_eq!(odom["msg"]["pose"]["orientation"]["z"], json!(0.0));
        assert_eq!(odom["msg"]["pose"]["orientation"]["w"], json!(1.0));
        assert_eq!(odom["msg"]["twist"]["linear"]["x"], json!(0.2));

        let imu = next_frame(&mut rx);
        assert_eq!(imu["topic"], json!("/juliet/imu"));
        let ir = next_frame(&mut rx);
        assert_eq!(ir["topic"], json!("/juliet/ir_intensity"));
        let readings = ir["msg"]["readings"].as_array().unwrap();
        assert_eq!(readings.len(), 7);
        assert_eq!(readings[0]["header"]["frame_id"], json!("ir_intensity_right"));
        assert_eq!(readings[3]["value"], json!(DEFAULT_IR_MAX_RANGE));

        // The next tick keeps moving forward.
        sim.robot_mut().tick();
        let odom = next_frame(&mut rx);
        assert!(odom["msg"]["pose"]["position"]["x"].as_f64().unwrap() > x);
    }

    #[test]
    fn ticks_without_client_do_not_fail() {
        let mut sim = SimLoop::new(SimConfig::default()).unwrap();
        for _ in 0..10 {
            sim.robot_mut().tick();
        }
        assert_eq!(sim.robot().ticks(), 10);
        assert!(!sim.bridge().link().is_bound());
    }

    #[test]
    fn odometry_stamp_uses_simulation_clock() {
        let mut sim = SimLoop::new(SimConfig {
            tick_rate_hz: 2.0,
            ..SimConfig::default()
        })
        .unwrap();
        let mut rx = bind_client(&sim);
        sim.robot_mut().tick();
        let odom = next_frame(&mut rx);
        assert_eq!(odom["msg"]["header"]["stamp"], json!({"sec": 0, "nanosec": 500_000_000}));
    }

    #[tokio::test]
    async fn run_on_serves_a_websocket_client_until_shutdown()
    -> Result<(), Box<dyn std::error::Error>> {
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::{connect_async, tungstenite::Message};

        let sim = SimLoop::new(SimConfig::default())?;
        let listener = BridgeServer::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(sim.run_on(listener, Arc::clone(&shutdown)));

        let (mut client, _) = connect_async(format!("ws://{addr}")).await?;
        client.send(Message::Text(TWIST_FORWARD.into())).await?;

        let mut last_x = None;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            let Some(Ok(Message::Text(text))) =
                tokio::time::timeout(Duration::from_secs(1), client.next()).await?
            else {
                continue;
            };
            let frame: Value = serde_json::from_str(text.as_str())?;
            if frame["topic"] != json!("/juliet/odom") {
                continue;
            }
            let x = frame["msg"]["pose"]["position"]["x"].as_f64().ok_or("x missing")?;
            if x > 0.01 {
                last_x = Some(x);
                break;
            }
        }
        assert!(last_x.is_some(), "robot never moved");

        shutdown.store(true, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(2), handle).await???;
        Ok(())
    }
}
