//! `c3sim-runtime` – the simulation engine.
//!
//! # Modules
//!
//! - [`sim_loop`] – [`RobotSim`][sim_loop::RobotSim] advances one robot by a
//!   fixed timestep (command, drive, sense, publish) and
//!   [`SimLoop`][sim_loop::SimLoop] drives it at the configured rate while the
//!   WebSocket bridge serves a client.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing] installs the
//!   global `tracing` subscriber with an optional OTLP span exporter.

pub mod sim_loop;
pub mod telemetry;

pub use sim_loop::{RobotSim, RobotTopics, SimConfig, SimLoop, TickReport};
pub use telemetry::{TracerProviderGuard, init_tracing};
