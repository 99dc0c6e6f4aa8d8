//! `c3sim` – Create 3 arena simulator.
//!
//! 1. Initialises logging (see [`c3sim_runtime::telemetry`]).
//! 2. Loads `~/.c3sim/config.toml` (or `$C3SIM_CONFIG`) plus `C3SIM_*`
//!    overrides and validates it; an invalid configuration exits with
//!    status 2 before anything is bound.
//! 3. Runs the simulation loop and the WebSocket bridge until Ctrl-C.

mod config;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use c3sim_runtime::{SimConfig, SimLoop, init_tracing};
use c3sim_types::SimError;
use colored::Colorize;
use tracing::warn;

/// Why the process stopped early.
#[derive(Debug)]
enum Failure {
    /// Configuration missing or invalid; nothing was started.
    Config(SimError),
    /// The async runtime could not be built.
    Runtime(std::io::Error),
    /// The simulation stopped with an error.
    Sim(SimError),
}

impl Failure {
    fn exit_status(&self) -> u8 {
        match self {
            Failure::Config(_) => 2,
            Failure::Runtime(_) | Failure::Sim(_) => 1,
        }
    }

    fn report(&self) {
        match self {
            Failure::Config(e) => eprintln!("{}: {}", "Config error".red().bold(), e),
            Failure::Runtime(e) => {
                eprintln!("{}: {}", "Failed to start async runtime".red().bold(), e)
            }
            Failure::Sim(e) => eprintln!("{}: {}", "Simulation error".red().bold(), e),
        }
    }
}

fn main() -> ExitCode {
    // Dropped on every return path, flushing exported spans.
    let _guard = init_tracing("c3sim");

    print_banner();

    match run() {
        Ok(()) => {
            println!("{}", "  ✓ Simulation stopped.".green());
            ExitCode::SUCCESS
        }
        Err(failure) => {
            failure.report();
            ExitCode::from(failure.exit_status())
        }
    }
}

fn run() -> Result<(), Failure> {
    let sim_config = load_config().map_err(Failure::Config)?;
    print_summary(&sim_config);
    let sim = SimLoop::new(sim_config).map_err(Failure::Config)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "  Ctrl-C received – stopping simulation …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; stop the process with a signal instead");
    }

    let runtime = tokio::runtime::Runtime::new().map_err(Failure::Runtime)?;
    runtime.block_on(sim.run(shutdown)).map_err(Failure::Sim)
}

fn load_config() -> Result<SimConfig, SimError> {
    let (cfg, source) = config::load()?;
    match source {
        Some(path) => println!("  Config loaded from {}", path.display().to_string().bold()),
        None => println!(
            "  No config at {}; using defaults.",
            config::config_path().display().to_string().dimmed()
        ),
    }
    cfg.into_sim_config()
}

// ─────────────────────────────────────────────────────────────────────────────
// Console output
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ____ _____     _           "#.bold().cyan());
    println!("{}", r#"  / ___|___ / ___(_)_ __ ___  "#.bold().cyan());
    println!("{}", r#" | |     |_ \/ __| | '_ ` _ \ "#.bold().cyan());
    println!("{}", r#" | |___ ___) \__ \ | | | | | |"#.bold().cyan());
    println!("{}", r#"  \____|____/|___/_|_| |_| |_|"#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "c3sim".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Differential-drive arena simulator");
    println!();
}

fn print_summary(cfg: &SimConfig) {
    let topics = c3sim_runtime::RobotTopics::new(&cfg.robot_name);
    println!(
        "  Bridge    ws://{}",
        cfg.listen_addr.to_string().bold()
    );
    println!("  Robot     {} at {} Hz", cfg.robot_name.bold(), cfg.tick_rate_hz);
    println!("  Command   {}", topics.cmd_vel.cyan());
    println!(
        "  State     {}  {}  {}",
        topics.odom.cyan(),
        topics.imu.cyan(),
        topics.ir_intensity.cyan()
    );
    println!();
}
