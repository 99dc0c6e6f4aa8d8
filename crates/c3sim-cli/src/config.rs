//! Simulator configuration – reads `~/.c3sim/config.toml`.
//!
//! The file is optional; every field has a default.  `C3SIM_CONFIG` points
//! at a different file.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use c3sim_runtime::SimConfig;
use c3sim_types::{Pose, SimError};
use c3sim_world::ArenaLayout;
use serde::{Deserialize, Serialize};

pub const CONFIG_PATH_ENV: &str = "C3SIM_CONFIG";

/// On-disk configuration.  Converted into a validated [`SimConfig`] by
/// [`Config::into_sim_config`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address the WebSocket bridge listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Topic namespace, e.g. `juliet` gives `/juliet/cmd_vel`.
    #[serde(default = "default_robot_name")]
    pub robot_name: String,

    #[serde(default = "default_tick_rate_hz")]
    pub tick_rate_hz: f64,

    #[serde(default = "default_robot_radius")]
    pub robot_radius: f64,

    #[serde(default)]
    pub start_x: f64,
    #[serde(default)]
    pub start_y: f64,
    #[serde(default)]
    pub start_theta: f64,

    #[serde(default = "default_ir_max_range")]
    pub ir_max_range: f64,

    #[serde(default = "default_ir_step")]
    pub ir_step: f64,

    #[serde(default)]
    pub arena: ArenaLayout,
}

fn default_listen_addr() -> String {
    SimConfig::default().listen_addr.to_string()
}
fn default_robot_name() -> String {
    SimConfig::default().robot_name
}
fn default_tick_rate_hz() -> f64 {
    SimConfig::default().tick_rate_hz
}
fn default_robot_radius() -> f64 {
    SimConfig::default().robot_radius
}
fn default_ir_max_range() -> f64 {
    SimConfig::default().ir_max_range
}
fn default_ir_step() -> f64 {
    SimConfig::default().ir_step
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            robot_name: default_robot_name(),
            tick_rate_hz: default_tick_rate_hz(),
            robot_radius: default_robot_radius(),
            start_x: 0.0,
            start_y: 0.0,
            start_theta: 0.0,
            ir_max_range: default_ir_max_range(),
            ir_step: default_ir_step(),
            arena: ArenaLayout::default(),
        }
    }
}

impl Config {
    /// Validate and convert into runtime parameters.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Config`] describing the first invalid field.
    pub fn into_sim_config(self) -> Result<SimConfig, SimError> {
        let addr = self.listen_addr.trim();
        if addr.is_empty() {
            return Err(SimError::Config("listen_addr is empty".to_string()));
        }
        let listen_addr: SocketAddr = addr
            .parse()
            .map_err(|e| SimError::Config(format!("listen_addr {addr:?}: {e}")))?;

        let robot_name = self.robot_name.trim().trim_matches('/').to_string();
        let sim = SimConfig {
            listen_addr,
            robot_name,
            tick_rate_hz: self.tick_rate_hz,
            robot_radius: self.robot_radius,
            start_pose: Pose::new(self.start_x, self.start_y, self.start_theta),
            arena: self.arena,
            ir_max_range: self.ir_max_range,
            ir_step: self.ir_step,
        };
        sim.validate()?;
        Ok(sim)
    }
}

/// Path of the config file: `$C3SIM_CONFIG`, else `~/.c3sim/config.toml`.
pub fn config_path() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    resolve_config_path(std::env::var(CONFIG_PATH_ENV).ok().as_deref(), &home)
}

pub(crate) fn resolve_config_path(explicit: Option<&str>, home: &str) -> PathBuf {
    match explicit.map(str::trim) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(home).join(".c3sim").join("config.toml"),
    }
}

/// Load the config file (if any) and apply environment overrides.
pub fn load() -> Result<(Config, Option<PathBuf>), SimError> {
    let path = config_path();
    let (mut cfg, source) = match load_from(&path)? {
        Some(cfg) => (cfg, Some(path)),
        None => (Config::default(), None),
    };
    apply_env_overrides(&mut cfg);
    Ok((cfg, source))
}

/// Parse the file at `path`.  Returns `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, SimError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| SimError::Config(format!("failed to read {}: {e}", path.display())))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| SimError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `C3SIM_*` environment overrides.
///
/// | Variable | Config field |
/// |---|---|
/// | `C3SIM_LISTEN_ADDR` | `listen_addr` |
/// | `C3SIM_ROBOT_NAME` | `robot_name` |
/// | `C3SIM_TICK_RATE` | `tick_rate_hz` (ignored unless numeric) |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("C3SIM_LISTEN_ADDR") {
        cfg.listen_addr = v;
    }
    if let Ok(v) = std::env::var("C3SIM_ROBOT_NAME") {
        cfg.robot_name = v;
    }
    if let Ok(v) = std::env::var("C3SIM_TICK_RATE")
        && let Ok(rate) = v.trim().parse::<f64>()
    {
        cfg.tick_rate_hz = rate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(body: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = resolve_config_path(None, &dir.path().to_string_lossy());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, body).unwrap();
        (dir, path)
    }

    #[test]
    fn defaults_match_runtime_defaults() {
        let sim = Config::default().into_sim_config().expect("valid");
        assert_eq!(sim, SimConfig::default());
        assert_eq!(sim.listen_addr.port(), 9012);
        assert_eq!(sim.robot_name, "juliet");
    }

    #[test]
    fn config_path_defaults_to_home_dir() {
        let p = resolve_config_path(None, "/home/operator");
        assert_eq!(p, PathBuf::from("/home/operator/.c3sim/config.toml"));
        let p = resolve_config_path(Some("  "), "/home/operator");
        assert!(p.ends_with(".c3sim/config.toml"));
    }

    #[test]
    fn config_path_honours_explicit_file() {
        let p = resolve_config_path(Some("/etc/c3sim.toml"), "/home/operator");
        assert_eq!(p, PathBuf::from("/etc/c3sim.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = resolve_config_path(None, &dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let (_dir, path) = write_config(
            r#"
robot_name = "romeo"
start_x = -1.0

[arena]
door_width = 0.8
"#,
        );
        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.robot_name, "romeo");
        assert_eq!(cfg.tick_rate_hz, 60.0);
        assert_eq!(cfg.arena.door_width, 0.8);
        assert_eq!(cfg.arena.half_extent, 2.5);

        let sim = cfg.into_sim_config().expect("valid");
        assert_eq!(sim.start_pose, Pose::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn unparseable_file_is_a_config_error() {
        let (_dir, path) = write_config("tick_rate_hz = \"fast\"\n");
        assert!(matches!(load_from(&path), Err(SimError::Config(_))));
    }

    #[test]
    fn invalid_values_fail_closed() {
        let bad = [
            Config {
                listen_addr: String::new(),
                ..Config::default()
            },
            Config {
                listen_addr: "localhost".to_string(),
                ..Config::default()
            },
            Config {
                robot_name: " / ".to_string(),
                ..Config::default()
            },
            Config {
                tick_rate_hz: -5.0,
                ..Config::default()
            },
            Config {
                tick_rate_hz: f64::INFINITY,
                ..Config::default()
            },
            Config {
                tick_rate_hz: 1e10,
                ..Config::default()
            },
            Config {
                tick_rate_hz: 1e-300,
                ..Config::default()
            },
            Config {
                robot_radius: 0.0,
                ..Config::default()
            },
            Config {
                ir_step: 0.0,
                ..Config::default()
            },
            Config {
                arena: ArenaLayout {
                    wall_inset: 3.0,
                    ..ArenaLayout::default()
                },
                ..Config::default()
            },
        ];
        for cfg in bad {
            let shown = format!("{cfg:?}");
            assert!(
                matches!(cfg.into_sim_config(), Err(SimError::Config(_))),
                "accepted {shown}"
            );
        }
    }

    #[test]
    fn robot_name_slashes_are_trimmed() {
        let sim = Config {
            robot_name: "/romeo/".to_string(),
            ..Config::default()
        }
        .into_sim_config()
        .expect("valid");
        assert_eq!(sim.robot_name, "romeo");
    }

    #[test]
    fn apply_env_overrides_changes_listen_addr() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("C3SIM_LISTEN_ADDR", "127.0.0.1:9100") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.listen_addr, "127.0.0.1:9100");
        unsafe { std::env::remove_var("C3SIM_LISTEN_ADDR") };
    }

    #[test]
    fn apply_env_overrides_changes_robot_name() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("C3SIM_ROBOT_NAME", "sierra") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.robot_name, "sierra");
        unsafe { std::env::remove_var("C3SIM_ROBOT_NAME") };
    }

    #[test]
    fn apply_env_overrides_ignores_non_numeric_tick_rate() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("C3SIM_TICK_RATE", "fast") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.tick_rate_hz, 60.0);

        unsafe { std::env::set_var("C3SIM_TICK_RATE", "30") };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.tick_rate_hz, 30.0);
        unsafe { std::env::remove_var("C3SIM_TICK_RATE") };
    }
}
