//! ---
//! smon_section: "01-core-functionality"
//! smon_subsection: "module"
//! smon_type: "source"
//! smon_scope: "code"
//! smon_description: "Shared primitives and utilities for the monitor runtime."
//! smon_version: "v0.1.0"
//! smon_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::logging::LogFormat;

fn default_mode() -> Mode {
    Mode::Production
}

fn default_persistence_path() -> PathBuf {
    PathBuf::from("target/state/service_states.json")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    "0.0.0.0:9811"
        .parse()
        .expect("valid default metrics address")
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_command_timeout_ms() -> u64 {
    2_000
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

fn default_cycle_interval_ms() -> u64 {
    5_000
}

/// Primary configuration object for the S-MON runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_mode")]
    pub mode: Mode,
    /// Service unit names to monitor, e.g. `mosquitto.service`.
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "S_MON_CONFIG";

    /// Load configuration from disk, respecting the `S_MON_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// All-defaults configuration around a bare service list, for runs
    /// driven entirely from the command line.
    pub fn with_services(services: Vec<String>) -> Self {
        Self {
            mode: Mode::default(),
            services,
            persistence: PersistenceConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            bus: BusConfig::default(),
            shutdown: ShutdownConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.services.is_empty() {
            return Err(anyhow!(
                "configuration must name at least one service to monitor"
            ));
        }
        let mut seen = std::collections::BTreeSet::new();
        for service in &self.services {
            if service.trim().is_empty() {
                return Err(anyhow!("service names must not be empty"));
            }
            if !seen.insert(service.as_str()) {
                return Err(anyhow!("duplicate service in configuration: {service}"));
            }
        }
        if self.bus.poll_interval_ms == 0 {
            return Err(anyhow!("bus.poll_interval_ms must be greater than zero"));
        }
        Ok(())
    }
}

/// Operating mode for the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Observe real service units through the host service manager.
    #[default]
    Production,
    /// Drive an in-memory bus with synthetic transitions.
    Simulation,
}

/// Durable snapshot location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_persistence_path")]
    pub path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: default_persistence_path(),
        }
    }
}

/// Log output configuration consumed by [`crate::logging::init_tracing`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            file_prefix: None,
            format: default_log_format(),
        }
    }
}

/// Prometheus exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

/// Notification-bus adapter tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Property poll cadence for the production adapter.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound for a single service-manager query.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl BusConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

/// Bound on the graceful shutdown path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_shutdown_timeout_ms")]
    pub timeout_ms: u64,
}

impl ShutdownConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

/// Synthetic transition driver used in simulation mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Interval between synthetic state changes per unit.
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,
    /// Every n-th stop becomes a crash; zero disables synthetic crashes.
    #[serde(default)]
    pub crash_every: u32,
}

impl SimulationConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: default_cycle_interval_ms(),
            crash_every: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "smon.toml",
            r#"
services = ["demo.service"]

[metrics]
enabled = false
"#,
        );
        let missing = dir.path().join("absent.toml");

        let loaded = AppConfig::load_with_source(&[missing, path.clone()]).unwrap();
        assert_eq!(loaded.source, path);
        assert_eq!(loaded.config.services, vec!["demo.service".to_owned()]);
        assert!(!loaded.config.metrics.enabled);
        assert_eq!(loaded.config.mode, Mode::Production);
    }

    #[test]
    fn rejects_empty_service_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "smon.toml", "services = []\n");
        let err = AppConfig::load(&[path]).unwrap_err();
        assert!(err.to_string().contains("at least one service"));
    }

    #[test]
    fn rejects_duplicate_services() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "smon.toml",
            "services = [\"a.service\", \"a.service\"]\n",
        );
        let err = AppConfig::load(&[path]).unwrap_err();
        assert!(err.to_string().contains("duplicate service"));
    }

    #[test]
    fn defaults_cover_optional_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "smon.toml", "services = [\"a.service\"]\n");
        let config = AppConfig::load(&[path]).unwrap();
        assert!(config.metrics.enabled);
        assert_eq!(config.bus.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.shutdown.timeout(), Duration::from_secs(5));
        assert_eq!(
            config.persistence.path,
            PathBuf::from("target/state/service_states.json")
        );
    }
}
