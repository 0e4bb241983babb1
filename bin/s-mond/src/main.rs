//! ---
//! smon_section: "01-core-functionality"
//! smon_subsection: "binary"
//! smon_type: "source"
//! smon_scope: "code"
//! smon_description: "Binary entrypoint for the S-MON daemon."
//! smon_version: "v0.1.0"
//! smon_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use s_mon_bus::{MemoryBus, NotificationBus, SystemctlBus, UnitProperties, UnitState};
use s_mon_common::{init_tracing, machine_id, AppConfig, Mode};
use s_mon_core::ServiceMonitor;
use s_mon_metrics::{new_registry, spawn_http_server, MonitorMetrics};
use s_mon_persistence::SnapshotStore;
use tokio::signal;
use tracing::{info, warn};

mod sim;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "S-MON service monitoring daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        value_name = "UNIT",
        value_delimiter = ',',
        help = "Override the monitored service list"
    )]
    services: Vec<String>,

    #[arg(long, value_enum, help = "Override application mode")]
    mode: Option<CliMode>,

    #[arg(
        short = 'c',
        long,
        help = "Delete the persistence file and log files before starting"
    )]
    clear: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMode {
    Production,
    Simulation,
}

impl From<CliMode> for Mode {
    fn from(value: CliMode) -> Self {
        match value {
            CliMode::Production => Mode::Production,
            CliMode::Simulation => Mode::Simulation,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/example.prod.toml"));
    candidates.push(PathBuf::from("configs/example.dev.toml"));

    let mut config = match AppConfig::load_with_source(&candidates) {
        Ok(loaded) => loaded.config,
        Err(err) if !cli.services.is_empty() => {
            // A bare service list is enough to run with defaults.
            eprintln!("running on defaults ({err:#})");
            AppConfig::with_services(cli.services.clone())
        }
        Err(err) => return Err(err),
    };

    if !cli.services.is_empty() {
        config.services = cli.services.clone();
    }
    if let Some(mode) = cli.mode {
        config.mode = mode.into();
    }
    config.validate()?;

    if cli.clear {
        clear_history(&config)?;
    }

    init_tracing("s-mond", &config.logging)?;
    info!(
        machine_id = %machine_id(),
        mode = ?config.mode,
        units = config.services.len(),
        "s-mond starting"
    );

    let (metrics, metrics_server) = if config.metrics.enabled {
        let registry = new_registry();
        let metrics = MonitorMetrics::new(registry.clone())?;
        metrics.set_monitor_info(
            env!("CARGO_PKG_VERSION"),
            &machine_id(),
            config.services.len(),
        );
        let server = spawn_http_server(registry, config.metrics.listen)?;
        info!(address = %server.addr(), "metrics exporter enabled");
        (Some(metrics), Some(server))
    } else {
        info!("metrics exporter disabled by configuration");
        (None, None)
    };

    let mut sim_driver = None;
    let bus: Arc<dyn NotificationBus> = match config.mode {
        Mode::Production => Arc::new(SystemctlBus::new(
            config.bus.poll_interval(),
            config.bus.command_timeout(),
        )),
        Mode::Simulation => {
            let bus = Arc::new(MemoryBus::new());
            for service in &config.services {
                bus.set_unit(service, UnitProperties::new(UnitState::Inactive, "dead"));
            }
            sim_driver = Some(sim::spawn_driver(
                bus.clone(),
                config.services.clone(),
                config.simulation.clone(),
            ));
            bus
        }
    };

    let handle = ServiceMonitor::new(config, bus, metrics)
        .start()
        .await
        .context("monitor startup failed")?;

    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    if let Some(driver) = sim_driver {
        driver.abort();
    }
    handle.shutdown().await?;

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }

    Ok(())
}

/// `--clear`: drop the persistence file and any log files so all counters
/// restart from zero.
fn clear_history(config: &AppConfig) -> Result<()> {
    let store = SnapshotStore::new(config.persistence.path.clone());
    store
        .clear()
        .with_context(|| format!("failed to remove {}", store.path().display()))?;
    eprintln!("cleared persistence file: {}", store.path().display());

    let prefix = config
        .logging
        .file_prefix
        .clone()
        .unwrap_or_else(|| "s-mond".to_owned());
    if let Ok(entries) = std::fs::read_dir(&config.logging.directory) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&prefix) {
                if let Err(err) = std::fs::remove_file(entry.path()) {
                    warn!(file = %entry.path().display(), error = %err, "could not remove log file");
                } else {
                    eprintln!("cleared log file: {}", entry.path().display());
                }
            }
        }
    }
    Ok(())
}
