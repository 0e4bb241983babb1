//! ---
//! smon_section: "01-core-functionality"
//! smon_subsection: "module"
//! smon_type: "source"
//! smon_scope: "code"
//! smon_description: "Shared primitives and utilities for the monitor runtime."
//! smon_version: "v0.1.0"
//! smon_owner: "tbd"
//! ---
//! Core shared primitives for the S-MON workspace.
//! This crate exposes configuration loading, logging bootstrap, and
//! host/time utilities consumed across the workspace.

pub mod config;
pub mod host;
pub mod logging;
pub mod time;

pub use config::{
    AppConfig, BusConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, Mode, PersistenceConfig,
    ShutdownConfig, SimulationConfig,
};
pub use host::machine_id;
pub use logging::{init_tracing, LogFormat};
pub use time::{format_wall_time, usec_to_wall_time};
