//! ---
//! smon_section: "03-persistence-logging"
//! smon_subsection: "module"
//! smon_type: "source"
//! smon_scope: "code"
//! smon_description: "Metrics collection and export utilities."
//! smon_version: "v0.1.0"
//! smon_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    GaugeVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder, TEXT_FORMAT,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the workspace.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint. Returns `text/plain` metrics even on large registries.
async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(TEXT_FORMAT),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("metrics encoding error"),
            )
                .into_response()
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Per-unit monitoring metrics plus monitor metadata.
///
/// The state gauge uses the numeric encoding scrapers already depend on:
/// 1=active, 0=inactive, 2=activating, 3=deactivating, -1=failed,
/// -2=unloaded.
#[derive(Clone)]
pub struct MonitorMetrics {
    registry: SharedRegistry,
    unit_state: IntGaugeVec,
    starts_total: IntCounterVec,
    stops_total: IntCounterVec,
    crashes_total: IntCounterVec,
    restarts_total: IntCounterVec,
    last_change_timestamp: IntGaugeVec,
    units_total: IntGauge,
    build_info: GaugeVec,
}

impl MonitorMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let unit_state = IntGaugeVec::new(
            Opts::new(
                "s_mon_unit_state",
                "Unit state: 1=active, 0=inactive, 2=activating, 3=deactivating, -1=failed, -2=unloaded",
            ),
            &["service"],
        )?;
        registry.register(Box::new(unit_state.clone()))?;

        let starts_total = IntCounterVec::new(
            Opts::new(
                "s_mon_unit_starts_total",
                "Service starts observed since the monitor started",
            ),
            &["service"],
        )?;
        registry.register(Box::new(starts_total.clone()))?;

        let stops_total = IntCounterVec::new(
            Opts::new(
                "s_mon_unit_stops_total",
                "Service stops observed since the monitor started",
            ),
            &["service"],
        )?;
        registry.register(Box::new(stops_total.clone()))?;

        let crashes_total = IntCounterVec::new(
            Opts::new(
                "s_mon_unit_crashes_total",
                "Service crashes (failed state) observed since the monitor started",
            ),
            &["service"],
        )?;
        registry.register(Box::new(crashes_total.clone()))?;

        let restarts_total = IntCounterVec::new(
            Opts::new(
                "s_mon_unit_restarts_total",
                "Service restart cycles observed since the monitor started",
            ),
            &["service"],
        )?;
        registry.register(Box::new(restarts_total.clone()))?;

        let last_change_timestamp = IntGaugeVec::new(
            Opts::new(
                "s_mon_unit_last_change_timestamp_seconds",
                "Unix timestamp of the unit's last observed state change",
            ),
            &["service"],
        )?;
        registry.register(Box::new(last_change_timestamp.clone()))?;

        let units_total = IntGauge::with_opts(Opts::new(
            "s_mon_units_total",
            "Number of service units this monitor instance watches",
        ))?;
        registry.register(Box::new(units_total.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new(
                "s_mon_build_info",
                "Build and host metadata for the running monitor",
            ),
            &["version", "machine_id"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            unit_state,
            starts_total,
            stops_total,
            crashes_total,
            restarts_total,
            last_change_timestamp,
            units_total,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn set_unit_state(&self, service: &str, code: i64) {
        self.unit_state.with_label_values(&[service]).set(code);
    }

    pub fn inc_starts(&self, service: &str) {
        self.starts_total.with_label_values(&[service]).inc();
    }

    pub fn inc_stops(&self, service: &str) {
        self.stops_total.with_label_values(&[service]).inc();
    }

    pub fn inc_crashes(&self, service: &str) {
        self.crashes_total.with_label_values(&[service]).inc();
    }

    pub fn inc_restarts(&self, service: &str) {
        self.restarts_total.with_label_values(&[service]).inc();
    }

    pub fn set_last_change(&self, service: &str, unix_time: i64) {
        self.last_change_timestamp
            .with_label_values(&[service])
            .set(unix_time);
    }

    pub fn set_monitor_info(&self, version: &str, machine_id: &str, unit_count: usize) {
        self.units_total.set(unit_count as i64);
        self.build_info
            .with_label_values(&[version, machine_id])
            .set(1.0);
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_and_updates_metrics() {
        let registry = new_registry();
        let metrics = MonitorMetrics::new(registry.clone()).unwrap();

        metrics.set_monitor_info("0.1.0", "abc123", 3);
        metrics.set_unit_state("demo.service", 1);
        metrics.inc_starts("demo.service");
        metrics.inc_starts("demo.service");
        metrics.inc_crashes("demo.service");
        metrics.set_last_change("demo.service", 1_700_000_000);

        let families = registry.gather();
        let names: Vec<&str> = families.iter().map(|f| f.get_name()).collect();
        assert!(names.contains(&"s_mon_unit_state"));
        assert!(names.contains(&"s_mon_unit_starts_total"));
        assert!(names.contains(&"s_mon_build_info"));

        let starts = families
            .iter()
            .find(|f| f.get_name() == "s_mon_unit_starts_total")
            .unwrap();
        assert_eq!(starts.get_metric()[0].get_counter().get_value() as u64, 2);
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = new_registry();
        let _metrics = MonitorMetrics::new(registry.clone()).unwrap();
        assert!(MonitorMetrics::new(registry).is_err());
    }
}
