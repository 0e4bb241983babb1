//! ---
//! smon_section: "01-core-functionality"
//! smon_subsection: "module"
//! smon_type: "source"
//! smon_scope: "code"
//! smon_description: "Primary monitoring engine and lifecycle management."
//! smon_version: "v0.1.0"
//! smon_owner: "tbd"
//! ---
//! Lifecycle controller. Startup order is load snapshot -> subscribe ->
//! baseline poll; steady state is one dispatcher routing bus notifications
//! to per-unit worker tasks; shutdown drains in-flight events, stops the
//! subscriptions, and forces a final flush. Every step is bounded by the
//! configured timeout so a hung bus cannot block process exit.
//!
//! Per-unit ordering: the dispatcher routes notifications for one unit
//! into that unit's FIFO queue, and a single worker consumes the queue, so
//! notifications for the same unit are never reordered or processed
//! concurrently. Units are independent of each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use s_mon_bus::{ChangeNotification, NotificationBus};
use s_mon_common::AppConfig;
use s_mon_metrics::MonitorMetrics;
use s_mon_persistence::{merge_with_monitored, SnapshotStore};

use crate::engine::TransitionEngine;
use crate::subscription::SubscriptionManager;

const DISPATCH_QUEUE_DEPTH: usize = 256;
const WORKER_QUEUE_DEPTH: usize = 64;

/// Top-level monitor: wires persistence, engine, and subscriptions over a
/// notification bus.
pub struct ServiceMonitor {
    config: AppConfig,
    bus: Arc<dyn NotificationBus>,
    metrics: Option<MonitorMetrics>,
}

impl ServiceMonitor {
    pub fn new(
        config: AppConfig,
        bus: Arc<dyn NotificationBus>,
        metrics: Option<MonitorMetrics>,
    ) -> Self {
        Self {
            config,
            bus,
            metrics,
        }
    }

    /// Run the startup sequence and hand back a lifecycle handle.
    ///
    /// Fails only when the bus itself is unreachable; individual units
    /// degrade per the subscription manager's policy.
    pub async fn start(self) -> Result<MonitorHandle> {
        let store = SnapshotStore::new(self.config.persistence.path.clone());
        let mut snapshot = store.load();
        merge_with_monitored(&mut snapshot, &self.config.services);
        let engine = Arc::new(TransitionEngine::new(snapshot, store, self.metrics));

        let (events_tx, events_rx) = mpsc::channel::<ChangeNotification>(DISPATCH_QUEUE_DEPTH);

        let subscriptions = Arc::new(SubscriptionManager::new(self.bus.clone(), engine.clone()));
        subscriptions
            .start(&self.config.services, events_tx.clone())
            .await
            .context("failed to attach to the notification bus")?;

        // One worker per unit, keyed by name. The name is captured by
        // value at spawn time; the worker owns its queue's receive side.
        let mut workers = Vec::with_capacity(self.config.services.len());
        let mut routes: HashMap<String, mpsc::Sender<ChangeNotification>> = HashMap::new();
        for name in &self.config.services {
            let (unit_tx, unit_rx) = mpsc::channel::<ChangeNotification>(WORKER_QUEUE_DEPTH);
            routes.insert(name.clone(), unit_tx);
            workers.push(spawn_worker(name.clone(), unit_rx, engine.clone()));
        }

        let dispatcher = tokio::spawn(dispatch_loop(events_rx, routes));

        info!(
            units = self.config.services.len(),
            "monitor running; waiting for notifications"
        );

        Ok(MonitorHandle {
            engine,
            subscriptions,
            events_tx: Some(events_tx),
            dispatcher,
            workers,
            shutdown_timeout: self.config.shutdown.timeout(),
        })
    }
}

/// Route notifications from the single bus intake to per-unit queues.
async fn dispatch_loop(
    mut events_rx: mpsc::Receiver<ChangeNotification>,
    routes: HashMap<String, mpsc::Sender<ChangeNotification>>,
) {
    while let Some(notification) = events_rx.recv().await {
        match routes.get(&notification.unit) {
            Some(route) => {
                let unit = notification.unit.clone();
                if route.send(notification).await.is_err() {
                    debug!(unit = %unit, "worker queue closed; dropping notification");
                }
            }
            None => {
                debug!(unit = %notification.unit, "dropping notification for unmonitored unit");
            }
        }
    }
    debug!("dispatcher stopped");
}

/// Sequential consumer for one unit's notifications. A failure in one
/// notification must not take down the worker, so the handler is isolated
/// at this boundary and the offending payload is logged and dropped.
fn spawn_worker(
    unit: String,
    mut queue: mpsc::Receiver<ChangeNotification>,
    engine: Arc<TransitionEngine>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notification) = queue.recv().await {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                engine.handle(&notification)
            }));
            if outcome.is_err() {
                error!(
                    unit = %unit,
                    payload = ?notification.changed,
                    "notification handler failed; dropping notification"
                );
            }
        }
        debug!(unit = %unit, "worker stopped");
    })
}

/// Lifecycle handle for a running monitor.
pub struct MonitorHandle {
    engine: Arc<TransitionEngine>,
    subscriptions: Arc<SubscriptionManager>,
    events_tx: Option<mpsc::Sender<ChangeNotification>>,
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl MonitorHandle {
    /// Engine accessor for introspection and tests.
    pub fn engine(&self) -> Arc<TransitionEngine> {
        self.engine.clone()
    }

    /// Inject a notification as if the bus had delivered it. Used by
    /// simulation drivers and tests.
    pub async fn deliver(&self, notification: ChangeNotification) -> Result<()> {
        let sender = self
            .events_tx
            .as_ref()
            .context("monitor intake already closed")?;
        sender
            .send(notification)
            .await
            .map_err(|_| anyhow::anyhow!("monitor intake closed"))
    }

    /// Graceful shutdown: stop subscriptions, drain queued notifications,
    /// and force a final state flush. Each phase is bounded by the
    /// configured timeout; on expiry the phase is abandoned with a warning
    /// so the process can still exit.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("monitor stopping");

        if tokio::time::timeout(self.shutdown_timeout, self.subscriptions.stop())
            .await
            .is_err()
        {
            warn!("timed out unsubscribing from the bus; proceeding with shutdown");
        }

        // Closing the intake ends the dispatcher once queued events are
        // routed; the dispatcher's exit closes the worker queues in turn.
        self.events_tx.take();

        if tokio::time::timeout(self.shutdown_timeout, self.dispatcher)
            .await
            .is_err()
        {
            warn!("timed out draining the dispatcher");
        }
        for worker in self.workers {
            if tokio::time::timeout(self.shutdown_timeout, worker)
                .await
                .is_err()
            {
                warn!("timed out draining a unit worker");
            }
        }

        match self.engine.flush() {
            Ok(()) => info!("final state flush complete"),
            Err(err) => error!(error = %err, "final state flush failed"),
        }

        info!("monitor stopped");
        Ok(())
    }
}
