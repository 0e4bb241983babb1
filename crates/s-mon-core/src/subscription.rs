//! ---
//! smon_section: "01-core-functionality"
//! smon_subsection: "module"
//! smon_type: "source"
//! smon_scope: "code"
//! smon_description: "Primary monitoring engine and lifecycle management."
//! smon_version: "v0.1.0"
//! smon_owner: "tbd"
//! ---
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

use s_mon_bus::{BusError, ChangeNotification, NotificationBus, SubscriptionToken};

use crate::engine::TransitionEngine;

/// Owns the set of monitored units and their bus subscriptions.
///
/// One unresolvable unit must not abort monitoring of the rest, so every
/// per-unit failure in `start` is logged and skipped. Only the
/// manager-level subscription is allowed to fail the whole startup.
pub struct SubscriptionManager {
    bus: Arc<dyn NotificationBus>,
    engine: Arc<TransitionEngine>,
    tokens: Mutex<Vec<SubscriptionToken>>,
}

impl SubscriptionManager {
    pub fn new(bus: Arc<dyn NotificationBus>, engine: Arc<TransitionEngine>) -> Self {
        Self {
            bus,
            engine,
            tokens: Mutex::new(Vec::new()),
        }
    }

    /// Establish monitoring for every named unit: resolve it, seed the
    /// engine from a baseline property read, then register for change
    /// notifications delivered into `sink`.
    pub async fn start(
        &self,
        services: &[String],
        sink: mpsc::Sender<ChangeNotification>,
    ) -> Result<(), BusError> {
        self.bus.subscribe_manager().await?;
        info!("subscribed to service manager notifications");

        for name in services {
            let unit = match self.bus.resolve_unit(name).await {
                Ok(unit) => unit,
                Err(err) => {
                    warn!(unit = %name, error = %err, "could not resolve unit; skipping");
                    self.engine.mark_unloaded(name);
                    continue;
                }
            };

            match self.bus.unit_properties(&unit).await {
                Ok(properties) => self.engine.seed(name, &properties),
                Err(err) => {
                    warn!(unit = %name, error = %err, "baseline read failed");
                    self.engine.mark_unloaded(name);
                }
            }

            match self.bus.subscribe_unit(&unit, sink.clone()).await {
                Ok(token) => {
                    info!(unit = %name, "subscribed to unit notifications");
                    self.tokens.lock().push(token);
                }
                Err(err) => {
                    warn!(unit = %name, error = %err, "could not subscribe to unit");
                }
            }
        }
        Ok(())
    }

    /// Best-effort teardown of everything `start` registered.
    pub async fn stop(&self) {
        let tokens: Vec<SubscriptionToken> = self.tokens.lock().drain(..).collect();
        for token in tokens {
            let unit = token.unit.clone();
            if let Err(err) = self.bus.unsubscribe_unit(token).await {
                warn!(unit = %unit, error = %err, "failed to unsubscribe unit");
            }
        }
        if let Err(err) = self.bus.unsubscribe_manager().await {
            warn!(error = %err, "failed to unsubscribe from service manager");
        } else {
            info!("unsubscribed from service manager notifications");
        }
    }

    /// Number of live unit subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.tokens.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s_mon_bus::types::{UnitProperties, UnitState};
    use s_mon_bus::MemoryBus;
    use s_mon_persistence::{Snapshot, SnapshotStore};

    fn engine_in(dir: &tempfile::TempDir) -> Arc<TransitionEngine> {
        Arc::new(TransitionEngine::new(
            Snapshot::new(),
            SnapshotStore::new(dir.path().join("state.json")),
            None,
        ))
    }

    #[tokio::test]
    async fn missing_unit_does_not_abort_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);
        let bus = Arc::new(MemoryBus::new());
        bus.set_unit(
            "present.service",
            UnitProperties::new(UnitState::Active, "running"),
        );

        let manager = SubscriptionManager::new(bus.clone(), engine.clone());
        let (tx, _rx) = mpsc::channel(8);
        manager
            .start(
                &["ghost.service".to_owned(), "present.service".to_owned()],
                tx,
            )
            .await
            .unwrap();

        assert_eq!(manager.subscription_count(), 1);
        // The present unit was seeded from its baseline without counting.
        let record = engine.record("present.service").unwrap();
        assert_eq!(record.last_state, Some(UnitState::Active));
        assert_eq!(record.total_transitions(), 0);
        // The missing unit is marked unloaded, guarded against log spam.
        let ghost = engine.record("ghost.service").unwrap();
        assert_eq!(ghost.last_state, Some(UnitState::Unloaded));
        assert!(ghost.logged_unloaded);
    }

    #[tokio::test]
    async fn stop_unsubscribes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);
        let bus = Arc::new(MemoryBus::new());
        bus.set_unit(
            "demo.service",
            UnitProperties::new(UnitState::Inactive, "dead"),
        );

        let manager = SubscriptionManager::new(bus.clone(), engine);
        let (tx, mut rx) = mpsc::channel(8);
        manager
            .start(&["demo.service".to_owned()], tx)
            .await
            .unwrap();
        assert!(bus.manager_subscribed());
        assert_eq!(manager.subscription_count(), 1);

        manager.stop().await;
        assert!(!bus.manager_subscribed());
        assert_eq!(manager.subscription_count(), 0);

        // Changes after stop are no longer delivered.
        bus.push_state("demo.service", UnitState::Active, "running")
            .await;
        assert!(rx.recv().await.is_none());
    }
}
