//! ---
//! smon_section: "01-core-functionality"
//! smon_subsection: "module"
//! smon_type: "source"
//! smon_scope: "code"
//! smon_description: "Primary monitoring engine and lifecycle management."
//! smon_version: "v0.1.0"
//! smon_owner: "tbd"
//! ---
//! The transition engine owns the in-memory snapshot for the lifetime of
//! the process. Every raw change notification funnels through
//! [`TransitionEngine::handle`], which classifies the transition, applies
//! counters exactly once, emits the log record and metric updates, and
//! persists the snapshot whenever a counter moved. The snapshot and the
//! store sit behind one lock, so concurrent per-unit workers never race on
//! the shared map or the durable file.

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use s_mon_bus::types::{
    ChangeNotification, UnitProperties, UnitState, PROP_EXEC_MAIN_CODE, PROP_EXEC_MAIN_STATUS,
    PROP_STATE_CHANGE_USEC,
};
use s_mon_common::time::{usec_to_wall_time, wall_time_now};
use s_mon_metrics::MonitorMetrics;
use s_mon_persistence::{PersistenceError, ServiceRecord, Snapshot, SnapshotStore};

use crate::classifier::{classify, signal_name, Classification, ExitStatus};

struct EngineInner {
    snapshot: Snapshot,
    store: SnapshotStore,
    metrics: Option<MonitorMetrics>,
}

/// Stateful core of the monitor. See module docs.
pub struct TransitionEngine {
    inner: Mutex<EngineInner>,
}

impl TransitionEngine {
    pub fn new(snapshot: Snapshot, store: SnapshotStore, metrics: Option<MonitorMetrics>) -> Self {
        Self {
            inner: Mutex::new(EngineInner {
                snapshot,
                store,
                metrics,
            }),
        }
    }

    /// Seed a unit's record from the startup baseline poll. Never touches
    /// counters, even when the observed state disagrees with the recovered
    /// snapshot: a baseline readout is not a witnessed transition.
    pub fn seed(&self, unit: &str, properties: &UnitProperties) {
        let mut guard = self.inner.lock();
        let EngineInner {
            snapshot, metrics, ..
        } = &mut *guard;
        let record = snapshot.entry(unit.to_owned()).or_default();
        let previous = record.last_state;
        if previous != Some(properties.active_state) {
            info!(
                unit = %unit,
                from = %previous.map(|s| s.as_str()).unwrap_or("none"),
                to = %properties.active_state,
                sub_state = %properties.sub_state,
                "initial state"
            );
        } else {
            info!(
                unit = %unit,
                state = %properties.active_state,
                sub_state = %properties.sub_state,
                "initial state"
            );
        }
        let change_time = properties
            .state_change_us
            .map(usec_to_wall_time)
            .unwrap_or_else(wall_time_now);
        record.observe(properties.active_state, &properties.sub_state, change_time);

        if let Some(metrics) = metrics {
            metrics.set_unit_state(unit, properties.active_state.metric_code());
            metrics.set_last_change(unit, Utc::now().timestamp());
        }
    }

    /// Record that a unit could not be found or read at startup, logging
    /// the condition only once until the unit is seen loaded again.
    pub fn mark_unloaded(&self, unit: &str) {
        let mut guard = self.inner.lock();
        let EngineInner {
            snapshot, metrics, ..
        } = &mut *guard;
        let record = snapshot.entry(unit.to_owned()).or_default();
        if !record.logged_unloaded {
            warn!(unit = %unit, "unit not loaded or accessible; marking unloaded");
            record.logged_unloaded = true;
        }
        record.last_state = Some(UnitState::Unloaded);
        if let Some(metrics) = metrics {
            metrics.set_unit_state(unit, UnitState::Unloaded.metric_code());
        }
    }

    /// Process one raw change notification. Persistence failures are
    /// logged and swallowed; the notification source must never be blocked
    /// or crashed by a failing flush.
    pub fn handle(&self, notification: &ChangeNotification) {
        let mut guard = self.inner.lock();
        let EngineInner {
            snapshot,
            store,
            metrics,
        } = &mut *guard;
        let record = snapshot.entry(notification.unit.clone()).or_default();

        // The bus only reports properties that changed, so absent
        // properties fall back to the previously known values.
        let previous = record.last_state;
        let new_state = notification
            .active_state()
            .or(previous)
            .unwrap_or(UnitState::Unloaded);
        let sub_state = notification
            .sub_state()
            .map(str::to_owned)
            .or_else(|| record.last_sub_state.clone())
            .unwrap_or_else(|| "unknown".to_owned());
        let exit = ExitStatus::from_exec_main(
            notification
                .int_property(PROP_EXEC_MAIN_STATUS)
                .unwrap_or(0),
            notification.int_property(PROP_EXEC_MAIN_CODE).unwrap_or(0),
        );
        let change_time = notification
            .int_property(PROP_STATE_CHANGE_USEC)
            .map(usec_to_wall_time)
            .unwrap_or_else(wall_time_now);

        let verdict = classify(previous, new_state, exit);

        if verdict == Classification::Duplicate {
            // Sub-state-only changes are debug detail, not transitions.
            if record.last_sub_state.as_deref() != Some(sub_state.as_str()) {
                debug!(
                    unit = %notification.unit,
                    state = %new_state,
                    sub_state = %sub_state,
                    "sub-state changed"
                );
                record.last_sub_state = Some(sub_state);
            }
            return;
        }

        let (d_starts, d_stops, d_crashes) = verdict.counter_deltas();
        record.starts += d_starts;
        record.stops += d_stops;
        record.crashes += d_crashes;

        let unit = notification.unit.as_str();
        let from = previous.map(|s| s.as_str()).unwrap_or("none");
        match verdict {
            Classification::Initial => {
                info!(unit = %unit, state = %new_state, sub_state = %sub_state, "initial state");
            }
            Classification::Started => {
                info!(
                    unit = %unit,
                    from = %from,
                    to = %new_state,
                    starts = record.starts,
                    stops = record.stops,
                    crashes = record.crashes,
                    "service START"
                );
            }
            Classification::Stopped => {
                info!(
                    unit = %unit,
                    from = %from,
                    to = %new_state,
                    starts = record.starts,
                    stops = record.stops,
                    crashes = record.crashes,
                    "service STOP"
                );
            }
            Classification::Crashed => {
                let signal = exit.signal.map(signal_name);
                error!(
                    unit = %unit,
                    from = %from,
                    to = %new_state,
                    sub_state = %sub_state,
                    exit_code = exit.code,
                    signal = %signal.as_deref().unwrap_or("none"),
                    crashes = record.crashes,
                    starts = record.starts,
                    stops = record.stops,
                    "service CRASH"
                );
            }
            Classification::RestartCycle => {
                info!(
                    unit = %unit,
                    from = %from,
                    to = %new_state,
                    starts = record.starts,
                    stops = record.stops,
                    crashes = record.crashes,
                    "service RESTART_CYCLE"
                );
            }
            Classification::QuietDeactivation => {
                info!(unit = %unit, from = %from, to = %new_state, "failure acknowledged");
            }
            Classification::Transitional => {
                info!(unit = %unit, from = %from, to = %new_state, sub_state = %sub_state, "state transition");
            }
            Classification::Unloaded => {
                if !record.logged_unloaded {
                    warn!(unit = %unit, from = %from, "unit unloaded");
                    record.logged_unloaded = true;
                }
            }
            Classification::Duplicate => unreachable!("handled above"),
        }

        record.observe(new_state, &sub_state, change_time);

        if let Some(metrics) = metrics {
            metrics.set_unit_state(unit, new_state.metric_code());
            metrics.set_last_change(unit, Utc::now().timestamp());
            for _ in 0..d_starts {
                metrics.inc_starts(unit);
            }
            for _ in 0..d_stops {
                metrics.inc_stops(unit);
            }
            for _ in 0..d_crashes {
                metrics.inc_crashes(unit);
            }
            if verdict == Classification::RestartCycle {
                metrics.inc_restarts(unit);
            }
        }

        if verdict.changes_counters() {
            if let Err(err) = store.save(snapshot) {
                error!(unit = %unit, error = %err, "failed to persist snapshot; state kept in memory");
            }
        }
    }

    /// Unconditional save, used by the shutdown path.
    pub fn flush(&self) -> Result<(), PersistenceError> {
        let inner = self.inner.lock();
        inner.store.save(&inner.snapshot)
    }

    /// Clone of a unit's record, for inspection and tests.
    pub fn record(&self, unit: &str) -> Option<ServiceRecord> {
        self.inner.lock().snapshot.get(unit).cloned()
    }

    /// Number of units currently tracked.
    pub fn unit_count(&self) -> usize {
        self.inner.lock().snapshot.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s_mon_bus::types::EXEC_CODE_KILLED;

    fn engine_in(dir: &tempfile::TempDir) -> TransitionEngine {
        let store = SnapshotStore::new(dir.path().join("state.json"));
        TransitionEngine::new(Snapshot::new(), store, None)
    }

    fn state_change(unit: &str, state: UnitState, sub: &str) -> ChangeNotification {
        ChangeNotification::state_change(unit, state, sub)
    }

    #[test]
    fn baseline_seeding_never_counts() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        engine.seed(
            "demo.service",
            &UnitProperties::new(UnitState::Active, "running"),
        );
        let record = engine.record("demo.service").unwrap();
        assert_eq!(record.last_state, Some(UnitState::Active));
        assert_eq!(record.total_transitions(), 0);
    }

    #[test]
    fn first_notification_seeds_without_counting() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        engine.handle(&state_change("demo.service", UnitState::Active, "running"));
        let record = engine.record("demo.service").unwrap();
        assert_eq!(record.starts, 0);
        assert_eq!(record.last_state, Some(UnitState::Active));
    }

    #[test]
    fn start_stop_sequence_counts_each_once() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        engine.seed(
            "demo.service",
            &UnitProperties::new(UnitState::Inactive, "dead"),
        );
        engine.handle(&state_change("demo.service", UnitState::Active, "running"));
        engine.handle(&state_change("demo.service", UnitState::Inactive, "dead"));

        let record = engine.record("demo.service").unwrap();
        assert_eq!(record.starts, 1);
        assert_eq!(record.stops, 1);
        assert_eq!(record.crashes, 0);
        assert_eq!(record.last_state, Some(UnitState::Inactive));
    }

    #[test]
    fn crash_does_not_count_as_stop() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        engine.seed(
            "demo.service",
            &UnitProperties::new(UnitState::Active, "running"),
        );
        engine.handle(
            &state_change("demo.service", UnitState::Failed, "failed")
                .with_int(PROP_EXEC_MAIN_STATUS, 1)
                .with_int(PROP_EXEC_MAIN_CODE, 1),
        );

        let record = engine.record("demo.service").unwrap();
        assert_eq!(record.crashes, 1);
        assert_eq!(record.stops, 0);

        // Manager acknowledgement afterwards stays quiet.
        engine.handle(&state_change("demo.service", UnitState::Inactive, "dead"));
        let record = engine.record("demo.service").unwrap();
        assert_eq!(record.crashes, 1);
        assert_eq!(record.stops, 0);
        assert_eq!(record.last_state, Some(UnitState::Inactive));
    }

    #[test]
    fn duplicate_notification_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        engine.seed(
            "demo.service",
            &UnitProperties::new(UnitState::Active, "running"),
        );
        let before = engine.record("demo.service").unwrap();
        engine.handle(&state_change("demo.service", UnitState::Active, "running"));
        let after = engine.record("demo.service").unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn sub_state_only_change_updates_detail_without_counting() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        engine.seed(
            "demo.service",
            &UnitProperties::new(UnitState::Active, "running"),
        );
        engine.handle(&state_change("demo.service", UnitState::Active, "exited"));
        let record = engine.record("demo.service").unwrap();
        assert_eq!(record.last_sub_state.as_deref(), Some("exited"));
        assert_eq!(record.total_transitions(), 0);
    }

    #[test]
    fn counters_persist_and_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let engine =
                TransitionEngine::new(Snapshot::new(), SnapshotStore::new(path.clone()), None);
            engine.seed(
                "demo.service",
                &UnitProperties::new(UnitState::Inactive, "dead"),
            );
            engine.handle(&state_change("demo.service", UnitState::Active, "running"));
        }

        // A new engine over the same store sees the persisted counter.
        let store = SnapshotStore::new(path);
        let snapshot = store.load();
        assert_eq!(snapshot["demo.service"].starts, 1);

        let engine = TransitionEngine::new(snapshot, store, None);
        engine.handle(&state_change("demo.service", UnitState::Inactive, "dead"));
        assert_eq!(engine.record("demo.service").unwrap().stops, 1);
        assert_eq!(engine.record("demo.service").unwrap().starts, 1);
    }

    #[test]
    fn notification_without_active_state_keeps_previous() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        engine.seed(
            "demo.service",
            &UnitProperties::new(UnitState::Active, "running"),
        );
        // Exit detail alone, no ActiveState: falls back to known state,
        // classifies as duplicate, counts nothing.
        engine.handle(
            &ChangeNotification::new("demo.service").with_int(PROP_EXEC_MAIN_STATUS, 1),
        );
        let record = engine.record("demo.service").unwrap();
        assert_eq!(record.total_transitions(), 0);
        assert_eq!(record.last_state, Some(UnitState::Active));
    }

    #[test]
    fn kill_signal_is_recorded_as_crash() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        engine.seed(
            "demo.service",
            &UnitProperties::new(UnitState::Active, "running"),
        );
        engine.handle(
            &state_change("demo.service", UnitState::Inactive, "dead")
                .with_int(PROP_EXEC_MAIN_STATUS, 9)
                .with_int(PROP_EXEC_MAIN_CODE, EXEC_CODE_KILLED),
        );
        let record = engine.record("demo.service").unwrap();
        assert_eq!(record.crashes, 1);
        assert_eq!(record.stops, 0);
    }

    #[test]
    fn restart_cycle_counts_both_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        engine.seed(
            "demo.service",
            &UnitProperties::new(UnitState::Active, "running"),
        );
        engine.handle(&state_change(
            "demo.service",
            UnitState::Activating,
            "auto-restart",
        ));
        let record = engine.record("demo.service").unwrap();
        assert_eq!(record.starts, 1);
        assert_eq!(record.stops, 1);
        assert_eq!(record.crashes, 0);
    }

    #[test]
    fn unloaded_guard_logs_once_and_resets_on_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(&dir);

        engine.mark_unloaded("ghost.service");
        let record = engine.record("ghost.service").unwrap();
        assert!(record.logged_unloaded);
        assert_eq!(record.last_state, Some(UnitState::Unloaded));

        // Marking again stays guarded.
        engine.mark_unloaded("ghost.service");
        assert!(engine.record("ghost.service").unwrap().logged_unloaded);

        // Seen loaded again: guard clears, and the arrival counts a start.
        engine.handle(&state_change("ghost.service", UnitState::Active, "running"));
        let record = engine.record("ghost.service").unwrap();
        assert!(!record.logged_unloaded);
        assert_eq!(record.starts, 1);
    }

    #[test]
    fn save_failure_keeps_memory_state() {
        let dir = tempfile::tempdir().unwrap();
        // A directory at the snapshot path makes every save fail.
        let path = dir.path().join("occupied");
        std::fs::create_dir_all(&path).unwrap();
        let engine = TransitionEngine::new(Snapshot::new(), SnapshotStore::new(path), None);

        engine.seed(
            "demo.service",
            &UnitProperties::new(UnitState::Inactive, "dead"),
        );
        engine.handle(&state_change("demo.service", UnitState::Active, "running"));
        // The flush failed, but the counter advanced in memory.
        assert_eq!(engine.record("demo.service").unwrap().starts, 1);
        assert!(engine.flush().is_err());
    }

    #[test]
    fn flush_saves_even_without_counter_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let engine = TransitionEngine::new(Snapshot::new(), SnapshotStore::new(path.clone()), None);
        engine.seed(
            "demo.service",
            &UnitProperties::new(UnitState::Inactive, "dead"),
        );
        assert!(!path.exists());
        engine.flush().unwrap();
        assert!(path.exists());
    }
}
