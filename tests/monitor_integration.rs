//! ---
//! smon_section: "15-testing-qa-runbook"
//! smon_subsection: "integration-test"
//! smon_type: "source"
//! smon_scope: "test"
//! smon_description: "End-to-end monitor scenarios over the in-memory bus."
//! smon_version: "v0.1.0"
//! smon_owner: "tbd"
//! ---
//! End-to-end scenarios: a full monitor (snapshot store, engine,
//! subscriptions, dispatcher) driven through the in-memory bus.

use std::path::Path;
use std::sync::Arc;

use s_mon_bus::types::{
    UnitProperties, UnitState, PROP_EXEC_MAIN_CODE, PROP_EXEC_MAIN_STATUS,
};
use s_mon_bus::{ChangeNotification, MemoryBus};
use s_mon_common::AppConfig;
use s_mon_core::{MonitorHandle, ServiceMonitor};
use s_mon_persistence::SnapshotStore;

fn test_config(snapshot_path: &Path, services: &[&str]) -> AppConfig {
    let toml = format!(
        "services = [{}]\n[persistence]\npath = {:?}\n",
        services
            .iter()
            .map(|s| format!("{:?}", s))
            .collect::<Vec<_>>()
            .join(", "),
        snapshot_path
    );
    toml::from_str(&toml).expect("valid test config")
}

async fn start_monitor(
    snapshot_path: &Path,
    services: &[&str],
    initial: UnitState,
    initial_sub: &str,
) -> (Arc<MemoryBus>, MonitorHandle) {
    let bus = Arc::new(MemoryBus::new());
    for service in services {
        bus.set_unit(service, UnitProperties::new(initial, initial_sub));
    }
    let handle = ServiceMonitor::new(test_config(snapshot_path, services), bus.clone(), None)
        .start()
        .await
        .expect("monitor starts");
    (bus, handle)
}

#[tokio::test]
async fn fresh_start_counts_first_witnessed_start() {
    // Scenario A: no snapshot file, baseline inactive, then one
    // inactive -> active notification.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let (bus, handle) = start_monitor(&path, &["demo.service"], UnitState::Inactive, "dead").await;

    bus.push_state("demo.service", UnitState::Active, "running")
        .await;

    let engine = handle.engine();
    handle.shutdown().await.unwrap();

    let record = engine.record("demo.service").unwrap();
    assert_eq!(record.starts, 1);
    assert_eq!(record.stops, 0);
    assert_eq!(record.crashes, 0);
    assert_eq!(record.last_state, Some(UnitState::Active));
}

#[tokio::test]
async fn crash_with_exit_detail_counts_crash_only() {
    // Scenario B: start, then active -> failed with a kill signal.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let (bus, handle) = start_monitor(&path, &["demo.service"], UnitState::Inactive, "dead").await;

    bus.push_state("demo.service", UnitState::Active, "running")
        .await;
    bus.push_change(
        ChangeNotification::state_change("demo.service", UnitState::Failed, "failed")
            .with_int(PROP_EXEC_MAIN_STATUS, 9)
            .with_int(PROP_EXEC_MAIN_CODE, 2),
    )
    .await;

    let engine = handle.engine();
    handle.shutdown().await.unwrap();

    let record = engine.record("demo.service").unwrap();
    assert_eq!(record.starts, 1);
    assert_eq!(record.crashes, 1);
    assert_eq!(record.stops, 0);
    assert_eq!(record.last_state, Some(UnitState::Failed));
}

#[tokio::test]
async fn recovered_counters_continue_across_restart() {
    // Scenario C: a snapshot from a previous run is recovered before the
    // first notification, so the stop counter continues rather than
    // restarting.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(
        &path,
        br#"{
  "demo.service": {
    "last_state": "active",
    "last_change_time": "2026-01-05 10:00:00",
    "starts": 2,
    "stops": 1,
    "crashes": 0,
    "logged_unloaded": false
  }
}"#,
    )
    .unwrap();

    let (bus, handle) = start_monitor(&path, &["demo.service"], UnitState::Active, "running").await;
    bus.push_state("demo.service", UnitState::Inactive, "dead")
        .await;

    let engine = handle.engine();
    handle.shutdown().await.unwrap();

    let record = engine.record("demo.service").unwrap();
    assert_eq!(record.stops, 2);
    assert_eq!(record.starts, 2);

    // The persisted file agrees with memory.
    let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(raw["demo.service"]["stops"], 2);
    assert_eq!(raw["demo.service"]["last_state"], "inactive");
}

#[tokio::test]
async fn clearing_history_resets_all_counters() {
    // Scenario D: after a --clear-equivalent removal of the snapshot, a
    // fresh start shows zeroed counters for every configured service.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    {
        let (bus, handle) =
            start_monitor(&path, &["a.service", "b.service"], UnitState::Inactive, "dead").await;
        bus.push_state("a.service", UnitState::Active, "running")
            .await;
        bus.push_state("b.service", UnitState::Active, "running")
            .await;
        handle.shutdown().await.unwrap();
        assert!(path.exists());
    }

    SnapshotStore::new(path.clone()).clear().unwrap();

    let (_bus, handle) =
        start_monitor(&path, &["a.service", "b.service"], UnitState::Inactive, "dead").await;
    let engine = handle.engine();
    handle.shutdown().await.unwrap();

    for service in ["a.service", "b.service"] {
        let record = engine.record(service).unwrap();
        assert_eq!(record.starts, 0);
        assert_eq!(record.stops, 0);
        assert_eq!(record.crashes, 0);
    }
}

#[tokio::test]
async fn baseline_disagreement_does_not_count() {
    // The recovered snapshot says active, the baseline poll says
    // inactive: the record is reconciled without counting a stop.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(
        &path,
        br#"{"demo.service": {"last_state": "active", "starts": 4, "stops": 3,
            "crashes": 1, "logged_unloaded": false}}"#,
    )
    .unwrap();

    let (_bus, handle) =
        start_monitor(&path, &["demo.service"], UnitState::Inactive, "dead").await;
    let engine = handle.engine();
    handle.shutdown().await.unwrap();

    let record = engine.record("demo.service").unwrap();
    assert_eq!(record.stops, 3);
    assert_eq!(record.starts, 4);
    assert_eq!(record.last_state, Some(UnitState::Inactive));
}

#[tokio::test]
async fn restart_cycle_counts_stop_and_start_in_one_observation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let (bus, handle) = start_monitor(&path, &["demo.service"], UnitState::Active, "running").await;

    bus.push_state("demo.service", UnitState::Activating, "auto-restart")
        .await;
    bus.push_state("demo.service", UnitState::Active, "running")
        .await;

    let engine = handle.engine();
    handle.shutdown().await.unwrap();

    let record = engine.record("demo.service").unwrap();
    assert_eq!(record.starts, 1);
    assert_eq!(record.stops, 1);
    assert_eq!(record.crashes, 0);
    assert_eq!(record.last_state, Some(UnitState::Active));
}

#[tokio::test]
async fn absent_unit_degrades_without_blocking_others() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    // Only one of the two configured units exists on the bus.
    let bus = Arc::new(MemoryBus::new());
    bus.set_unit(
        "present.service",
        UnitProperties::new(UnitState::Inactive, "dead"),
    );
    let handle = ServiceMonitor::new(
        test_config(&path, &["ghost.service", "present.service"]),
        bus.clone(),
        None,
    )
    .start()
    .await
    .expect("one bad unit must not abort startup");

    bus.push_state("present.service", UnitState::Active, "running")
        .await;

    let engine = handle.engine();
    handle.shutdown().await.unwrap();

    assert_eq!(engine.record("present.service").unwrap().starts, 1);
    let ghost = engine.record("ghost.service").unwrap();
    assert_eq!(ghost.last_state, Some(UnitState::Unloaded));
    assert!(ghost.logged_unloaded);
    assert_eq!(ghost.starts, 0);
}
