//! ---
//! smon_section: "02-bus-adapters"
//! smon_subsection: "module"
//! smon_type: "source"
//! smon_scope: "code"
//! smon_description: "Notification-bus contract and adapters."
//! smon_version: "v0.1.0"
//! smon_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Property names carried by unit change notifications.
pub const PROP_ACTIVE_STATE: &str = "ActiveState";
pub const PROP_SUB_STATE: &str = "SubState";
pub const PROP_EXEC_MAIN_STATUS: &str = "ExecMainStatus";
pub const PROP_EXEC_MAIN_CODE: &str = "ExecMainCode";
pub const PROP_STATE_CHANGE_USEC: &str = "StateChangeTimestamp";

/// Interface name stamped on unit change notifications.
pub const UNIT_INTERFACE: &str = "org.freedesktop.systemd1.Unit";

/// `ExecMainCode` values indicating how the main process ended.
pub const EXEC_CODE_EXITED: i64 = 1;
pub const EXEC_CODE_KILLED: i64 = 2;
pub const EXEC_CODE_DUMPED: i64 = 3;

/// Primary state of a service unit.
///
/// The service manager reports more states than the monitor distinguishes;
/// every unrecognized value deliberately collapses to `Unloaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UnitState {
    #[default]
    Unloaded,
    Inactive,
    Activating,
    Active,
    Deactivating,
    Failed,
}

impl UnitState {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "inactive" => UnitState::Inactive,
            "activating" => UnitState::Activating,
            "active" => UnitState::Active,
            "deactivating" => UnitState::Deactivating,
            "failed" => UnitState::Failed,
            _ => UnitState::Unloaded,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitState::Unloaded => "unloaded",
            UnitState::Inactive => "inactive",
            UnitState::Activating => "activating",
            UnitState::Active => "active",
            UnitState::Deactivating => "deactivating",
            UnitState::Failed => "failed",
        }
    }

    /// Numeric encoding for the state gauge.
    pub fn metric_code(&self) -> i64 {
        match self {
            UnitState::Active => 1,
            UnitState::Inactive => 0,
            UnitState::Activating => 2,
            UnitState::Deactivating => 3,
            UnitState::Failed => -1,
            UnitState::Unloaded => -2,
        }
    }

    /// True for states in which the unit is loaded into the service manager.
    pub fn is_loaded(&self) -> bool {
        !matches!(self, UnitState::Unloaded)
    }

    /// States from which an arrival into `Active`/`Activating` counts as a start.
    pub fn is_stopped_like(&self) -> bool {
        matches!(
            self,
            UnitState::Unloaded | UnitState::Inactive | UnitState::Failed
        )
    }

    /// States from which an arrival into a stopped-like state counts as a stop.
    pub fn is_running_like(&self) -> bool {
        matches!(
            self,
            UnitState::Activating | UnitState::Active | UnitState::Deactivating
        )
    }
}

impl From<String> for UnitState {
    fn from(raw: String) -> Self {
        UnitState::parse(&raw)
    }
}

impl From<UnitState> for String {
    fn from(state: UnitState) -> Self {
        state.as_str().to_owned()
    }
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time property readout for one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitProperties {
    pub active_state: UnitState,
    pub sub_state: String,
    pub exec_main_status: i64,
    pub exec_main_code: i64,
    /// Wall-clock microseconds of the last state change, when the
    /// transport reports one.
    pub state_change_us: Option<i64>,
}

impl UnitProperties {
    pub fn new(active_state: UnitState, sub_state: impl Into<String>) -> Self {
        Self {
            active_state,
            sub_state: sub_state.into(),
            exec_main_status: 0,
            exec_main_code: 0,
            state_change_us: None,
        }
    }
}

/// Value of a changed property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Str(String),
    Int(i64),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(value) => Some(value),
            PropertyValue::Int(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(value) => Some(*value),
            PropertyValue::Str(_) => None,
        }
    }
}

/// One changed-properties notification for one unit.
///
/// The map holds only the properties that actually changed; consumers fall
/// back to previously known values for everything absent.
#[derive(Debug, Clone)]
pub struct ChangeNotification {
    pub unit: String,
    pub interface: String,
    pub changed: BTreeMap<String, PropertyValue>,
    pub invalidated: Vec<String>,
}

impl ChangeNotification {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            interface: UNIT_INTERFACE.to_owned(),
            changed: BTreeMap::new(),
            invalidated: Vec::new(),
        }
    }

    pub fn with_str(mut self, name: &str, value: impl Into<String>) -> Self {
        self.changed
            .insert(name.to_owned(), PropertyValue::Str(value.into()));
        self
    }

    pub fn with_int(mut self, name: &str, value: i64) -> Self {
        self.changed
            .insert(name.to_owned(), PropertyValue::Int(value));
        self
    }

    /// Convenience constructor for a plain state transition.
    pub fn state_change(unit: impl Into<String>, state: UnitState, sub_state: &str) -> Self {
        Self::new(unit)
            .with_str(PROP_ACTIVE_STATE, state.as_str())
            .with_str(PROP_SUB_STATE, sub_state)
    }

    pub fn active_state(&self) -> Option<UnitState> {
        self.changed
            .get(PROP_ACTIVE_STATE)
            .and_then(PropertyValue::as_str)
            .map(UnitState::parse)
    }

    pub fn sub_state(&self) -> Option<&str> {
        self.changed
            .get(PROP_SUB_STATE)
            .and_then(PropertyValue::as_str)
    }

    pub fn int_property(&self, name: &str) -> Option<i64> {
        self.changed.get(name).and_then(PropertyValue::as_i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_states_collapse_to_unloaded() {
        assert_eq!(UnitState::parse("reloading"), UnitState::Unloaded);
        assert_eq!(UnitState::parse("maintenance"), UnitState::Unloaded);
        assert_eq!(UnitState::parse(""), UnitState::Unloaded);
        assert_eq!(UnitState::parse("active"), UnitState::Active);
    }

    #[test]
    fn state_categories_are_disjoint() {
        for state in [
            UnitState::Unloaded,
            UnitState::Inactive,
            UnitState::Activating,
            UnitState::Active,
            UnitState::Deactivating,
            UnitState::Failed,
        ] {
            assert_ne!(state.is_stopped_like(), state.is_running_like());
        }
    }

    #[test]
    fn notification_accessors_read_typed_values() {
        let notification = ChangeNotification::state_change("demo.service", UnitState::Active, "running")
            .with_int(PROP_EXEC_MAIN_STATUS, 0);
        assert_eq!(notification.active_state(), Some(UnitState::Active));
        assert_eq!(notification.sub_state(), Some("running"));
        assert_eq!(notification.int_property(PROP_EXEC_MAIN_STATUS), Some(0));
        assert_eq!(notification.int_property(PROP_EXEC_MAIN_CODE), None);
    }

    #[test]
    fn unit_state_serde_round_trip_is_lenient() {
        let parsed: UnitState = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(parsed, UnitState::Failed);
        let lenient: UnitState = serde_json::from_str("\"no-such-state\"").unwrap();
        assert_eq!(lenient, UnitState::Unloaded);
        assert_eq!(serde_json::to_string(&UnitState::Active).unwrap(), "\"active\"");
    }
}
