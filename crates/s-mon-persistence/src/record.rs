//! ---
//! smon_section: "03-persistence-logging"
//! smon_subsection: "module"
//! smon_type: "source"
//! smon_scope: "code"
//! smon_description: "Durable snapshot store for per-unit state records."
//! smon_version: "v0.1.0"
//! smon_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

use s_mon_bus::UnitState;

/// Per-unit monitoring record.
///
/// The serialized field names are the wire format of the snapshot file and
/// must not change; unknown extra fields are ignored on read so older
/// monitors can load files written by newer ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Last observed primary state; `None` until first observation.
    #[serde(default)]
    pub last_state: Option<UnitState>,
    /// Secondary state detail, e.g. "running", "dead", "exited". Not part
    /// of the snapshot wire format; in-memory only.
    #[serde(skip)]
    pub last_sub_state: Option<String>,
    /// Wall-clock rendering of the most recent observed transition.
    #[serde(default)]
    pub last_change_time: Option<String>,
    #[serde(default)]
    pub starts: u64,
    #[serde(default)]
    pub stops: u64,
    #[serde(default)]
    pub crashes: u64,
    /// Set once an unloaded/not-found condition has been logged, so a
    /// permanently absent unit does not spam the log on every poll.
    /// Cleared whenever the unit is observed in any loaded state.
    #[serde(default)]
    pub logged_unloaded: bool,
}

impl ServiceRecord {
    /// Sum of all counted transitions; monotonically non-decreasing over
    /// the process lifetime and conserved across restarts.
    pub fn total_transitions(&self) -> u64 {
        self.starts + self.stops + self.crashes
    }

    /// Record a state observation without touching counters.
    pub fn observe(&mut self, state: UnitState, sub_state: &str, change_time: String) {
        self.last_state = Some(state);
        self.last_sub_state = Some(sub_state.to_owned());
        self.last_change_time = Some(change_time);
        if state.is_loaded() {
            self.logged_unloaded = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_updates_state_without_counters() {
        let mut record = ServiceRecord::default();
        record.observe(UnitState::Active, "running", "2026-01-05 10:00:00".into());
        assert_eq!(record.last_state, Some(UnitState::Active));
        assert_eq!(record.last_sub_state.as_deref(), Some("running"));
        assert_eq!(record.total_transitions(), 0);
    }

    #[test]
    fn observing_loaded_state_clears_unloaded_guard() {
        let mut record = ServiceRecord {
            logged_unloaded: true,
            ..ServiceRecord::default()
        };
        record.observe(UnitState::Inactive, "dead", "2026-01-05 10:00:00".into());
        assert!(!record.logged_unloaded);

        record.logged_unloaded = true;
        record.observe(UnitState::Unloaded, "dead", "2026-01-05 10:01:00".into());
        assert!(record.logged_unloaded);
    }
}
