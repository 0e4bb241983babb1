//! ---
//! smon_section: "01-core-functionality"
//! smon_subsection: "module"
//! smon_type: "source"
//! smon_scope: "code"
//! smon_description: "Primary monitoring engine and lifecycle management."
//! smon_version: "v0.1.0"
//! smon_owner: "tbd"
//! ---
//! Pure classification of unit state transitions. Given the previously
//! known state, the newly observed state, and the exit detail reported by
//! the service manager, [`classify`] decides which semantic event (if any)
//! the transition represents. Counter mutation lives in the engine; this
//! module has no side effects.

use s_mon_bus::types::{EXEC_CODE_DUMPED, EXEC_CODE_KILLED};
use s_mon_bus::UnitState;

/// Exit detail for a unit's main process, derived from the
/// `ExecMainStatus`/`ExecMainCode` property pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code of the main process; meaningful when `signal` is `None`.
    pub code: i64,
    /// Terminating signal number, when the process was killed or dumped.
    pub signal: Option<i64>,
}

impl ExitStatus {
    /// Interpret the raw property pair. For signal terminations
    /// (`ExecMainCode` killed/dumped) the status value carries the signal
    /// number, not an exit code.
    pub fn from_exec_main(status: i64, code: i64) -> Self {
        if code == EXEC_CODE_KILLED || code == EXEC_CODE_DUMPED {
            Self {
                code: 0,
                signal: Some(status),
            }
        } else {
            Self {
                code: status,
                signal: None,
            }
        }
    }

    /// Policy: any non-zero exit code or any signal is authoritative for
    /// crash classification, regardless of the textual sub-state.
    pub fn is_crash_worthy(&self) -> bool {
        self.code != 0 || self.signal.is_some()
    }
}

/// Signal name for crash logs, falling back to the raw number for values
/// outside the platform signal table.
pub fn signal_name(signal: i64) -> String {
    i32::try_from(signal)
        .ok()
        .and_then(|value| nix::sys::signal::Signal::try_from(value).ok())
        .map(|value| value.to_string())
        .unwrap_or_else(|| format!("signal {}", signal))
}

/// Semantic verdict for one observed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// First-ever observation; seeds the record, never counts.
    Initial,
    /// Arrival into activating/active from a stopped-like state.
    Started,
    /// Clean arrival into inactive from a running-like state.
    Stopped,
    /// Arrival into failed from a running-like state, or a stop arrival
    /// carrying crash-worthy exit detail.
    Crashed,
    /// Active straight back to activating: the manager restarted the unit
    /// without an observable inactive gap. Counts one stop and one start.
    RestartCycle,
    /// failed -> inactive, the manager acknowledging an already-counted
    /// crash. No counters.
    QuietDeactivation,
    /// A transition that changes state but counts nothing
    /// (e.g. active -> deactivating, activating -> active).
    Transitional,
    /// New state equals previous state; at most sub-state detail changed.
    Duplicate,
    /// Arrival into unloaded; logged once per disappearance.
    Unloaded,
}

impl Classification {
    /// Counter deltas as (starts, stops, crashes).
    pub fn counter_deltas(&self) -> (u64, u64, u64) {
        match self {
            Classification::Started => (1, 0, 0),
            Classification::Stopped => (0, 1, 0),
            Classification::Crashed => (0, 0, 1),
            Classification::RestartCycle => (1, 1, 0),
            _ => (0, 0, 0),
        }
    }

    pub fn changes_counters(&self) -> bool {
        self.counter_deltas() != (0, 0, 0)
    }
}

/// Classify one observed transition.
///
/// Crash takes precedence over stop: an arrival into `failed`, or into any
/// stopped-like state with crash-worthy exit detail, is a crash and is
/// never additionally counted as a stop.
pub fn classify(prev: Option<UnitState>, new: UnitState, exit: ExitStatus) -> Classification {
    let Some(prev) = prev else {
        return Classification::Initial;
    };

    if new == prev {
        return Classification::Duplicate;
    }

    match new {
        UnitState::Active | UnitState::Activating => {
            if prev == UnitState::Active && new == UnitState::Activating {
                Classification::RestartCycle
            } else if prev.is_stopped_like() {
                Classification::Started
            } else {
                Classification::Transitional
            }
        }
        UnitState::Inactive => {
            if prev == UnitState::Failed {
                Classification::QuietDeactivation
            } else if prev.is_running_like() {
                if exit.is_crash_worthy() {
                    Classification::Crashed
                } else {
                    Classification::Stopped
                }
            } else {
                Classification::Transitional
            }
        }
        UnitState::Failed => {
            if prev.is_running_like() {
                Classification::Crashed
            } else {
                Classification::Transitional
            }
        }
        UnitState::Deactivating => Classification::Transitional,
        UnitState::Unloaded => Classification::Unloaded,
    }
}
