//! ---
//! smon_section: "01-core-functionality"
//! smon_subsection: "module"
//! smon_type: "source"
//! smon_scope: "code"
//! smon_description: "Shared primitives and utilities for the monitor runtime."
//! smon_version: "v0.1.0"
//! smon_owner: "tbd"
//! ---
use std::path::Path;

/// Read the host machine id so centralized log/metric collection can tell
/// monitor instances apart.
///
/// Checks `/etc/machine-id` first, then the D-Bus fallback location, and
/// returns `"unknown"` when neither is readable.
pub fn machine_id() -> String {
    for candidate in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Some(id) = read_id(Path::new(candidate)) {
            return id;
        }
    }
    "unknown".to_owned()
}

fn read_id(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_owned())
}
