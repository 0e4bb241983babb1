//! ---
//! smon_section: "01-core-functionality"
//! smon_subsection: "module"
//! smon_type: "source"
//! smon_scope: "code"
//! smon_description: "Shared primitives and utilities for the monitor runtime."
//! smon_version: "v0.1.0"
//! smon_owner: "tbd"
//! ---
use chrono::{DateTime, Local, TimeZone};

/// Timestamp layout used in the persisted snapshot. Prior deployments wrote
/// this exact shape, so it must stay stable.
pub const WALL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Render a wall-clock instant in the persisted snapshot layout.
pub fn format_wall_time(instant: DateTime<Local>) -> String {
    instant.format(WALL_TIME_FORMAT).to_string()
}

/// Convert a service-manager microsecond timestamp to the persisted layout.
///
/// Out-of-range values fall back to the current time rather than failing the
/// caller; the timestamp is advisory detail on a state record.
pub fn usec_to_wall_time(usec: i64) -> String {
    let secs = usec / 1_000_000;
    match Local.timestamp_opt(secs, 0).single() {
        Some(instant) => format_wall_time(instant),
        None => format_wall_time(Local::now()),
    }
}

/// Current wall-clock time in the persisted layout.
pub fn wall_time_now() -> String {
    format_wall_time(Local::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_epoch_microseconds() {
        let rendered = usec_to_wall_time(1_700_000_000_000_000);
        // Local-time rendering, so only the shape is asserted.
        assert_eq!(rendered.len(), 19);
        assert_eq!(&rendered[4..5], "-");
        assert_eq!(&rendered[13..14], ":");
    }

    #[test]
    fn out_of_range_falls_back_to_now() {
        let rendered = usec_to_wall_time(i64::MAX);
        assert_eq!(rendered.len(), 19);
    }
}
