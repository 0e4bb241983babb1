//! ---
//! smon_section: "03-persistence-logging"
//! smon_subsection: "module"
//! smon_type: "source"
//! smon_scope: "code"
//! smon_description: "Durable snapshot store for per-unit state records."
//! smon_version: "v0.1.0"
//! smon_owner: "tbd"
//! ---
//! Durable storage for the monitor's per-unit state records. The snapshot
//! file is the only unit of durability: a JSON mapping from unit name to
//! record, in the field layout prior deployments already wrote, so
//! counters survive both monitor restarts and version upgrades.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

mod record;

pub use record::ServiceRecord;

/// Complete persisted state: unit name to record.
pub type Snapshot = BTreeMap<String, ServiceRecord>;

/// Errors from snapshot persistence.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Filesystem-backed snapshot storage.
///
/// `load` is tolerant by design: a missing file means a fresh start and a
/// corrupt file is demoted to a fresh start with a warning, because
/// refusing to monitor over lost counters would be the worse failure.
/// `save` must never expose a partially written file, so it writes a
/// sibling temp file and renames it over the target.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot from disk.
    pub fn load(&self) -> Snapshot {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no snapshot file; starting with fresh state");
                return Snapshot::new();
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "snapshot unreadable; starting with fresh state");
                return Snapshot::new();
            }
        };
        match serde_json::from_slice::<Snapshot>(&bytes) {
            Ok(snapshot) => {
                info!(path = %self.path.display(), units = snapshot.len(), "snapshot loaded");
                snapshot
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "snapshot malformed; starting with fresh state");
                Snapshot::new()
            }
        }
    }

    /// Write the full snapshot atomically.
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_vec_pretty(snapshot)?;

        // Same-directory temp file, so the rename is not a cross-device move.
        let mut tmp = self.path.clone();
        tmp.set_extension("json.tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Delete the snapshot file, if present.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Reconcile a loaded snapshot against the configured service list:
/// records for units no longer monitored are dropped, newly monitored
/// units get fresh records.
pub fn merge_with_monitored(snapshot: &mut Snapshot, monitored: &[String]) {
    let stale: Vec<String> = snapshot
        .keys()
        .filter(|unit| !monitored.iter().any(|name| name == *unit))
        .cloned()
        .collect();
    for unit in stale {
        snapshot.remove(&unit);
        info!(unit = %unit, "dropped record for unmonitored service");
    }
    for unit in monitored {
        snapshot
            .entry(unit.clone())
            .or_insert_with(ServiceRecord::default);
    }
}
