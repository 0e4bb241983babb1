//! ---
//! smon_section: "02-bus-adapters"
//! smon_subsection: "module"
//! smon_type: "source"
//! smon_scope: "code"
//! smon_description: "Notification-bus contract and adapters."
//! smon_version: "v0.1.0"
//! smon_owner: "tbd"
//! ---
//! The notification bus is the seam between the monitor core and the host
//! service manager. The core only ever talks to the [`NotificationBus`]
//! trait; adapters turn that contract into an actual transport. Two
//! adapters ship with the workspace: [`SystemctlBus`] polls the service
//! manager CLI and synthesizes changed-property notifications, and
//! [`MemoryBus`] is a scriptable in-memory bus for tests and simulation.

use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod escape;
pub mod memory;
pub mod systemctl;
pub mod types;

pub use escape::{escape_unit_name, unescape_unit_name, unit_object_path};
pub use memory::MemoryBus;
pub use systemctl::SystemctlBus;
pub use types::{
    ChangeNotification, PropertyValue, UnitProperties, UnitState, PROP_ACTIVE_STATE,
    PROP_EXEC_MAIN_CODE, PROP_EXEC_MAIN_STATUS, PROP_STATE_CHANGE_USEC, PROP_SUB_STATE,
    UNIT_INTERFACE,
};

/// Errors surfaced by bus adapters.
///
/// `ConnectionFailed` is the fatal startup class; `UnitNotFound` and
/// `CallFailed` are per-unit degradations the caller is expected to log
/// and survive.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus connection failed: {0}")]
    ConnectionFailed(String),
    #[error("unit not found: {0}")]
    UnitNotFound(String),
    #[error("bus call failed for {unit}: {reason}")]
    CallFailed { unit: String, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Addressable handle for a resolved service unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRef {
    pub name: String,
    pub object_path: String,
}

impl UnitRef {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let object_path = unit_object_path(&name);
        Self { name, object_path }
    }
}

/// Handle for an established per-unit subscription, returned by
/// [`NotificationBus::subscribe_unit`] and consumed by
/// [`NotificationBus::unsubscribe_unit`].
#[derive(Debug)]
pub struct SubscriptionToken {
    pub id: u64,
    pub unit: String,
}

/// Contract the monitor core consumes to observe service units.
///
/// Change notifications are delivered into the `mpsc::Sender` handed to
/// `subscribe_unit`; a single delivery source per subscription keeps the
/// per-unit ordering guarantee with the transport.
#[async_trait]
pub trait NotificationBus: Send + Sync {
    /// Toggle the service manager's coarse event firehose on.
    async fn subscribe_manager(&self) -> Result<(), BusError>;

    /// Toggle the service manager's coarse event firehose off.
    async fn unsubscribe_manager(&self) -> Result<(), BusError>;

    /// Resolve a unit name to an addressable object.
    async fn resolve_unit(&self, name: &str) -> Result<UnitRef, BusError>;

    /// Read the unit's current property values synchronously.
    async fn unit_properties(&self, unit: &UnitRef) -> Result<UnitProperties, BusError>;

    /// Register for asynchronous changed-property notifications scoped to
    /// one unit.
    async fn subscribe_unit(
        &self,
        unit: &UnitRef,
        sink: mpsc::Sender<ChangeNotification>,
    ) -> Result<SubscriptionToken, BusError>;

    /// Tear down a per-unit subscription.
    async fn unsubscribe_unit(&self, token: SubscriptionToken) -> Result<(), BusError>;
}
