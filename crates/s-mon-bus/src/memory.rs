//! ---
//! smon_section: "02-bus-adapters"
//! smon_subsection: "module"
//! smon_type: "source"
//! smon_scope: "code"
//! smon_description: "Notification-bus contract and adapters."
//! smon_version: "v0.1.0"
//! smon_owner: "tbd"
//! ---
//! Channel-backed in-memory bus. Tests and simulation mode script unit
//! state through [`MemoryBus::set_unit`] and [`MemoryBus::push_change`];
//! subscribers receive exactly the changed-property maps a real transport
//! would deliver.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{
    ChangeNotification, PropertyValue, UnitProperties, UnitState, PROP_ACTIVE_STATE,
    PROP_EXEC_MAIN_CODE, PROP_EXEC_MAIN_STATUS, PROP_SUB_STATE,
};
use crate::{BusError, NotificationBus, SubscriptionToken, UnitRef};

#[derive(Default)]
struct MemoryBusInner {
    units: BTreeMap<String, UnitProperties>,
    subscriptions: BTreeMap<u64, (String, mpsc::Sender<ChangeNotification>)>,
    manager_subscribed: bool,
    next_token: u64,
}

/// In-memory [`NotificationBus`] implementation.
#[derive(Default)]
pub struct MemoryBus {
    inner: Mutex<MemoryBusInner>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit or overwrite its current properties without
    /// notifying subscribers; this models state the transport already
    /// held before anyone subscribed.
    pub fn set_unit(&self, name: &str, properties: UnitProperties) {
        self.inner
            .lock()
            .units
            .insert(name.to_owned(), properties);
    }

    /// Drop a unit, so subsequent resolution fails with `UnitNotFound`.
    pub fn remove_unit(&self, name: &str) {
        self.inner.lock().units.remove(name);
    }

    /// True while the manager-level firehose is toggled on.
    pub fn manager_subscribed(&self) -> bool {
        self.inner.lock().manager_subscribed
    }

    /// Deliver a raw changed-property notification to the unit's
    /// subscribers, updating the stored properties to match.
    pub async fn push_change(&self, notification: ChangeNotification) {
        let sinks: Vec<mpsc::Sender<ChangeNotification>> = {
            let mut inner = self.inner.lock();
            if let Some(props) = inner.units.get_mut(&notification.unit) {
                apply_changed(props, &notification.changed);
            }
            inner
                .subscriptions
                .values()
                .filter(|(unit, _)| *unit == notification.unit)
                .map(|(_, sink)| sink.clone())
                .collect()
        };
        if sinks.is_empty() {
            debug!(unit = %notification.unit, "change dropped: no subscribers");
        }
        for sink in sinks {
            if sink.send(notification.clone()).await.is_err() {
                debug!(unit = %notification.unit, "change dropped: subscriber closed");
            }
        }
    }

    /// Script a plain state transition for a unit.
    pub async fn push_state(&self, unit: &str, state: UnitState, sub_state: &str) {
        self.push_change(ChangeNotification::state_change(unit, state, sub_state))
            .await;
    }

    /// Script a crash arrival carrying exit detail.
    pub async fn push_crash(&self, unit: &str, exec_main_status: i64, exec_main_code: i64) {
        self.push_change(
            ChangeNotification::state_change(unit, UnitState::Failed, "failed")
                .with_int(PROP_EXEC_MAIN_STATUS, exec_main_status)
                .with_int(PROP_EXEC_MAIN_CODE, exec_main_code),
        )
        .await;
    }
}

fn apply_changed(props: &mut UnitProperties, changed: &BTreeMap<String, PropertyValue>) {
    if let Some(state) = changed.get(PROP_ACTIVE_STATE).and_then(PropertyValue::as_str) {
        props.active_state = UnitState::parse(state);
    }
    if let Some(sub) = changed.get(PROP_SUB_STATE).and_then(PropertyValue::as_str) {
        props.sub_state = sub.to_owned();
    }
    if let Some(status) = changed
        .get(PROP_EXEC_MAIN_STATUS)
        .and_then(PropertyValue::as_i64)
    {
        props.exec_main_status = status;
    }
    if let Some(code) = changed
        .get(PROP_EXEC_MAIN_CODE)
        .and_then(PropertyValue::as_i64)
    {
        props.exec_main_code = code;
    }
}

#[async_trait::async_trait]
impl NotificationBus for MemoryBus {
    async fn subscribe_manager(&self) -> Result<(), BusError> {
        self.inner.lock().manager_subscribed = true;
        Ok(())
    }

    async fn unsubscribe_manager(&self) -> Result<(), BusError> {
        self.inner.lock().manager_subscribed = false;
        Ok(())
    }

    async fn resolve_unit(&self, name: &str) -> Result<UnitRef, BusError> {
        if self.inner.lock().units.contains_key(name) {
            Ok(UnitRef::new(name))
        } else {
            Err(BusError::UnitNotFound(name.to_owned()))
        }
    }

    async fn unit_properties(&self, unit: &UnitRef) -> Result<UnitProperties, BusError> {
        self.inner
            .lock()
            .units
            .get(&unit.name)
            .cloned()
            .ok_or_else(|| BusError::UnitNotFound(unit.name.clone()))
    }

    async fn subscribe_unit(
        &self,
        unit: &UnitRef,
        sink: mpsc::Sender<ChangeNotification>,
    ) -> Result<SubscriptionToken, BusError> {
        let mut inner = self.inner.lock();
        if !inner.units.contains_key(&unit.name) {
            return Err(BusError::UnitNotFound(unit.name.clone()));
        }
        inner.next_token += 1;
        let id = inner.next_token;
        inner.subscriptions.insert(id, (unit.name.clone(), sink));
        Ok(SubscriptionToken {
            id,
            unit: unit.name.clone(),
        })
    }

    async fn unsubscribe_unit(&self, token: SubscriptionToken) -> Result<(), BusError> {
        self.inner.lock().subscriptions.remove(&token.id);
        Ok(())
    }
}
