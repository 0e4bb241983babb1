//! ---
//! smon_section: "02-bus-adapters"
//! smon_subsection: "module"
//! smon_type: "source"
//! smon_scope: "code"
//! smon_description: "Notification-bus contract and adapters."
//! smon_version: "v0.1.0"
//! smon_owner: "tbd"
//! ---
//! Production adapter that realises the notification-bus contract on top
//! of the service manager CLI. Each subscription runs a poll task that
//! reads `systemctl show`, diffs the observed properties against the last
//! readout, and forwards a notification containing only the properties
//! that actually changed. The core never sees the polling; it consumes the
//! same changed-property maps a push transport would deliver.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::types::{
    ChangeNotification, UnitProperties, UnitState, PROP_ACTIVE_STATE, PROP_EXEC_MAIN_CODE,
    PROP_EXEC_MAIN_STATUS, PROP_SUB_STATE,
};
use crate::{BusError, NotificationBus, SubscriptionToken, UnitRef};

const SHOW_PROPERTIES: &str = "LoadState,ActiveState,SubState,ExecMainStatus,ExecMainCode";

#[derive(Default)]
struct SystemctlInner {
    pollers: BTreeMap<u64, JoinHandle<()>>,
    manager_subscribed: bool,
    next_token: u64,
}

/// Polling [`NotificationBus`] adapter over `systemctl show`.
pub struct SystemctlBus {
    poll_interval: Duration,
    command_timeout: Duration,
    inner: Mutex<SystemctlInner>,
}

impl SystemctlBus {
    pub fn new(poll_interval: Duration, command_timeout: Duration) -> Self {
        Self {
            poll_interval,
            command_timeout,
            inner: Mutex::new(SystemctlInner::default()),
        }
    }

    async fn read_properties(&self, unit: &str) -> Result<UnitProperties, BusError> {
        read_unit_properties(unit, self.command_timeout).await
    }
}

async fn show(unit: &str, command_timeout: Duration) -> Result<BTreeMap<String, String>, BusError> {
    let output = tokio::time::timeout(
        command_timeout,
        Command::new("systemctl")
            .arg("show")
            .arg(unit)
            .arg(format!("--property={}", SHOW_PROPERTIES))
            .arg("--no-pager")
            .stdin(Stdio::null())
            .output(),
    )
    .await
    .map_err(|_| BusError::CallFailed {
        unit: unit.to_owned(),
        reason: "service manager query timed out".to_owned(),
    })??;

    if !output.status.success() {
        return Err(BusError::CallFailed {
            unit: unit.to_owned(),
            reason: format!(
                "systemctl show exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(parse_show_output(&String::from_utf8_lossy(&output.stdout)))
}

async fn read_unit_properties(
    unit: &str,
    command_timeout: Duration,
) -> Result<UnitProperties, BusError> {
    let raw = show(unit, command_timeout).await?;
    if raw.get("LoadState").map(String::as_str) == Some("not-found") {
        return Err(BusError::UnitNotFound(unit.to_owned()));
    }
    Ok(properties_from_show(&raw))
}

/// Parse `Key=Value` lines as emitted by `systemctl show`.
pub fn parse_show_output(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            Some((key.trim().to_owned(), value.trim().to_owned()))
        })
        .collect()
}

/// Build a property readout from parsed `systemctl show` output. Absent or
/// unparsable fields fall back to defaults rather than failing the poll.
pub fn properties_from_show(raw: &BTreeMap<String, String>) -> UnitProperties {
    let active_state = raw
        .get(PROP_ACTIVE_STATE)
        .map(|value| UnitState::parse(value))
        .unwrap_or_default();
    let sub_state = raw
        .get(PROP_SUB_STATE)
        .cloned()
        .unwrap_or_else(|| "unknown".to_owned());
    let exec_main_status = raw
        .get(PROP_EXEC_MAIN_STATUS)
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);
    let exec_main_code = raw
        .get(PROP_EXEC_MAIN_CODE)
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);
    UnitProperties {
        active_state,
        sub_state,
        exec_main_status,
        exec_main_code,
        state_change_us: None,
    }
}

/// Diff two readouts into the changed-property map of a notification.
/// Returns `None` when nothing observable changed.
pub fn diff_properties(
    unit: &str,
    previous: &UnitProperties,
    current: &UnitProperties,
) -> Option<ChangeNotification> {
    let mut notification = ChangeNotification::new(unit);
    if current.active_state != previous.active_state {
        notification = notification.with_str(PROP_ACTIVE_STATE, current.active_state.as_str());
    }
    if current.sub_state != previous.sub_state {
        notification = notification.with_str(PROP_SUB_STATE, current.sub_state.as_str());
    }
    if current.exec_main_status != previous.exec_main_status {
        notification = notification.with_int(PROP_EXEC_MAIN_STATUS, current.exec_main_status);
    }
    if current.exec_main_code != previous.exec_main_code {
        notification = notification.with_int(PROP_EXEC_MAIN_CODE, current.exec_main_code);
    }
    if notification.changed.is_empty() {
        None
    } else {
        Some(notification)
    }
}

#[async_trait::async_trait]
impl NotificationBus for SystemctlBus {
    async fn subscribe_manager(&self) -> Result<(), BusError> {
        // The poll adapter has no firehose to toggle; probing the CLI here
        // surfaces an unusable host as the fatal startup error class.
        let output = tokio::time::timeout(
            self.command_timeout,
            Command::new("systemctl")
                .arg("--version")
                .stdin(Stdio::null())
                .output(),
        )
        .await
        .map_err(|_| BusError::ConnectionFailed("service manager probe timed out".to_owned()))?
        .map_err(|err| BusError::ConnectionFailed(err.to_string()))?;
        if !output.status.success() {
            return Err(BusError::ConnectionFailed(format!(
                "systemctl probe exited with {}",
                output.status
            )));
        }
        self.inner.lock().manager_subscribed = true;
        Ok(())
    }

    async fn unsubscribe_manager(&self) -> Result<(), BusError> {
        let mut inner = self.inner.lock();
        inner.manager_subscribed = false;
        for (_, poller) in std::mem::take(&mut inner.pollers) {
            poller.abort();
        }
        Ok(())
    }

    async fn resolve_unit(&self, name: &str) -> Result<UnitRef, BusError> {
        self.read_properties(name).await?;
        Ok(UnitRef::new(name))
    }

    async fn unit_properties(&self, unit: &UnitRef) -> Result<UnitProperties, BusError> {
        self.read_properties(&unit.name).await
    }

    async fn subscribe_unit(
        &self,
        unit: &UnitRef,
        sink: mpsc::Sender<ChangeNotification>,
    ) -> Result<SubscriptionToken, BusError> {
        let baseline = self.read_properties(&unit.name).await?;
        let name = unit.name.clone();
        let poll_interval = self.poll_interval;
        let command_timeout = self.command_timeout;

        let poller = tokio::spawn(async move {
            let mut last = baseline;
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let current = match read_unit_properties(&name, command_timeout).await {
                    Ok(current) => current,
                    Err(BusError::UnitNotFound(_)) => {
                        // Unit can disappear while subscribed; report it as
                        // an unloaded arrival once, then keep watching.
                        UnitProperties::new(UnitState::Unloaded, "dead")
                    }
                    Err(err) => {
                        debug!(unit = %name, error = %err, "unit poll failed");
                        continue;
                    }
                };
                if let Some(notification) = diff_properties(&name, &last, &current) {
                    if sink.send(notification).await.is_err() {
                        debug!(unit = %name, "subscriber closed; stopping poll");
                        break;
                    }
                }
                last = current;
            }
        });

        let mut inner = self.inner.lock();
        inner.next_token += 1;
        let id = inner.next_token;
        inner.pollers.insert(id, poller);
        Ok(SubscriptionToken {
            id,
            unit: unit.name.clone(),
        })
    }

    async fn unsubscribe_unit(&self, token: SubscriptionToken) -> Result<(), BusError> {
        if let Some(poller) = self.inner.lock().pollers.remove(&token.id) {
            poller.abort();
        } else {
            warn!(unit = %token.unit, "unsubscribe for unknown token");
        }
        Ok(())
    }
}
