//! ---
//! smon_section: "01-core-functionality"
//! smon_subsection: "binary"
//! smon_type: "source"
//! smon_scope: "code"
//! smon_description: "Binary entrypoint for the S-MON daemon."
//! smon_version: "v0.1.0"
//! smon_owner: "tbd"
//! ---
//! Synthetic transition driver for simulation mode: cycles every unit
//! between active and inactive on a fixed cadence, optionally turning
//! every n-th stop into a crash, so the whole pipeline can be exercised
//! on hosts without the real service manager.

use std::sync::Arc;

use s_mon_bus::{MemoryBus, UnitState};
use s_mon_common::SimulationConfig;
use tokio::task::JoinHandle;
use tracing::debug;

pub fn spawn_driver(
    bus: Arc<MemoryBus>,
    services: Vec<String>,
    config: SimulationConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.cycle_interval());
        // The first tick fires immediately; skip it so subscriptions are
        // in place before the first synthetic transition.
        ticker.tick().await;
        let mut up = false;
        let mut stops: u32 = 0;
        loop {
            ticker.tick().await;
            for service in &services {
                if up {
                    stops += 1;
                    if config.crash_every > 0 && stops % config.crash_every == 0 {
                        debug!(unit = %service, "simulated crash");
                        bus.push_crash(service, 1, 1).await;
                    } else {
                        bus.push_state(service, UnitState::Inactive, "dead").await;
                    }
                } else {
                    bus.push_state(service, UnitState::Active, "running").await;
                }
            }
            up = !up;
        }
    })
}
