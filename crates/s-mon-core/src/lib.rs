//! ---
//! smon_section: "01-core-functionality"
//! smon_subsection: "module"
//! smon_type: "source"
//! smon_scope: "code"
//! smon_description: "Primary monitoring engine and lifecycle management."
//! smon_version: "v0.1.0"
//! smon_owner: "tbd"
//! ---
//! Monitor core: the pure state classifier, the transition engine that
//! owns counters and persistence, subscription management against the
//! notification bus, and the lifecycle controller tying them together.

pub mod classifier;
pub mod engine;
pub mod monitor;
pub mod subscription;

pub use classifier::{classify, Classification, ExitStatus};
pub use engine::TransitionEngine;
pub use monitor::{MonitorHandle, ServiceMonitor};
pub use subscription::SubscriptionManager;
