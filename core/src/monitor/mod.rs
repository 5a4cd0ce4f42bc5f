//! Stage liveness and retry/escalation decisions.

mod failure_monitor;
mod health;
mod heartbeat;
mod policy;

pub use failure_monitor::{FailureMonitor, MonitorOptions};
pub use health::{Decision, FailureEvent, HealthPhase, StageHealth};
pub use heartbeat::Heartbeat;
pub use policy::{ClassSetPolicy, TransientPolicy};
