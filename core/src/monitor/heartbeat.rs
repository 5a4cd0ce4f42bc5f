use std::sync::Arc;

use super::failure_monitor::FailureMonitor;
use crate::stage::StageId;

/// Handed to executors so long-running work can prove it is alive.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    monitor: Arc<FailureMonitor>,
    stage_id: StageId,
}

impl Heartbeat {
    pub fn new(monitor: Arc<FailureMonitor>, stage_id: StageId) -> Self {
        Self { monitor, stage_id }
    }

    pub fn beat(&self) {
        self.monitor.record_heartbeat(&self.stage_id);
    }

    pub fn stage_id(&self) -> &StageId {
        &self.stage_id
    }
}
