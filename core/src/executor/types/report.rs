use serde::Serialize;

use crate::executor::ExecutionLevel;
use crate::stage::{FailureClass, StageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    PartialFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscalatedStage {
    pub stage_id: StageId,
    pub attempts: u32,
    pub class: FailureClass,
    pub message: String,
}

/// Summary of one `PlanExecutor::execute` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanReport {
    pub run_id: String,
    pub outcome: RunOutcome,
    /// Verified stages, sorted. Includes stages verified by earlier runs.
    pub verified: Vec<StageId>,
    pub escalated: Vec<EscalatedStage>,
    /// Stages that can never run because a dependency escalated or failed.
    pub blocked: Vec<StageId>,
    /// Runnable stages left untouched because the run stopped early.
    pub not_started: Vec<StageId>,
    /// Levels in the order they ran.
    pub levels_run: Vec<ExecutionLevel>,
    pub duration_ms: u64,
}

impl PlanReport {
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Success
    }
}
