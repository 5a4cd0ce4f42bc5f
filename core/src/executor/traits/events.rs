use serde::Serialize;

use crate::executor::types::RunOutcome;
use crate::executor::ExecutionLevel;
use crate::stage::{FailureClass, StageId};

/// Sink for plan lifecycle events (logs, JSONL files, notifications).
pub trait PlanEventSink: Send + Sync {
    fn name(&self) -> &str;
    fn emit(&self, event: &PlanEvent);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanEvent {
    RunStart {
        run_id: String,
        total_stages: usize,
        pending_stages: usize,
    },
    LevelStart {
        run_id: String,
        level: ExecutionLevel,
        max_parallel: usize,
    },
    StageStart {
        run_id: String,
        stage_id: StageId,
        attempt: u32,
    },
    StageRetry {
        run_id: String,
        stage_id: StageId,
        attempt: u32,
        class: FailureClass,
        message: String,
        delay_ms: u64,
    },
    StageVerified {
        run_id: String,
        stage_id: StageId,
        attempt: u32,
        merged_commit: Option<String>,
    },
    /// A stage needs a human.
    StageEscalated {
        run_id: String,
        stage_id: StageId,
        attempt: u32,
        class: FailureClass,
        message: String,
    },
    LevelEnd {
        run_id: String,
        index: usize,
        verified: usize,
        escalated: usize,
    },
    RunEnd {
        run_id: String,
        outcome: RunOutcome,
        duration_ms: u64,
    },
}

impl PlanEvent {
    pub fn run_id(&self) -> &str {
        match self {
            Self::RunStart { run_id, .. }
            | Self::LevelStart { run_id, .. }
            | Self::StageStart { run_id, .. }
            | Self::StageRetry { run_id, .. }
            | Self::StageVerified { run_id, .. }
            | Self::StageEscalated { run_id, .. }
            | Self::LevelEnd { run_id, .. }
            | Self::RunEnd { run_id, .. } => run_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::RunStart { .. } => "run_start",
            Self::LevelStart { .. } => "level_start",
            Self::StageStart { .. } => "stage_start",
            Self::StageRetry { .. } => "stage_retry",
            Self::StageVerified { .. } => "stage_verified",
            Self::StageEscalated { .. } => "stage_escalated",
            Self::LevelEnd { .. } => "level_end",
            Self::RunEnd { .. } => "run_end",
        }
    }
}

/// Logs every event through `tracing`. Used when no sink is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl PlanEventSink for TracingEventSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn emit(&self, event: &PlanEvent) {
        match event {
            PlanEvent::StageEscalated {
                stage_id,
                class,
                message,
                ..
            } => tracing::error!(stage_id = %stage_id, class = %class, "stage escalated: {message}"),
            PlanEvent::StageRetry {
                stage_id,
                attempt,
                class,
                ..
            } => tracing::warn!(stage_id = %stage_id, attempt, class = %class, "stage will be retried"),
            other => tracing::debug!(run_id = other.run_id(), event = other.kind(), "plan event"),
        }
    }
}
