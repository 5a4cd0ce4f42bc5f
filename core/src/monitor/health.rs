use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::stage::{FailureClass, StageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthPhase {
    Healthy,
    Stalled,
    Failed,
    Escalated,
    Succeeded,
}

impl fmt::Display for HealthPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Stalled => "stalled",
            Self::Failed => "failed",
            Self::Escalated => "escalated",
            Self::Succeeded => "succeeded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEvent {
    pub stage_id: StageId,
    pub attempt: u32,
    pub class: FailureClass,
    /// Reported as non-retryable by its source; escalates whatever the class.
    #[serde(default)]
    pub permanent: bool,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// No failure pending; keep going.
    Continue,
    Retry,
    Escalate,
}

/// What the monitor knows about one stage.
#[derive(Debug, Clone)]
pub struct StageHealth {
    pub phase: HealthPhase,
    /// Attempts started so far.
    pub attempts: u32,
    pub last_heartbeat: Option<Instant>,
    /// Failure of the current attempt, not yet acted on.
    pub pending_failure: Option<FailureEvent>,
    /// Recent failures, oldest first.
    pub(crate) failures: VecDeque<(Instant, FailureClass)>,
}

impl Default for StageHealth {
    fn default() -> Self {
        Self {
            phase: HealthPhase::Healthy,
            attempts: 0,
            last_heartbeat: None,
            pending_failure: None,
            failures: VecDeque::new(),
        }
    }
}

impl StageHealth {
    pub fn failures_in_window(&self) -> usize {
        self.failures.len()
    }

    pub(crate) fn prune(&mut self, now: Instant, window: std::time::Duration) {
        while let Some((at, _)) = self.failures.front() {
            if now.saturating_duration_since(*at) > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}
