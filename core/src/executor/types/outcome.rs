use serde::Serialize;

use crate::stage::{FailureClass, StageId};
use crate::store::VerificationRecord;

/// What the executor should do with a stage after one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Verified,
    Retry,
    Escalated,
}

/// Result of one attempt, produced by the stage runner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageOutcome {
    pub stage_id: StageId,
    pub attempt: u32,
    pub disposition: Disposition,
    pub class: Option<FailureClass>,
    pub message: Option<String>,
    /// `None` only if the record could not be persisted.
    pub record: Option<VerificationRecord>,
}

impl StageOutcome {
    pub fn merged_commit(&self) -> Option<&str> {
        self.record.as_ref().and_then(|r| r.merged_commit.as_deref())
    }
}
