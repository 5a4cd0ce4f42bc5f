use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::{FailureClass, StageId};

/// Highest record schema this build reads and the one it writes.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationResult {
    Pass,
    Fail,
}

/// Canonical outcome of a stage's latest verification attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub schema_version: u32,
    pub stage_id: StageId,
    pub result: VerificationResult,
    #[serde(default)]
    pub evidence: Vec<String>,
    /// 1-based attempt number that produced this record.
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<FailureClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_commit: Option<String>,
    pub written_at: DateTime<Utc>,
}

impl VerificationRecord {
    pub fn pass(stage_id: impl Into<StageId>, attempt: u32, evidence: Vec<String>) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            stage_id: stage_id.into(),
            result: VerificationResult::Pass,
            evidence,
            attempt,
            classification: None,
            merged_commit: None,
            written_at: Utc::now(),
        }
    }

    pub fn fail(
        stage_id: impl Into<StageId>,
        attempt: u32,
        class: FailureClass,
        evidence: Vec<String>,
    ) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            stage_id: stage_id.into(),
            result: VerificationResult::Fail,
            evidence,
            attempt,
            classification: Some(class),
            merged_commit: None,
            written_at: Utc::now(),
        }
    }

    pub fn with_merged_commit(mut self, commit: impl Into<String>) -> Self {
        self.merged_commit = Some(commit.into());
        self
    }

    pub fn passed(&self) -> bool {
        self.result == VerificationResult::Pass
    }
}
