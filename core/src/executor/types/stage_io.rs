use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::monitor::Heartbeat;
use crate::stage::{ExecutionMode, StageId};

/// Everything an executor gets to know about the attempt it runs.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub run_id: String,
    pub stage_id: StageId,
    /// 1-based.
    pub attempt: u32,
    pub mode: ExecutionMode,
    pub dependencies: Vec<StageId>,
    pub payload: serde_json::Value,
    pub state_dir: PathBuf,
    pub heartbeat: Heartbeat,
}

/// What an executor reports for a finished attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    /// Branch to merge for isolated stages. `None` means nothing to merge.
    #[serde(default)]
    pub branch_ref: Option<String>,
    /// Whether the stage's own verification (tests, checks) passed.
    pub passed: bool,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl StageResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            ..Self::default()
        }
    }

    pub fn fail(summary: impl Into<String>) -> Self {
        Self {
            passed: false,
            summary: Some(summary.into()),
            ..Self::default()
        }
    }

    pub fn with_branch(mut self, branch_ref: impl Into<String>) -> Self {
        self.branch_ref = Some(branch_ref.into());
        self
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence.push(evidence.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergeOutcome {
    Merged { commit: String },
    UpToDate,
    Conflict { files: Vec<String> },
}
