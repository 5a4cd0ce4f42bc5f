//! Stage identity, status and failure classification.
//!
//! Nothing in here depends on the graph, the lock or the store; all of them
//! depend on this module instead.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const MAX_STAGE_ID_LEN: usize = 128;

/// Unique identifier of a stage within a plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(String);

impl StageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the id can be used verbatim as a file name.
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= MAX_STAGE_ID_LEN
            && !self.0.starts_with('.')
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for StageId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for StageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// How a stage's work reaches the shared repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Work happens on a separate branch/worktree and is merged afterwards.
    #[default]
    IsolatedWorktree,
    /// Work happens directly in the shared checkout.
    InPlace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Verified,
    Failed,
    Escalated,
}

impl StageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Verified | Self::Failed | Self::Escalated)
    }

    /// Terminal and unsuccessful; dependents can never run.
    pub fn is_dead_end(self) -> bool {
        matches!(self, Self::Failed | Self::Escalated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Verified => "verified",
            Self::Failed => "failed",
            Self::Escalated => "escalated",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of orchestrated work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,

    /// Stages that must be `Verified` before this one may run.
    #[serde(default)]
    pub dependencies: Vec<StageId>,

    #[serde(default)]
    pub mode: ExecutionMode,

    #[serde(default = "default_status")]
    pub status: StageStatus,

    /// Number of attempts already started.
    #[serde(default)]
    pub attempts: u32,

    /// Opaque instructions for the executor.
    #[serde(default)]
    pub payload: serde_json::Value,
}

fn default_status() -> StageStatus {
    StageStatus::Pending
}

impl Stage {
    pub fn new(id: impl Into<StageId>) -> Self {
        Self {
            id: id.into(),
            dependencies: Vec::new(),
            mode: ExecutionMode::default(),
            status: StageStatus::Pending,
            attempts: 0,
            payload: serde_json::Value::Null,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StageId>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Error classification fed to the failure monitor.
///
/// Whether a class is retried is decided by a caller-supplied policy; the
/// classes themselves carry no retry semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Executor reported a retryable failure without further detail.
    Transient,
    /// Executor reported a non-retryable failure without further detail.
    Permanent,
    Network,
    Timeout,
    /// Heartbeat timeout exceeded.
    Stalled,
    /// Merge lock could not be acquired within the timeout.
    LockBusy,
    /// Merge lock misuse or integrity failure.
    Lock,
    MergeConflict,
    /// Merge backend failed for a reason other than a conflict.
    Merge,
    /// Stage ran but its own verification did not pass.
    Verification,
    /// Executor rejected the stage contract.
    Contract,
    /// Verification record could not be written or read back.
    Persistence,
}

impl FailureClass {
    pub const ALL: [FailureClass; 12] = [
        Self::Transient,
        Self::Permanent,
        Self::Network,
        Self::Timeout,
        Self::Stalled,
        Self::LockBusy,
        Self::Lock,
        Self::MergeConflict,
        Self::Merge,
        Self::Verification,
        Self::Contract,
        Self::Persistence,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Stalled => "stalled",
            Self::LockBusy => "lock_busy",
            Self::Lock => "lock",
            Self::MergeConflict => "merge_conflict",
            Self::Merge => "merge",
            Self::Verification => "verification",
            Self::Contract => "contract",
            Self::Persistence => "persistence",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|class| class.as_str() == wanted)
            .ok_or_else(|| format!("unknown failure class '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_safe_ids() {
        assert!(StageId::from("build-api_v2.1").is_path_safe());
        assert!(!StageId::from("").is_path_safe());
        assert!(!StageId::from("../escape").is_path_safe());
        assert!(!StageId::from(".hidden").is_path_safe());
        assert!(!StageId::from("a/b").is_path_safe());
        assert!(!StageId::new("x".repeat(129)).is_path_safe());
    }

    #[test]
    fn test_failure_class_parse() {
        assert_eq!("lock-busy".parse::<FailureClass>(), Ok(FailureClass::LockBusy));
        assert_eq!(" Network ".parse::<FailureClass>(), Ok(FailureClass::Network));
        assert!("flaky".parse::<FailureClass>().is_err());
        for class in FailureClass::ALL {
            assert_eq!(class.as_str().parse::<FailureClass>(), Ok(class));
        }
    }

    #[test]
    fn test_stage_deserialize_defaults() {
        let stage: Stage = serde_json::from_str(r#"{"id":"lint","dependencies":["fmt"]}"#).unwrap();
        assert_eq!(stage.status, StageStatus::Pending);
        assert_eq!(stage.mode, ExecutionMode::IsolatedWorktree);
        assert_eq!(stage.dependencies, vec![StageId::from("fmt")]);
        assert_eq!(stage.attempts, 0);
    }
}
