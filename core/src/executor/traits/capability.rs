use async_trait::async_trait;

use crate::error::{ExecutorError, MergeError};
use crate::executor::types::{MergeOutcome, StageContext, StageResult};

/// Runs the work of one stage. Agents live behind this trait.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn name(&self) -> &str {
        "stage-executor"
    }

    async fn run(&self, ctx: StageContext) -> Result<StageResult, ExecutorError>;
}

/// Merges a finished stage branch into the shared repository.
///
/// Only ever called while the merge lock is held.
#[async_trait]
pub trait RepoMerger: Send + Sync {
    fn name(&self) -> &str {
        "repo-merger"
    }

    async fn merge(&self, branch_ref: &str) -> Result<MergeOutcome, MergeError>;
}
