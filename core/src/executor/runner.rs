use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::error::{ExecutorError, LockError, MergeError};
use crate::lock::{MergeLock, MergeLockGuard};
use crate::monitor::{Decision, FailureMonitor, Heartbeat};
use crate::stage::{ExecutionMode, FailureClass, Stage};
use crate::store::{VerificationRecord, VerificationStore};

use super::traits::{RepoMerger, StageExecutor};
use super::types::{Disposition, MergeOutcome, StageContext, StageOutcome, StageResult};

/// Why an attempt did not verify.
#[derive(Debug, Clone)]
struct AttemptFailure {
    class: FailureClass,
    /// The executor said not to retry; the transient policy is not consulted.
    permanent: bool,
    message: String,
    evidence: Vec<String>,
}

impl AttemptFailure {
    fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            permanent: false,
            message: message.into(),
            evidence: Vec::new(),
        }
    }
}

impl From<ExecutorError> for AttemptFailure {
    fn from(err: ExecutorError) -> Self {
        Self {
            permanent: err.is_permanent(),
            ..Self::new(err.class(), err.message())
        }
    }
}

impl From<LockError> for AttemptFailure {
    fn from(err: LockError) -> Self {
        let class = if err.is_contention() {
            FailureClass::LockBusy
        } else {
            FailureClass::Lock
        };
        Self::new(class, err.to_string())
    }
}

impl From<MergeError> for AttemptFailure {
    fn from(err: MergeError) -> Self {
        match err {
            MergeError::Conflict { files } => conflict(files),
            other => Self::new(FailureClass::Merge, other.to_string()),
        }
    }
}

fn conflict(files: Vec<String>) -> AttemptFailure {
    AttemptFailure {
        class: FailureClass::MergeConflict,
        permanent: false,
        message: format!("merge conflict in {} file(s)", files.len()),
        evidence: files.into_iter().map(|f| format!("conflict: {f}")).collect(),
    }
}

/// Drives one attempt of one stage: dispatch, merge under the lock, persist,
/// report to the monitor.
///
/// The runner never touches the plan graph; the caller applies the returned
/// disposition.
pub struct StageRunner {
    executor: Arc<dyn StageExecutor>,
    merger: Arc<dyn RepoMerger>,
    lock: MergeLock,
    store: VerificationStore,
    monitor: Arc<FailureMonitor>,
    state_dir: PathBuf,
    lock_timeout: Duration,
    watchdog_interval: Duration,
}

impl StageRunner {
    pub fn new(
        executor: Arc<dyn StageExecutor>,
        merger: Arc<dyn RepoMerger>,
        lock: MergeLock,
        store: VerificationStore,
        monitor: Arc<FailureMonitor>,
    ) -> Self {
        let state_dir = lock
            .path()
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default();
        Self {
            executor,
            merger,
            lock,
            store,
            monitor,
            state_dir,
            lock_timeout: Duration::from_millis(120_000),
            watchdog_interval: Duration::from_secs(1),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = state_dir.into();
        self
    }

    pub fn monitor(&self) -> &Arc<FailureMonitor> {
        &self.monitor
    }

    pub fn store(&self) -> &VerificationStore {
        &self.store
    }

    /// Run a single attempt of `stage`.
    pub async fn run_attempt(&self, run_id: &str, stage: &Stage) -> StageOutcome {
        let attempt = self.monitor.record_start(&stage.id);
        info!(run_id, stage_id = %stage.id, attempt, mode = ?stage.mode, "stage attempt started");

        let ctx = StageContext {
            run_id: run_id.to_string(),
            stage_id: stage.id.clone(),
            attempt,
            mode: stage.mode,
            dependencies: stage.dependencies.clone(),
            payload: stage.payload.clone(),
            state_dir: self.state_dir.clone(),
            heartbeat: Heartbeat::new(self.monitor.clone(), stage.id.clone()),
        };

        let result = match stage.mode {
            ExecutionMode::InPlace => self.run_in_place(stage, ctx).await,
            ExecutionMode::IsolatedWorktree => self.run_isolated(stage, ctx).await,
        };

        let record = match &result {
            Ok((stage_result, commit)) => {
                let record =
                    VerificationRecord::pass(stage.id.clone(), attempt, evidence_of(stage_result));
                match commit {
                    Some(commit) => record.with_merged_commit(commit.clone()),
                    None => record,
                }
            }
            Err(failure) => {
                let mut evidence = failure.evidence.clone();
                evidence.push(failure.message.clone());
                VerificationRecord::fail(stage.id.clone(), attempt, failure.class, evidence)
            }
        };

        let (record, result) = match self.store.save(&record) {
            Ok(()) => (Some(record), result),
            Err(e) => {
                error!(stage_id = %stage.id, error = %e, "failed to persist verification record");
                (
                    None,
                    Err(AttemptFailure::new(FailureClass::Persistence, e.to_string())),
                )
            }
        };

        match result {
            Ok(_) => {
                self.monitor.record_success(&stage.id);
                info!(run_id, stage_id = %stage.id, attempt, "stage verified");
                StageOutcome {
                    stage_id: stage.id.clone(),
                    attempt,
                    disposition: Disposition::Verified,
                    class: None,
                    message: None,
                    record,
                }
            }
            Err(failure) => {
                let event = if failure.permanent {
                    self.monitor.record_permanent_failure(
                        &stage.id,
                        failure.class,
                        failure.message.clone(),
                    )
                } else {
                    self.monitor
                        .record_failure(&stage.id, failure.class, failure.message.clone())
                };
                let disposition = match self.monitor.decide(&stage.id) {
                    Decision::Retry => Disposition::Retry,
                    Decision::Escalate | Decision::Continue => Disposition::Escalated,
                };
                warn!(
                    run_id,
                    stage_id = %stage.id,
                    attempt = event.attempt,
                    class = %event.class,
                    disposition = ?disposition,
                    "stage attempt failed: {}",
                    event.message
                );
                StageOutcome {
                    stage_id: stage.id.clone(),
                    attempt,
                    disposition,
                    class: Some(failure.class),
                    message: Some(failure.message),
                    record,
                }
            }
        }
    }

    /// The lock is held for the whole execution; the executor writes the
    /// shared checkout directly.
    async fn run_in_place(
        &self,
        stage: &Stage,
        ctx: StageContext,
    ) -> Result<(StageResult, Option<String>), AttemptFailure> {
        let guard = self.acquire(stage).await?;
        let result = self.run_with_watchdog(ctx).await;
        release(guard);

        let result = result?;
        if !result.passed {
            return Err(verification_failure(&result));
        }
        Ok((result, None))
    }

    async fn run_isolated(
        &self,
        stage: &Stage,
        ctx: StageContext,
    ) -> Result<(StageResult, Option<String>), AttemptFailure> {
        let result = self.run_with_watchdog(ctx).await?;
        if !result.passed {
            return Err(verification_failure(&result));
        }

        let Some(branch_ref) = result.branch_ref.clone() else {
            return Ok((result, None));
        };

        let guard = self.acquire(stage).await?;
        let merged = self.merger.merge(&branch_ref).await;
        release(guard);

        match merged? {
            MergeOutcome::Merged { commit } => {
                info!(stage_id = %stage.id, branch_ref = %branch_ref, commit = %commit, "stage merged");
                Ok((result, Some(commit)))
            }
            MergeOutcome::UpToDate => Ok((result, None)),
            MergeOutcome::Conflict { files } => Err(conflict(files)),
        }
    }

    async fn acquire(&self, stage: &Stage) -> Result<MergeLockGuard, AttemptFailure> {
        Ok(self
            .lock
            .acquire_guard(self.lock_timeout, Some(stage.id.as_str()))
            .await?)
    }

    async fn run_with_watchdog(&self, ctx: StageContext) -> Result<StageResult, AttemptFailure> {
        let stage_id = ctx.stage_id.clone();
        let run = self.executor.run(ctx);
        tokio::pin!(run);

        let mut ticker = tokio::time::interval(self.watchdog_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                res = &mut run => return res.map_err(AttemptFailure::from),
                _ = ticker.tick() => {
                    self.monitor.check_stalls();
                    if self.monitor.is_stalled(&stage_id) {
                        let timeout = self.monitor.options().heartbeat_timeout;
                        return Err(AttemptFailure::new(
                            FailureClass::Stalled,
                            format!("no heartbeat for more than {}ms", timeout.as_millis()),
                        ));
                    }
                }
            }
        }
    }
}

fn release(guard: MergeLockGuard) {
    if let Err(e) = guard.release() {
        error!(error = %e, "merge lock release failed");
    }
}

fn verification_failure(result: &StageResult) -> AttemptFailure {
    AttemptFailure {
        class: FailureClass::Verification,
        permanent: false,
        message: result
            .summary
            .clone()
            .unwrap_or_else(|| "stage verification did not pass".to_string()),
        evidence: result.evidence.clone(),
    }
}

fn evidence_of(result: &StageResult) -> Vec<String> {
    let mut evidence = result.evidence.clone();
    if let Some(summary) = &result.summary {
        evidence.push(summary.clone());
    }
    evidence
}
