#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use conductor_core::config::ConductorConfig;
use conductor_core::error::{ExecutorError, MergeError};
use conductor_core::executor::traits::{PlanEvent, PlanEventSink, RepoMerger, StageExecutor};
use conductor_core::executor::{MergeOutcome, PlanExecutor, StageContext, StageResult};
use conductor_core::stage::StageId;

/// Executor that replays a per-stage script of results and records calls.
///
/// Stages without a script pass on the first attempt and return branch
/// `stage/<id>`.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<StageId, VecDeque<Result<StageResult, ExecutorError>>>>,
    calls: Mutex<Vec<(StageId, u32)>>,
    delay: Option<Duration>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn script(
        self,
        stage: &str,
        results: impl IntoIterator<Item = Result<StageResult, ExecutorError>>,
    ) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(StageId::from(stage), results.into_iter().collect());
        self
    }

    pub fn calls(&self) -> Vec<(StageId, u32)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn attempts_of(&self, stage: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(id, _)| id.as_str() == stage)
            .count()
    }
}

#[async_trait]
impl StageExecutor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(&self, ctx: StageContext) -> Result<StageResult, ExecutorError> {
        self.calls
            .lock()
            .unwrap()
            .push((ctx.stage_id.clone(), ctx.attempt));
        ctx.heartbeat.beat();

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&ctx.stage_id)
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| {
            Ok(StageResult::pass()
                .with_branch(format!("stage/{}", ctx.stage_id))
                .with_evidence("scripted pass"))
        })
    }
}

/// Merger that records branch refs in merge order.
#[derive(Default)]
pub struct RecordingMerger {
    merged: Mutex<Vec<String>>,
    conflicts: Mutex<HashMap<String, Vec<String>>>,
}

impl RecordingMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conflict_on(self, branch_ref: &str, files: &[&str]) -> Self {
        self.conflicts.lock().unwrap().insert(
            branch_ref.to_string(),
            files.iter().map(|f| f.to_string()).collect(),
        );
        self
    }

    pub fn merged(&self) -> Vec<String> {
        self.merged.lock().unwrap().clone()
    }
}

#[async_trait]
impl RepoMerger for RecordingMerger {
    fn name(&self) -> &str {
        "recording"
    }

    async fn merge(&self, branch_ref: &str) -> Result<MergeOutcome, MergeError> {
        if let Some(files) = self.conflicts.lock().unwrap().get(branch_ref) {
            return Ok(MergeOutcome::Conflict {
                files: files.clone(),
            });
        }
        let mut merged = self.merged.lock().unwrap();
        merged.push(branch_ref.to_string());
        Ok(MergeOutcome::Merged {
            commit: format!("commit-{}", merged.len()),
        })
    }
}

/// Sink that keeps every event.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<PlanEvent>>,
}

impl CollectingSink {
    pub fn events(&self) -> Vec<PlanEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(PlanEvent::kind).collect()
    }
}

impl PlanEventSink for CollectingSink {
    fn name(&self) -> &str {
        "collecting"
    }

    fn emit(&self, event: &PlanEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Config tuned for tests: short lock polling and no backoff sleeps.
pub fn test_config(state_dir: &Path) -> ConductorConfig {
    let mut cfg = ConductorConfig::default();
    cfg.state_dir = state_dir.to_path_buf();
    cfg.lock.acquire_timeout_ms = 2_000;
    cfg.lock.poll_interval_ms = 2;
    cfg.lock.max_poll_interval_ms = 10;
    cfg.monitor.watchdog_interval_ms = 50;
    cfg
}

pub fn build_executor(
    cfg: ConductorConfig,
    executor: Arc<ScriptedExecutor>,
    merger: Arc<RecordingMerger>,
    sink: Arc<CollectingSink>,
) -> PlanExecutor {
    PlanExecutor::builder(cfg)
        .executor(executor)
        .merger(merger)
        .events(sink)
        .build()
        .unwrap()
}
