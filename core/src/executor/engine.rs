use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ConductorConfig;
use crate::error::{ConfigError, PlanError};
use crate::lock::MergeLock;
use crate::monitor::FailureMonitor;
use crate::stage::{FailureClass, Stage, StageId, StageStatus};
use crate::store::VerificationStore;

use super::graph::PlanGraph;
use super::runner::StageRunner;
use super::scheduler::{compute_levels, run_level_parallel, ExecutionLevel};
use super::traits::{
    ConcurrencyContext, ConcurrencyStrategyPlugin, PlanEvent, PlanEventSink, RepoMerger,
    RetryStrategyPlugin, StageExecutor, TracingEventSink,
};
use super::types::{Disposition, EscalatedStage, PlanReport, RunOutcome, StageOutcome};

struct SystemInfoCache {
    sys: sysinfo::System,
    cpu_count: usize,
    last_refresh: Instant,
    cached_cpu_usage: f32,
    cached_memory_usage: f32,
}

impl SystemInfoCache {
    fn new() -> Self {
        let mut sys = sysinfo::System::new();
        sys.refresh_cpu();
        sys.refresh_memory();
        let cpu_count = sys.cpus().len().max(1);
        let mut cache = Self {
            sys,
            cpu_count,
            last_refresh: Instant::now(),
            cached_cpu_usage: 0.0,
            cached_memory_usage: 0.0,
        };
        cache.sample();
        cache
    }

    fn sample(&mut self) {
        self.cached_cpu_usage =
            self.sys.cpus().iter().map(|c| c.cpu_usage()).sum::<f32>() / self.cpu_count as f32;
        let total_memory = self.sys.total_memory().max(1);
        self.cached_memory_usage = (self.sys.used_memory() as f32 / total_memory as f32) * 100.0;
    }

    fn get(&mut self) -> (usize, f32, f32) {
        if self.last_refresh.elapsed() > Duration::from_secs(1) {
            self.sys.refresh_cpu();
            self.sys.refresh_memory();
            self.sample();
            self.last_refresh = Instant::now();
        }
        (
            self.cpu_count,
            self.cached_cpu_usage,
            self.cached_memory_usage,
        )
    }
}

/// Runs a plan level by level until it completes or a stage escalates.
pub struct PlanExecutor {
    max_parallel: usize,
    resume_from_store: bool,
    runner: StageRunner,
    store: VerificationStore,
    events: Arc<dyn PlanEventSink>,
    retry_strategy: Option<Arc<dyn RetryStrategyPlugin>>,
    concurrency_strategy: Option<Arc<dyn ConcurrencyStrategyPlugin>>,
    sys_cache: Mutex<SystemInfoCache>,
}

pub struct PlanExecutorBuilder {
    config: ConductorConfig,
    state_dir: Option<PathBuf>,
    executor: Option<Arc<dyn StageExecutor>>,
    merger: Option<Arc<dyn RepoMerger>>,
    lock: Option<MergeLock>,
    store: Option<VerificationStore>,
    monitor: Option<Arc<FailureMonitor>>,
    events: Option<Arc<dyn PlanEventSink>>,
    retry_strategy: Option<Arc<dyn RetryStrategyPlugin>>,
    concurrency_strategy: Option<Arc<dyn ConcurrencyStrategyPlugin>>,
}

/// Per-level tally of applied outcomes.
#[derive(Debug, Default)]
struct LevelTally {
    verified: usize,
    escalated: Vec<EscalatedStage>,
}

impl PlanExecutor {
    pub fn builder(config: ConductorConfig) -> PlanExecutorBuilder {
        PlanExecutorBuilder::new(config)
    }

    pub fn store(&self) -> &VerificationStore {
        &self.store
    }

    pub fn monitor(&self) -> &Arc<FailureMonitor> {
        self.runner.monitor()
    }

    /// Execute every runnable stage of `graph`.
    ///
    /// Only plan-scoped problems (bad graph, invalid transition) are errors;
    /// stage failures end up in the report.
    pub async fn execute(&self, graph: &mut PlanGraph) -> Result<PlanReport, PlanError> {
        let start = Instant::now();
        let run_id = Uuid::new_v4().to_string();

        graph.validate()?;

        let ids: Vec<StageId> = graph.stages().map(|s| s.id.clone()).collect();
        self.monitor().reset(&ids);

        if self.resume_from_store {
            let resumed = self.resume_verified(graph)?;
            if !resumed.is_empty() {
                info!(run_id = %run_id, stages = ?resumed, "resumed verified stages from store");
            }
        }

        self.emit(PlanEvent::RunStart {
            run_id: run_id.clone(),
            total_stages: graph.len(),
            pending_stages: graph.counts().pending,
        });

        let mut levels_run: Vec<ExecutionLevel> = Vec::new();
        let mut escalated: Vec<EscalatedStage> = Vec::new();
        let mut blocked: Vec<StageId> = Vec::new();
        let mut not_started: Vec<StageId> = Vec::new();
        let mut stop = false;

        loop {
            let plan = compute_levels(graph)?;

            for id in &plan.blocked {
                graph.transition(id.as_str(), StageStatus::Failed)?;
                warn!(run_id = %run_id, stage_id = %id, "stage blocked by a failed dependency");
            }
            blocked.extend(plan.blocked.iter().cloned());

            if stop {
                not_started = plan
                    .levels
                    .iter()
                    .flat_map(|l| l.stage_ids.iter().cloned())
                    .collect();
                not_started.sort();
                break;
            }

            let Some(next) = plan.next_level() else {
                break;
            };
            let level = ExecutionLevel {
                index: levels_run.len(),
                stage_ids: next.stage_ids.clone(),
            };

            let tally = self.execute_level(graph, &run_id, &level).await?;
            stop = !tally.escalated.is_empty();
            escalated.extend(tally.escalated);
            levels_run.push(level);
        }

        escalated.sort_by(|a, b| a.stage_id.cmp(&b.stage_id));
        blocked.sort();

        let counts = graph.counts();
        let outcome = if escalated.is_empty()
            && blocked.is_empty()
            && not_started.is_empty()
            && counts.failed == 0
            && counts.escalated == 0
        {
            RunOutcome::Success
        } else {
            RunOutcome::PartialFailure
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        self.emit(PlanEvent::RunEnd {
            run_id: run_id.clone(),
            outcome,
            duration_ms,
        });
        info!(
            run_id = %run_id,
            outcome = ?outcome,
            levels = levels_run.len(),
            verified = counts.verified,
            escalated = escalated.len(),
            blocked = blocked.len(),
            duration_ms,
            "plan run finished"
        );

        Ok(PlanReport {
            run_id,
            outcome,
            verified: graph.ids_with_status(StageStatus::Verified),
            escalated,
            blocked,
            not_started,
            levels_run,
            duration_ms,
        })
    }

    async fn execute_level(
        &self,
        graph: &mut PlanGraph,
        run_id: &str,
        level: &ExecutionLevel,
    ) -> Result<LevelTally, PlanError> {
        let max_parallel = self.level_concurrency(level.stage_ids.len());
        info!(run_id, level = level.index, stages = ?level.stage_ids, max_parallel, "level started");
        self.emit(PlanEvent::LevelStart {
            run_id: run_id.to_string(),
            level: level.clone(),
            max_parallel,
        });

        let mut stages: HashMap<StageId, Stage> = HashMap::with_capacity(level.stage_ids.len());
        for id in &level.stage_ids {
            graph.transition(id.as_str(), StageStatus::Running)?;
            if let Some(stage) = graph.stage(id.as_str()) {
                stages.insert(id.clone(), stage.clone());
            }
        }

        let results = run_level_parallel(&level.stage_ids, max_parallel, |id: StageId| {
            let stage = stages.get(&id).cloned();
            async move {
                match stage {
                    Some(stage) => self.run_stage(run_id, stage).await,
                    None => Vec::new(),
                }
            }
        })
        .await?;

        let mut tally = LevelTally::default();
        for outcomes in &results {
            self.apply_outcomes(graph, outcomes, &mut tally)?;
        }

        self.emit(PlanEvent::LevelEnd {
            run_id: run_id.to_string(),
            index: level.index,
            verified: tally.verified,
            escalated: tally.escalated.len(),
        });
        Ok(tally)
    }

    /// All attempts of one stage, retries included.
    async fn run_stage(&self, run_id: &str, stage: Stage) -> Vec<StageOutcome> {
        let mut outcomes = Vec::new();

        loop {
            self.emit(PlanEvent::StageStart {
                run_id: run_id.to_string(),
                stage_id: stage.id.clone(),
                attempt: self.runner.monitor().health(&stage.id).map_or(1, |h| h.attempts + 1),
            });

            let outcome = self.runner.run_attempt(run_id, &stage).await;
            let disposition = outcome.disposition;
            let class = outcome.class.unwrap_or(FailureClass::Permanent);
            let message = outcome.message.clone().unwrap_or_default();
            let attempt = outcome.attempt;

            match disposition {
                Disposition::Verified => {
                    self.emit(PlanEvent::StageVerified {
                        run_id: run_id.to_string(),
                        stage_id: stage.id.clone(),
                        attempt,
                        merged_commit: outcome.merged_commit().map(str::to_string),
                    });
                    outcomes.push(outcome);
                    break;
                }
                Disposition::Escalated => {
                    self.emit(PlanEvent::StageEscalated {
                        run_id: run_id.to_string(),
                        stage_id: stage.id.clone(),
                        attempt,
                        class,
                        message,
                    });
                    outcomes.push(outcome);
                    break;
                }
                Disposition::Retry => {
                    let delay = self
                        .retry_strategy
                        .as_ref()
                        .and_then(|s| s.next_delay(attempt, class))
                        .unwrap_or(Duration::ZERO);
                    self.emit(PlanEvent::StageRetry {
                        run_id: run_id.to_string(),
                        stage_id: stage.id.clone(),
                        attempt,
                        class,
                        message,
                        delay_ms: delay.as_millis() as u64,
                    });
                    outcomes.push(outcome);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        outcomes
    }

    fn apply_outcomes(
        &self,
        graph: &mut PlanGraph,
        outcomes: &[StageOutcome],
        tally: &mut LevelTally,
    ) -> Result<(), PlanError> {
        for outcome in outcomes {
            let id = outcome.stage_id.as_str();
            match outcome.disposition {
                Disposition::Retry => {
                    graph.transition(id, StageStatus::Pending)?;
                    graph.transition(id, StageStatus::Running)?;
                }
                Disposition::Verified => {
                    graph.transition(id, StageStatus::Verified)?;
                    tally.verified += 1;
                }
                Disposition::Escalated => {
                    graph.transition(id, StageStatus::Escalated)?;
                    tally.escalated.push(EscalatedStage {
                        stage_id: outcome.stage_id.clone(),
                        attempts: outcome.attempt,
                        class: outcome.class.unwrap_or(FailureClass::Permanent),
                        message: outcome.message.clone().unwrap_or_default(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Mark pending stages with a passing record as verified.
    /// Mark stages with a stored pass as verified, walking the plan in
    /// dependency order. A stage is only resumed when every dependency is
    /// already verified, so a stale record below a stage that must re-run
    /// never skips it.
    fn resume_verified(&self, graph: &mut PlanGraph) -> Result<Vec<StageId>, PlanError> {
        let mut resumed = Vec::new();
        for level in compute_levels(graph)?.levels {
            for id in level.stage_ids {
                let deps_verified = graph
                    .dependencies_of(id.as_str())
                    .iter()
                    .all(|dep| graph.status(dep.as_str()) == Some(StageStatus::Verified));
                if !deps_verified {
                    continue;
                }
                match self.store.is_verified(&id) {
                    Ok(true) => {
                        graph.transition(id.as_str(), StageStatus::Running)?;
                        graph.transition(id.as_str(), StageStatus::Verified)?;
                        resumed.push(id);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(stage_id = %id, error = %e, "ignoring unreadable verification record");
                    }
                }
            }
        }
        resumed.sort();
        Ok(resumed)
    }

    fn level_concurrency(&self, level_width: usize) -> usize {
        let base = self.max_parallel;
        self.concurrency_strategy
            .as_ref()
            .map(|strategy| {
                let (available_cpus, cpu_usage, memory_usage) = self
                    .sys_cache
                    .lock()
                    .map(|mut cache| cache.get())
                    .unwrap_or((1, 0.0, 0.0));
                strategy.calculate_concurrency(&ConcurrencyContext {
                    cpu_usage,
                    available_cpus,
                    memory_usage,
                    level_width,
                    base_concurrency: base,
                })
            })
            .unwrap_or(base)
            .max(1)
    }

    fn emit(&self, event: PlanEvent) {
        self.events.emit(&event);
    }
}

impl PlanExecutorBuilder {
    pub fn new(config: ConductorConfig) -> Self {
        Self {
            config,
            state_dir: None,
            executor: None,
            merger: None,
            lock: None,
            store: None,
            monitor: None,
            events: None,
            retry_strategy: None,
            concurrency_strategy: None,
        }
    }

    /// Directory for the lock and store. Defaults to `config.state_dir`.
    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    pub fn executor(mut self, executor: Arc<dyn StageExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn merger(mut self, merger: Arc<dyn RepoMerger>) -> Self {
        self.merger = Some(merger);
        self
    }

    pub fn lock(mut self, lock: MergeLock) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn store(mut self, store: VerificationStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn monitor(mut self, monitor: Arc<FailureMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn events(mut self, sink: Arc<dyn PlanEventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn retry_strategy(mut self, strategy: Arc<dyn RetryStrategyPlugin>) -> Self {
        self.retry_strategy = Some(strategy);
        self
    }

    pub fn concurrency_strategy(mut self, strategy: Arc<dyn ConcurrencyStrategyPlugin>) -> Self {
        self.concurrency_strategy = Some(strategy);
        self
    }

    pub fn build(self) -> Result<PlanExecutor, PlanError> {
        self.config.validate()?;

        let executor = self
            .executor
            .ok_or_else(|| ConfigError::Invalid("no stage executor configured".into()))?;
        let merger = self
            .merger
            .ok_or_else(|| ConfigError::Invalid("no repository merger configured".into()))?;

        let state_dir = self
            .state_dir
            .unwrap_or_else(|| self.config.state_dir.clone());
        let lock = self
            .lock
            .unwrap_or_else(|| MergeLock::from_config(&state_dir, &self.config.lock));
        let store = self
            .store
            .unwrap_or_else(|| VerificationStore::from_config(&state_dir, &self.config.store));
        let monitor = match self.monitor {
            Some(monitor) => monitor,
            None => Arc::new(FailureMonitor::from_config(&self.config.monitor)?),
        };

        let runner = StageRunner::new(executor, merger, lock, store.clone(), monitor)
            .with_state_dir(state_dir)
            .with_lock_timeout(self.config.lock.acquire_timeout())
            .with_watchdog_interval(self.config.monitor.watchdog_interval());

        Ok(PlanExecutor {
            max_parallel: self.config.executor.max_parallel,
            resume_from_store: self.config.executor.resume_from_store,
            runner,
            store,
            events: self
                .events
                .unwrap_or_else(|| Arc::new(TracingEventSink) as Arc<dyn PlanEventSink>),
            retry_strategy: self.retry_strategy,
            concurrency_strategy: self.concurrency_strategy,
            sys_cache: Mutex::new(SystemInfoCache::new()),
        })
    }
}
