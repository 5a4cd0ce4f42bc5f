use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};

use conductor_core::config::{ConductorConfig, ConcurrencyConfig, RetryConfig};
use conductor_core::executor::traits::{
    ConcurrencyStrategyPlugin, PlanEventSink, RetryStrategyPlugin, StageExecutor,
};
use conductor_core::executor::PlanExecutor;

use crate::events::JsonlEventSink;
use crate::executor::{
    CpuBoundConcurrencyPlugin, ExponentialBackoffPlugin, FixedConcurrencyPlugin, LinearRetryPlugin,
};
use crate::git::GitMerger;

pub fn build_retry_strategy(cfg: &RetryConfig) -> Result<Arc<dyn RetryStrategyPlugin>> {
    match cfg.strategy.as_str() {
        "exponential-backoff" | "exponential" => {
            Ok(Arc::new(ExponentialBackoffPlugin::new(cfg.clone())))
        }
        "linear" => Ok(Arc::new(LinearRetryPlugin::new(cfg.clone()))),
        other => bail!("unknown retry strategy '{other}'"),
    }
}

/// `fixed` pins every level to `max_parallel`; `cpu-bound` adapts to load,
/// capped by the host's core count.
pub fn build_concurrency_strategy(
    cfg: &ConcurrencyConfig,
    max_parallel: usize,
) -> Result<Arc<dyn ConcurrencyStrategyPlugin>> {
    match cfg.strategy.as_str() {
        "fixed" => Ok(Arc::new(FixedConcurrencyPlugin::new(max_parallel))),
        "cpu-bound" | "adaptive" => {
            let mut capped = cfg.clone();
            capped.max_concurrency = capped.max_concurrency.min(num_cpus::get().max(1));
            Ok(Arc::new(CpuBoundConcurrencyPlugin::new(capped)))
        }
        other => bail!("unknown concurrency strategy '{other}'"),
    }
}

pub async fn build_events(cfg: &ConductorConfig) -> Result<Option<Arc<JsonlEventSink>>> {
    Ok(JsonlEventSink::start(&cfg.events_out).await?.map(Arc::new))
}

/// Executor wired with the git merger for `repo_root` and every
/// config-selected plugin. The returned sink, if any, must be shut down
/// after the run to flush queued events.
pub async fn build_plan_executor(
    cfg: &ConductorConfig,
    repo_root: &Path,
    executor: Arc<dyn StageExecutor>,
) -> Result<(PlanExecutor, Option<Arc<JsonlEventSink>>)> {
    let retry = build_retry_strategy(&cfg.executor.retry)?;
    let concurrency =
        build_concurrency_strategy(&cfg.executor.concurrency, cfg.executor.max_parallel)?;
    let events = build_events(cfg).await?;

    let mut builder = PlanExecutor::builder(cfg.clone())
        .state_dir(cfg.resolved_state_dir(repo_root))
        .executor(executor)
        .merger(Arc::new(GitMerger::new(repo_root)))
        .retry_strategy(retry)
        .concurrency_strategy(concurrency);
    if let Some(sink) = &events {
        builder = builder.events(sink.clone() as Arc<dyn PlanEventSink>);
    }

    Ok((builder.build()?, events))
}
