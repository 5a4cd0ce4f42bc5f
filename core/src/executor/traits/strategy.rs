use std::time::Duration;

use crate::stage::FailureClass;

/// Backoff between attempts of a stage the monitor decided to retry.
pub trait RetryStrategyPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Delay before attempt `attempt + 1`, given that attempt `attempt`
    /// (1-based) failed with `class`. `None` means retry immediately.
    fn next_delay(&self, attempt: u32, class: FailureClass) -> Option<Duration>;
}

/// Worker-pool sizing per level.
pub trait ConcurrencyStrategyPlugin: Send + Sync {
    fn name(&self) -> &str;
    fn calculate_concurrency(&self, context: &ConcurrencyContext) -> usize;
}

#[derive(Debug, Clone)]
pub struct ConcurrencyContext {
    pub cpu_usage: f32,
    pub available_cpus: usize,
    pub memory_usage: f32,
    /// Stages in the level about to run.
    pub level_width: usize,
    /// `executor.max_parallel`.
    pub base_concurrency: usize,
}
