use conductor_core::config::ConcurrencyConfig;
use conductor_core::executor::traits::{ConcurrencyContext, ConcurrencyStrategyPlugin};

const DEFAULT_CPU_LOW: f32 = 30.0;
const DEFAULT_CPU_HIGH: f32 = 80.0;

/// Scales the level's worker count with host CPU load.
pub struct CpuBoundConcurrencyPlugin {
    config: ConcurrencyConfig,
    cpu_threshold_low: f32,
    cpu_threshold_high: f32,
}

pub struct FixedConcurrencyPlugin {
    fixed: usize,
}

impl CpuBoundConcurrencyPlugin {
    pub fn new(config: ConcurrencyConfig) -> Self {
        Self {
            config,
            cpu_threshold_low: DEFAULT_CPU_LOW,
            cpu_threshold_high: DEFAULT_CPU_HIGH,
        }
    }

    pub fn with_thresholds(mut self, low: f32, high: f32) -> Self {
        self.cpu_threshold_low = low;
        self.cpu_threshold_high = high;
        self
    }
}

impl FixedConcurrencyPlugin {
    pub fn new(fixed: usize) -> Self {
        Self { fixed }
    }
}

impl ConcurrencyStrategyPlugin for CpuBoundConcurrencyPlugin {
    fn name(&self) -> &str {
        "cpu-bound"
    }

    fn calculate_concurrency(&self, context: &ConcurrencyContext) -> usize {
        let min = self.config.min_concurrency.max(1);
        let max = self.config.max_concurrency.max(min);
        let mut desired = context.base_concurrency;

        if context.cpu_usage >= self.cpu_threshold_high {
            desired = desired.saturating_div(2);
        } else if context.cpu_usage <= self.cpu_threshold_low {
            desired = desired.saturating_mul(2);
        }

        desired = desired.clamp(min, max);
        // No point spawning more workers than stages or cores.
        desired
            .min(context.level_width.max(1))
            .min(context.available_cpus.max(1))
    }
}

impl ConcurrencyStrategyPlugin for FixedConcurrencyPlugin {
    fn name(&self) -> &str {
        "fixed"
    }

    fn calculate_concurrency(&self, _context: &ConcurrencyContext) -> usize {
        self.fixed.max(1)
    }
}
