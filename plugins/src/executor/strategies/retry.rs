use conductor_core::config::RetryConfig;
use conductor_core::executor::traits::RetryStrategyPlugin;
use conductor_core::stage::FailureClass;
use std::time::Duration;

pub struct ExponentialBackoffPlugin {
    config: RetryConfig,
}

pub struct LinearRetryPlugin {
    config: RetryConfig,
}

impl ExponentialBackoffPlugin {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl LinearRetryPlugin {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

/// Stalled stages already waited out the heartbeat timeout.
fn skips_backoff(class: FailureClass) -> bool {
    class == FailureClass::Stalled
}

impl RetryStrategyPlugin for ExponentialBackoffPlugin {
    fn name(&self) -> &str {
        "exponential-backoff"
    }

    fn next_delay(&self, attempt: u32, class: FailureClass) -> Option<Duration> {
        if skips_backoff(class) || self.config.base_delay_ms == 0 {
            return None;
        }
        let exp = 1u64 << attempt.saturating_sub(1).min(30);
        let delay = self.config.base_delay_ms.saturating_mul(exp);
        let delay = delay.min(self.config.max_delay_ms);
        Some(Duration::from_millis(delay))
    }
}

impl RetryStrategyPlugin for LinearRetryPlugin {
    fn name(&self) -> &str {
        "linear"
    }

    fn next_delay(&self, attempt: u32, class: FailureClass) -> Option<Duration> {
        if skips_backoff(class) || self.config.base_delay_ms == 0 {
            return None;
        }
        let multiplier = u64::from(attempt.max(1));
        let delay = self.config.base_delay_ms.saturating_mul(multiplier);
        let delay = delay.min(self.config.max_delay_ms);
        Some(Duration::from_millis(delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(strategy: &str, base: u64, max: u64) -> RetryConfig {
        RetryConfig {
            strategy: strategy.to_string(),
            base_delay_ms: base,
            max_delay_ms: max,
        }
    }

    #[test]
    fn test_exponential_backoff() {
        let plugin = ExponentialBackoffPlugin::new(cfg("exponential-backoff", 100, 1000));
        let delay = |attempt| plugin.next_delay(attempt, FailureClass::Network);
        assert_eq!(delay(1), Some(Duration::from_millis(100)));
        assert_eq!(delay(2), Some(Duration::from_millis(200)));
        assert_eq!(delay(3), Some(Duration::from_millis(400)));
        assert_eq!(delay(8), Some(Duration::from_millis(1000)));
        assert_eq!(delay(u32::MAX), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn test_linear_backoff() {
        let plugin = LinearRetryPlugin::new(cfg("linear", 50, 200));
        let delay = |attempt| plugin.next_delay(attempt, FailureClass::Timeout);
        assert_eq!(delay(1), Some(Duration::from_millis(50)));
        assert_eq!(delay(3), Some(Duration::from_millis(150)));
        assert_eq!(delay(9), Some(Duration::from_millis(200)));
    }

    #[test]
    fn test_stalled_retries_immediately() {
        let plugin = ExponentialBackoffPlugin::new(cfg("exponential-backoff", 100, 1000));
        assert_eq!(plugin.next_delay(1, FailureClass::Stalled), None);
        let plugin = LinearRetryPlugin::new(cfg("linear", 0, 1000));
        assert_eq!(plugin.next_delay(1, FailureClass::Network), None);
    }
}
