use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::stage::FailureClass;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConductorConfig {
    /// Directory holding the merge lock and the verification store.
    /// Relative paths are resolved against the repository root.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub events_out: EventsOutConfig,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".conductor")
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            logging: LoggingConfig::default(),
            executor: ExecutorConfig::default(),
            lock: LockConfig::default(),
            monitor: MonitorConfig::default(),
            store: StoreConfig::default(),
            events_out: EventsOutConfig::default(),
        }
    }
}

impl ConductorConfig {
    /// Reject values the scheduler and the monitor cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "monitor.max_attempts must be at least 1".into(),
            ));
        }
        if self.executor.max_parallel == 0 {
            return Err(ConfigError::Invalid(
                "executor.max_parallel must be at least 1".into(),
            ));
        }
        if self.lock.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "lock.poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.lock.max_poll_interval_ms < self.lock.poll_interval_ms {
            return Err(ConfigError::Invalid(
                "lock.max_poll_interval_ms must not be below lock.poll_interval_ms".into(),
            ));
        }
        if self.lock.file_name.trim().is_empty() || self.store.dir_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "lock.file_name and store.dir_name must not be empty".into(),
            ));
        }
        if self.monitor.watchdog_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "monitor.watchdog_interval_ms must be greater than zero".into(),
            ));
        }
        self.monitor.transient_class_set()?;
        Ok(())
    }

    /// `state_dir` resolved against `repo_root` when relative.
    pub fn resolved_state_dir(&self, repo_root: &Path) -> PathBuf {
        if self.state_dir.is_absolute() {
            self.state_dir.clone()
        } else {
            repo_root.join(&self.state_dir)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default)]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "conductor_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: false,
            level: default_logging_level(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Worker-pool size for stages of one level.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Mark stages with a passing verification record as verified before
    /// the first level runs.
    #[serde(default)]
    pub resume_from_store: bool,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
}

fn default_max_parallel() -> usize {
    4
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            resume_from_store: false,
            retry: RetryConfig::default(),
            concurrency: ConcurrencyConfig::default(),
        }
    }
}

/// Backoff between in-level retries. Whether to retry at all is the
/// failure monitor's call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_strategy")]
    pub strategy: String,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: default_retry_strategy(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_retry_strategy() -> String {
    "exponential-backoff".to_string()
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_concurrency_strategy")]
    pub strategy: String,
    #[serde(default = "default_min_concurrency")]
    pub min_concurrency: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            strategy: default_concurrency_strategy(),
            min_concurrency: default_min_concurrency(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_concurrency_strategy() -> String {
    "fixed".to_string()
}

fn default_min_concurrency() -> usize {
    1
}

fn default_max_concurrency() -> usize {
    16
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Marker file name inside `state_dir`.
    #[serde(default = "default_lock_file_name")]
    pub file_name: String,

    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,

    /// A dead holder's marker must be at least this old before it is reclaimed.
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,

    #[serde(default = "default_allow_reclaim")]
    pub allow_reclaim: bool,
}

fn default_lock_file_name() -> String {
    "merge.lock".to_string()
}

fn default_acquire_timeout_ms() -> u64 {
    120_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_max_poll_interval_ms() -> u64 {
    2_000
}

fn default_stale_after_ms() -> u64 {
    600_000
}

fn default_allow_reclaim() -> bool {
    true
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            file_name: default_lock_file_name(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
            stale_after_ms: default_stale_after_ms(),
            allow_reclaim: default_allow_reclaim(),
        }
    }
}

impl LockConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    /// How often a running stage is checked for a missed heartbeat.
    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,

    /// Failures older than this no longer count towards escalation.
    #[serde(default = "default_failure_window_ms")]
    pub failure_window_ms: u64,

    /// Failure classes that are retried. Unknown names fail validation.
    #[serde(default = "default_transient_classes")]
    pub transient_classes: Vec<String>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_heartbeat_timeout_ms() -> u64 {
    300_000
}

fn default_watchdog_interval_ms() -> u64 {
    1_000
}

fn default_failure_window_ms() -> u64 {
    3_600_000
}

fn default_transient_classes() -> Vec<String> {
    ["network", "timeout", "stalled", "lock_busy", "transient"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            watchdog_interval_ms: default_watchdog_interval_ms(),
            failure_window_ms: default_failure_window_ms(),
            transient_classes: default_transient_classes(),
        }
    }
}

impl MonitorConfig {
    pub fn transient_class_set(&self) -> Result<Vec<FailureClass>, ConfigError> {
        self.transient_classes
            .iter()
            .map(|name| name.parse::<FailureClass>().map_err(ConfigError::Invalid))
            .collect()
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn failure_window(&self) -> Duration {
        Duration::from_millis(self.failure_window_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory name inside `state_dir`.
    #[serde(default = "default_store_dir_name")]
    pub dir_name: String,
}

fn default_store_dir_name() -> String {
    "verification".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir_name: default_store_dir_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsOutConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_events_path")]
    pub path: String,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_drop_when_full")]
    pub drop_when_full: bool,
}

fn default_events_path() -> String {
    "./plan.events.jsonl".to_string()
}

fn default_channel_capacity() -> usize {
    2048
}

fn default_drop_when_full() -> bool {
    true
}

impl Default for EventsOutConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_events_path(),
            channel_capacity: default_channel_capacity(),
            drop_when_full: default_drop_when_full(),
        }
    }
}
