//! Stage scheduling and merge coordination for multi-agent work plans.
//!
//! A plan is a DAG of stages run by opaque executors against one shared git
//! repository. The core computes parallel levels, serializes merges through a
//! crash-safe lock, persists verification state and decides between retry and
//! escalation.

pub mod config;
pub mod error;
pub mod executor;
pub mod lock;
pub mod monitor;
pub mod stage;
pub mod store;

pub use config::ConductorConfig;
pub use error::{
    ConfigError, ExecutorError, GraphError, LockError, MergeError, PlanError, StoreError,
};
pub use executor::traits::{
    ConcurrencyContext, ConcurrencyStrategyPlugin, PlanEvent, PlanEventSink, RepoMerger,
    RetryStrategyPlugin, StageExecutor,
};
pub use executor::{
    compute_levels, ExecutionLevel, LevelPlan, MergeOutcome, PlanExecutor, PlanGraph, PlanReport,
    RunOutcome, StageContext, StageResult,
};
pub use lock::{LockHandle, LockHolder, MergeLock, MergeLockGuard};
pub use monitor::{Decision, FailureMonitor};
pub use stage::{ExecutionMode, FailureClass, Stage, StageId, StageStatus};
pub use store::{VerificationRecord, VerificationResult, VerificationStore};
