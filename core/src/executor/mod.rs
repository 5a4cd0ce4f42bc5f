//! Plan execution over a stage dependency graph (DAG).
//!
//! This module provides:
//! - Plan graph construction and validation
//! - Level computation with Kahn's algorithm, recomputed after every level
//! - Circular dependency detection
//! - Parallel stage scheduling bounded by a worker pool
//! - Per-stage attempts with merge serialization, persistence and
//!   retry/escalation decisions
//!
//! # Architecture
//!
//! ```text
//! Vec<Stage>
//!   ↓
//! PlanGraph::from_stages()
//!   ↓
//! PlanGraph::validate() → missing deps, self deps, detect_cycle()
//!   ↓
//! compute_levels() → LevelPlan { levels, blocked }
//!   ↓
//! PlanExecutor::execute() → first level → StageRunner::run_attempt() per stage
//!   ↓                         (executor → MergeLock → merge → store → monitor)
//! apply transitions, recompute levels … → PlanReport
//! ```

mod engine;
mod graph;
mod runner;
mod scheduler;
pub mod traits;
pub mod types;

pub use engine::{PlanExecutor, PlanExecutorBuilder};
pub use graph::{PlanGraph, StatusCounts};
pub use runner::StageRunner;
pub use scheduler::{compute_levels, run_level_parallel, ExecutionLevel, LevelPlan};
pub use types::{
    Disposition, EscalatedStage, MergeOutcome, PlanReport, RunOutcome, StageContext,
    StageOutcome, StageResult,
};
