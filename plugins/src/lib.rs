//! Concrete plugins for `conductor-core`: the git merge backend, retry and
//! concurrency strategies, the JSONL event sink and tracing setup.

pub mod events;
pub mod executor;
pub mod factory;
pub mod git;
pub mod observability;

pub use events::JsonlEventSink;
pub use git::GitMerger;
pub use observability::init_tracing;
