//! Crash-safe, repository-wide merge lock.

mod holder;
mod liveness;
mod merge_lock;

pub use holder::{LockHolder, LOCK_SCHEMA_VERSION};
pub use liveness::{LivenessProbe, ProcessLiveness};
pub use merge_lock::{LockHandle, LockOptions, MergeLock, MergeLockGuard};
