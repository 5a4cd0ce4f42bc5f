//! Stage model shared by the graph, the monitor and the verification store.

pub mod transitions;
pub mod types;

pub use transitions::{StageTransition, TransitionError};
pub use types::{ExecutionMode, FailureClass, Stage, StageId, StageStatus};
