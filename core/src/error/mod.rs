#[allow(clippy::module_inception)]
pub mod error;
pub mod executor;
pub mod graph;
pub mod lock;
pub mod store;

pub use error::{ConfigError, PlanError};
pub use executor::{ExecutorError, MergeError};
pub use graph::GraphError;
pub use lock::LockError;
pub use store::StoreError;
