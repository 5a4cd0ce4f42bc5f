pub mod concurrency;
pub mod retry;

pub use concurrency::{CpuBoundConcurrencyPlugin, FixedConcurrencyPlugin};
pub use retry::{ExponentialBackoffPlugin, LinearRetryPlugin};
