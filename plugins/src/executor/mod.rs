pub mod strategies;

pub use strategies::{
    CpuBoundConcurrencyPlugin, ExponentialBackoffPlugin, FixedConcurrencyPlugin, LinearRetryPlugin,
};
