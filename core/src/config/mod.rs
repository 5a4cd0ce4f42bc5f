mod load;
mod types;

pub use load::{
    apply_env_overrides, find_config_file, load_default, load_from_path, LOCAL_CONFIG_PATH,
    REPO_CONFIG_PATH,
};
pub use types::{
    ConcurrencyConfig, ConductorConfig, EventsOutConfig, ExecutorConfig, LockConfig,
    LoggingConfig, MonitorConfig, RetryConfig, StoreConfig,
};
