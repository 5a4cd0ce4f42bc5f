use std::path::PathBuf;

use thiserror::Error;

use super::graph::GraphError;

/// Errors that abort a plan run.
///
/// Stage-scoped failures never surface here; they end up in the run report.
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("plan graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("stage task failed to join: {0}")]
    Join(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}
