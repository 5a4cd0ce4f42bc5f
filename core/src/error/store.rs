use std::path::PathBuf;

use thiserror::Error;

use crate::stage::StageId;

/// Verification store integrity and IO failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no verification record for stage '{0}'")]
    NotFound(StageId),

    #[error("verification record for stage '{stage_id}' is corrupt: {reason}")]
    Corrupt { stage_id: StageId, reason: String },

    #[error("verification record for stage '{stage_id}' has schema version {found} (supported up to {supported})")]
    UnsupportedSchema {
        stage_id: StageId,
        found: u32,
        supported: u32,
    },

    #[error("stage id '{0}' cannot be used as a record name")]
    InvalidStageId(StageId),

    #[error("serialize error: {0}")]
    Serialize(String),

    #[error("verification store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
