use std::path::PathBuf;

use thiserror::Error;

/// Merge-lock contention and misuse.
#[derive(Error, Debug)]
pub enum LockError {
    /// Contention outlasted the acquire timeout.
    #[error("merge lock busy: held by {holder}")]
    Busy { holder: String },

    /// The holder looks dead but reclaiming is disabled.
    #[error("merge lock held by {holder} is stale ({age_secs}s old) and reclaim is disabled")]
    Stale { holder: String, age_secs: u64 },

    /// Release attempted by someone who no longer holds the lock.
    #[error("release by non-holder {holder_id} (current holder: {})", .current.as_deref().unwrap_or("none"))]
    NotHolder {
        holder_id: String,
        current: Option<String>,
    },

    #[error("merge lock marker {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("merge lock io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LockError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Contention rather than misuse or integrity trouble.
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::Busy { .. } | Self::Stale { .. })
    }
}
