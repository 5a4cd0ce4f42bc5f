use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::liveness::local_hostname;

pub const LOCK_SCHEMA_VERSION: u32 = 1;

/// Contents of the merge-lock marker file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub holder_id: String,
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: DateTime<Utc>,
    pub schema_version: u32,
    /// Free-form note about what the holder is doing, usually a stage id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

impl LockHolder {
    pub fn for_current_process(purpose: Option<String>) -> Self {
        Self {
            holder_id: uuid::Uuid::new_v4().to_string(),
            pid: std::process::id(),
            hostname: local_hostname(),
            acquired_at: Utc::now(),
            schema_version: LOCK_SCHEMA_VERSION,
            purpose,
        }
    }

    /// Age relative to `now`; zero if the clock went backwards.
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.acquired_at).to_std().unwrap_or_default()
    }
}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (pid {} on {}, since {})",
            self.holder_id,
            self.pid,
            self.hostname,
            self.acquired_at.to_rfc3339()
        )?;
        if let Some(purpose) = &self.purpose {
            write!(f, " for {purpose}")?;
        }
        Ok(())
    }
}
