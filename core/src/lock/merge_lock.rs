use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::NamedTempFile;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::holder::LockHolder;
use super::liveness::{LivenessProbe, ProcessLiveness};
use crate::config::LockConfig;
use crate::error::LockError;

/// Tunables for [`MergeLock`].
#[derive(Debug, Clone)]
pub struct LockOptions {
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
    pub stale_after: Duration,
    pub allow_reclaim: bool,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self::from(&LockConfig::default())
    }
}

impl From<&LockConfig> for LockOptions {
    fn from(cfg: &LockConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
            max_poll_interval: Duration::from_millis(cfg.max_poll_interval_ms),
            stale_after: cfg.stale_after(),
            allow_reclaim: cfg.allow_reclaim,
        }
    }
}

/// Proof of ownership returned by a successful acquire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    holder: LockHolder,
}

impl LockHandle {
    pub fn holder(&self) -> &LockHolder {
        &self.holder
    }

    pub fn holder_id(&self) -> &str {
        &self.holder.holder_id
    }
}

enum Attempt {
    Acquired(LockHandle),
    Held { holder: String },
    /// The marker changed under us; try again right away.
    Retry,
}

/// Repository-wide mutual exclusion for merges, backed by a marker file.
///
/// The marker is published with a no-clobber rename, so it is either absent or
/// complete and at most one acquirer can create it. Cloning shares the same
/// marker path and probe.
#[derive(Debug, Clone)]
pub struct MergeLock {
    path: PathBuf,
    reclaim_path: PathBuf,
    options: LockOptions,
    probe: Arc<dyn LivenessProbe>,
}

const MAX_IMMEDIATE_RETRIES: usize = 3;

impl MergeLock {
    pub fn new(path: impl Into<PathBuf>, options: LockOptions) -> Self {
        let path = path.into();
        let mut reclaim = path.clone().into_os_string();
        reclaim.push(".reclaim");
        Self {
            path,
            reclaim_path: PathBuf::from(reclaim),
            options,
            probe: Arc::new(ProcessLiveness::new()),
        }
    }

    /// `<state_dir>/<lock.file_name>` with options from config.
    pub fn from_config(state_dir: &Path, cfg: &LockConfig) -> Self {
        Self::new(state_dir.join(&cfg.file_name), LockOptions::from(cfg))
    }

    pub fn with_probe(mut self, probe: Arc<dyn LivenessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Single acquisition attempt (including a stale reclaim if warranted).
    pub fn try_acquire(&self, purpose: Option<&str>) -> Result<LockHandle, LockError> {
        let mut last_holder = String::from("unknown");
        for _ in 0..MAX_IMMEDIATE_RETRIES {
            match self.attempt(purpose)? {
                Attempt::Acquired(handle) => return Ok(handle),
                Attempt::Held { holder } => return Err(LockError::Busy { holder }),
                Attempt::Retry => last_holder = String::from("a concurrent acquirer"),
            }
        }
        Err(LockError::Busy {
            holder: last_holder,
        })
    }

    /// Wait up to `timeout` for the lock, backing off between polls.
    ///
    /// A zero timeout fails fast after one attempt.
    pub async fn acquire(
        &self,
        timeout: Duration,
        purpose: Option<&str>,
    ) -> Result<LockHandle, LockError> {
        let deadline = Instant::now() + timeout;
        let mut delay = self.options.poll_interval;

        loop {
            match self.attempt(purpose)? {
                Attempt::Acquired(handle) => return Ok(handle),
                Attempt::Retry => continue,
                Attempt::Held { holder } => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(LockError::Busy { holder });
                    }
                    debug!(
                        lock = %self.path.display(),
                        holder = %holder,
                        delay_ms = delay.as_millis() as u64,
                        "merge lock busy, waiting"
                    );
                    tokio::time::sleep(delay.min(deadline - now)).await;
                    delay = (delay * 2).min(self.options.max_poll_interval);
                }
            }
        }
    }

    /// Like [`acquire`](Self::acquire) but returns a guard that releases on drop.
    pub async fn acquire_guard(
        &self,
        timeout: Duration,
        purpose: Option<&str>,
    ) -> Result<MergeLockGuard, LockError> {
        let handle = self.acquire(timeout, purpose).await?;
        Ok(MergeLockGuard {
            lock: self.clone(),
            handle: Some(handle),
        })
    }

    /// Remove the marker. Fails with `NotHolder` unless the marker names
    /// `handle`'s holder, and has no side effects in that case.
    pub fn release(&self, handle: &LockHandle) -> Result<(), LockError> {
        let current = match self.read_marker() {
            Ok(Some(holder)) => holder,
            Ok(None) => {
                return Err(LockError::NotHolder {
                    holder_id: handle.holder.holder_id.clone(),
                    current: None,
                })
            }
            Err(e) => return Err(e),
        };

        if current.holder_id != handle.holder.holder_id {
            return Err(LockError::NotHolder {
                holder_id: handle.holder.holder_id.clone(),
                current: Some(current.holder_id),
            });
        }

        fs::remove_file(&self.path).map_err(|e| LockError::io(&self.path, e))?;
        debug!(lock = %self.path.display(), holder_id = %handle.holder.holder_id, "merge lock released");
        Ok(())
    }

    /// Current holder without taking the lock.
    pub fn inspect(&self) -> Result<Option<LockHolder>, LockError> {
        self.read_marker()
    }

    fn read_marker(&self) -> Result<Option<LockHolder>, LockError> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LockError::io(&self.path, e)),
        };
        serde_json::from_slice::<LockHolder>(&bytes)
            .map(Some)
            .map_err(|e| LockError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    fn attempt(&self, purpose: Option<&str>) -> Result<Attempt, LockError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|e| LockError::io(dir, e))?;

        let holder = LockHolder::for_current_process(purpose.map(str::to_string));
        let body = serde_json::to_vec_pretty(&holder).map_err(|e| LockError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| LockError::io(dir, e))?;
        tmp.write_all(&body)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| LockError::io(tmp.path(), e))?;

        match tmp.persist_noclobber(&self.path) {
            Ok(_) => {
                debug!(lock = %self.path.display(), holder_id = %holder.holder_id, "merge lock acquired");
                return Ok(Attempt::Acquired(LockHandle { holder }));
            }
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(LockError::io(&self.path, e.error)),
        }

        self.examine_existing()
    }

    fn examine_existing(&self) -> Result<Attempt, LockError> {
        let raw = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Attempt::Retry),
            Err(e) => return Err(LockError::io(&self.path, e)),
        };

        let (description, age, stale) = match serde_json::from_slice::<LockHolder>(&raw) {
            Ok(holder) => {
                let age = holder.age(Utc::now());
                let stale = age > self.options.stale_after && !self.probe.is_alive(&holder);
                (holder.to_string(), age, stale)
            }
            Err(_) => {
                let age = marker_mtime_age(&self.path).unwrap_or_default();
                let stale = age > self.options.stale_after;
                ("<unreadable marker>".to_string(), age, stale)
            }
        };

        if !stale {
            return Ok(Attempt::Held {
                holder: description,
            });
        }

        if !self.options.allow_reclaim {
            return Err(LockError::Stale {
                holder: description,
                age_secs: age.as_secs(),
            });
        }

        self.reclaim(&raw, &description)
    }

    fn reclaim(&self, observed: &[u8], description: &str) -> Result<Attempt, LockError> {
        // Only one waiter may delete a stale marker.
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.reclaim_path)
        {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if marker_mtime_age(&self.reclaim_path)
                    .is_some_and(|age| age > self.options.stale_after)
                {
                    warn!(path = %self.reclaim_path.display(), "removing abandoned reclaim marker");
                    let _ = fs::remove_file(&self.reclaim_path);
                    return Ok(Attempt::Retry);
                }
                return Ok(Attempt::Held {
                    holder: description.to_string(),
                });
            }
            Err(e) => return Err(LockError::io(&self.reclaim_path, e)),
        }

        let outcome = match fs::read(&self.path) {
            // Still the marker we judged stale
            Ok(current) if current == observed => fs::remove_file(&self.path)
                .or_else(|e| {
                    if e.kind() == ErrorKind::NotFound {
                        Ok(())
                    } else {
                        Err(e)
                    }
                })
                .map(|_| {
                    warn!(
                        lock = %self.path.display(),
                        previous_holder = %description,
                        "reclaimed stale merge lock"
                    );
                })
                .map_err(|e| LockError::io(&self.path, e)),
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LockError::io(&self.path, e)),
        };

        if let Err(e) = fs::remove_file(&self.reclaim_path) {
            warn!(path = %self.reclaim_path.display(), error = %e, "failed to remove reclaim marker");
        }

        outcome.map(|_| Attempt::Retry)
    }
}

fn marker_mtime_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    modified.elapsed().ok()
}

/// Scoped ownership of the merge lock.
///
/// Dropping the guard releases the lock; use [`release`](Self::release) to
/// observe release errors.
#[derive(Debug)]
pub struct MergeLockGuard {
    lock: MergeLock,
    handle: Option<LockHandle>,
}

impl MergeLockGuard {
    pub fn handle(&self) -> Option<&LockHandle> {
        self.handle.as_ref()
    }

    pub fn release(mut self) -> Result<(), LockError> {
        match self.handle.take() {
            Some(handle) => self.lock.release(&handle),
            None => Ok(()),
        }
    }
}

impl Drop for MergeLockGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            match self.lock.release(&handle) {
                Ok(()) => info!(holder_id = %handle.holder_id(), "merge lock released on drop"),
                Err(e) => warn!(holder_id = %handle.holder_id(), error = %e, "merge lock release on drop failed"),
            }
        }
    }
}
