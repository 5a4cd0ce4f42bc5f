use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::health::{Decision, FailureEvent, HealthPhase, StageHealth};
use super::policy::{ClassSetPolicy, TransientPolicy};
use crate::config::MonitorConfig;
use crate::error::ConfigError;
use crate::stage::{FailureClass, StageId};

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub max_attempts: u32,
    pub heartbeat_timeout: Duration,
    pub failure_window: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

impl From<&MonitorConfig> for MonitorOptions {
    fn from(cfg: &MonitorConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            heartbeat_timeout: cfg.heartbeat_timeout(),
            failure_window: cfg.failure_window(),
        }
    }
}

/// Tracks per-stage liveness and failures and turns them into retry or
/// escalation decisions.
pub struct FailureMonitor {
    options: MonitorOptions,
    policy: Arc<dyn TransientPolicy>,
    stages: Mutex<HashMap<StageId, StageHealth>>,
}

impl std::fmt::Debug for FailureMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureMonitor")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl FailureMonitor {
    pub fn new(options: MonitorOptions) -> Self {
        Self::with_policy(options, Arc::new(ClassSetPolicy::default()))
    }

    pub fn with_policy(options: MonitorOptions, policy: Arc<dyn TransientPolicy>) -> Self {
        Self {
            options,
            policy,
            stages: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(cfg: &MonitorConfig) -> Result<Self, ConfigError> {
        Ok(Self::with_policy(
            MonitorOptions::from(cfg),
            Arc::new(ClassSetPolicy::from_config(cfg)?),
        ))
    }

    pub fn options(&self) -> &MonitorOptions {
        &self.options
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<StageId, StageHealth>> {
        self.stages.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A new attempt starts. Returns its 1-based attempt number.
    pub fn record_start(&self, id: &StageId) -> u32 {
        let mut stages = self.lock();
        let health = stages.entry(id.clone()).or_default();
        health.attempts += 1;
        health.last_heartbeat = Some(Instant::now());
        health.pending_failure = None;
        if health.phase != HealthPhase::Escalated {
            health.phase = HealthPhase::Healthy;
        }
        debug!(stage_id = %id, attempt = health.attempts, "stage attempt started");
        health.attempts
    }

    pub fn record_heartbeat(&self, id: &StageId) {
        let mut stages = self.lock();
        if let Some(health) = stages.get_mut(id) {
            if health.phase == HealthPhase::Healthy {
                health.last_heartbeat = Some(Instant::now());
            }
        }
    }

    /// Record a failure whose retryability is left to the transient policy.
    pub fn record_failure(
        &self,
        id: &StageId,
        class: FailureClass,
        message: impl Into<String>,
    ) -> FailureEvent {
        self.push_failure(id, class, false, message.into())
    }

    /// Record a failure its source declared non-retryable. The next
    /// [`decide`](Self::decide) escalates regardless of the class.
    pub fn record_permanent_failure(
        &self,
        id: &StageId,
        class: FailureClass,
        message: impl Into<String>,
    ) -> FailureEvent {
        self.push_failure(id, class, true, message.into())
    }

    fn push_failure(
        &self,
        id: &StageId,
        class: FailureClass,
        permanent: bool,
        message: String,
    ) -> FailureEvent {
        let now = Instant::now();
        let mut stages = self.lock();
        let health = stages.entry(id.clone()).or_default();

        health.prune(now, self.options.failure_window);
        health.failures.push_back((now, class));

        let event = FailureEvent {
            stage_id: id.clone(),
            attempt: health.attempts,
            class,
            permanent,
            message,
            at: Utc::now(),
        };
        health.pending_failure = Some(event.clone());
        if health.phase != HealthPhase::Escalated {
            health.phase = HealthPhase::Failed;
        }
        event
    }

    pub fn record_success(&self, id: &StageId) {
        let mut stages = self.lock();
        let health = stages.entry(id.clone()).or_default();
        health.pending_failure = None;
        if health.phase != HealthPhase::Escalated {
            health.phase = HealthPhase::Succeeded;
        }
    }

    /// Forget everything known about `ids`: attempts, failure window and
    /// escalation. Called when a new run takes the stages over.
    pub fn reset<'a>(&self, ids: impl IntoIterator<Item = &'a StageId>) {
        let mut stages = self.lock();
        for id in ids {
            stages.remove(id);
        }
    }

    /// Mark healthy stages whose last heartbeat is older than the heartbeat
    /// timeout as stalled. Returns the newly stalled ids, sorted.
    pub fn check_stalls(&self) -> Vec<StageId> {
        let now = Instant::now();
        let mut stalled = Vec::new();
        let mut stages = self.lock();

        for (id, health) in stages.iter_mut() {
            if health.phase != HealthPhase::Healthy {
                continue;
            }
            let Some(last) = health.last_heartbeat else {
                continue;
            };
            if now.saturating_duration_since(last) > self.options.heartbeat_timeout {
                health.phase = HealthPhase::Stalled;
                stalled.push(id.clone());
            }
        }

        stalled.sort();
        for id in &stalled {
            warn!(stage_id = %id, timeout_ms = self.options.heartbeat_timeout.as_millis() as u64, "stage stalled");
        }
        stalled
    }

    pub fn is_stalled(&self, id: &StageId) -> bool {
        self.lock()
            .get(id)
            .is_some_and(|h| h.phase == HealthPhase::Stalled)
    }

    pub fn health(&self, id: &StageId) -> Option<StageHealth> {
        self.lock().get(id).cloned()
    }

    /// Retry or escalate the pending failure of `id`.
    ///
    /// Escalation is final: once returned, every later call returns it too.
    pub fn decide(&self, id: &StageId) -> Decision {
        let now = Instant::now();
        let mut stages = self.lock();
        let Some(health) = stages.get_mut(id) else {
            return Decision::Continue;
        };

        if health.phase == HealthPhase::Escalated {
            return Decision::Escalate;
        }
        let Some((class, permanent)) = health
            .pending_failure
            .as_ref()
            .map(|f| (f.class, f.permanent))
        else {
            return Decision::Continue;
        };

        health.prune(now, self.options.failure_window);
        let max = self.options.max_attempts;
        let retry = !permanent
            && health.attempts < max
            && self.policy.is_transient(class)
            && (health.failures.len() as u32) < max;

        if retry {
            Decision::Retry
        } else {
            health.phase = HealthPhase::Escalated;
            Decision::Escalate
        }
    }
}
