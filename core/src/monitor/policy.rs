use std::collections::BTreeSet;

use crate::config::MonitorConfig;
use crate::error::ConfigError;
use crate::stage::FailureClass;

/// Decides which failure classes are worth another attempt.
pub trait TransientPolicy: Send + Sync {
    fn is_transient(&self, class: FailureClass) -> bool;
}

impl<F> TransientPolicy for F
where
    F: Fn(FailureClass) -> bool + Send + Sync,
{
    fn is_transient(&self, class: FailureClass) -> bool {
        self(class)
    }
}

/// A fixed set of retryable classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSetPolicy {
    classes: BTreeSet<FailureClass>,
}

impl ClassSetPolicy {
    pub fn new(classes: impl IntoIterator<Item = FailureClass>) -> Self {
        Self {
            classes: classes.into_iter().collect(),
        }
    }

    pub fn from_config(cfg: &MonitorConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(cfg.transient_class_set()?))
    }

    pub fn classes(&self) -> impl Iterator<Item = FailureClass> + '_ {
        self.classes.iter().copied()
    }
}

impl Default for ClassSetPolicy {
    fn default() -> Self {
        Self::new([
            FailureClass::Network,
            FailureClass::Timeout,
            FailureClass::Stalled,
            FailureClass::LockBusy,
            FailureClass::Transient,
        ])
    }
}

impl TransientPolicy for ClassSetPolicy {
    fn is_transient(&self, class: FailureClass) -> bool {
        self.classes.contains(&class)
    }
}
