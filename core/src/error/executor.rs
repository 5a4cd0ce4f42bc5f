use thiserror::Error;

use crate::stage::FailureClass;

/// Failure reported by the external stage executor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("transient executor failure ({class}): {message}")]
    Transient { class: FailureClass, message: String },

    #[error("permanent executor failure ({class}): {message}")]
    Permanent { class: FailureClass, message: String },
}

impl ExecutorError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            class: FailureClass::Transient,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Transient {
            class: FailureClass::Network,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Transient {
            class: FailureClass::Timeout,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            class: FailureClass::Permanent,
            message: message.into(),
        }
    }

    pub fn contract(message: impl Into<String>) -> Self {
        Self::Permanent {
            class: FailureClass::Contract,
            message: message.into(),
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            Self::Transient { class, .. } | Self::Permanent { class, .. } => *class,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient { message, .. } | Self::Permanent { message, .. } => message,
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. })
    }
}

/// Failure reported by the repository merge backend.
#[derive(Error, Debug)]
pub enum MergeError {
    /// Backends that cannot express a conflict as an outcome report it here.
    #[error("merge conflict in {} file(s)", .files.len())]
    Conflict { files: Vec<String> },

    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("merge io error: {0}")]
    Io(#[from] std::io::Error),
}
