//! Stage status transition rules.

use super::types::StageStatus;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: StageStatus, to: StageStatus },
    #[error("cannot transition out of terminal status {state}")]
    FromTerminalState { state: StageStatus },
}

pub struct StageTransition;

impl StageTransition {
    /// Validate a status change.
    pub fn validate(from: StageStatus, to: StageStatus) -> Result<(), TransitionError> {
        if from.is_terminal() {
            return Err(TransitionError::FromTerminalState { state: from });
        }

        let is_valid = match (from, to) {
            (StageStatus::Pending, StageStatus::Running) => true,

            (StageStatus::Running, StageStatus::Verified) => true,
            (StageStatus::Running, StageStatus::Failed) => true,
            (StageStatus::Running, StageStatus::Escalated) => true,

            // Retry
            (StageStatus::Running, StageStatus::Pending) => true,

            // A dependency ended in a dead end; the stage is pruned without running.
            (StageStatus::Pending, StageStatus::Failed) => true,

            _ => false,
        };

        if is_valid {
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition { from, to })
        }
    }

    /// A `Running -> Pending` move starts a new attempt.
    pub fn is_retry(from: StageStatus, to: StageStatus) -> bool {
        from == StageStatus::Running && to == StageStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(StageTransition::validate(StageStatus::Pending, StageStatus::Running).is_ok());
        assert!(StageTransition::validate(StageStatus::Running, StageStatus::Verified).is_ok());
        assert!(StageTransition::validate(StageStatus::Running, StageStatus::Pending).is_ok());
        assert!(StageTransition::validate(StageStatus::Running, StageStatus::Escalated).is_ok());
        assert!(StageTransition::validate(StageStatus::Pending, StageStatus::Failed).is_ok());
    }

    #[test]
    fn test_invalid_transitions() {
        assert_eq!(
            StageTransition::validate(StageStatus::Pending, StageStatus::Verified),
            Err(TransitionError::InvalidTransition {
                from: StageStatus::Pending,
                to: StageStatus::Verified,
            })
        );
        assert!(StageTransition::validate(StageStatus::Running, StageStatus::Running).is_err());
    }

    #[test]
    fn test_terminal_states() {
        for terminal in [StageStatus::Verified, StageStatus::Failed, StageStatus::Escalated] {
            assert_eq!(
                StageTransition::validate(terminal, StageStatus::Pending),
                Err(TransitionError::FromTerminalState { state: terminal })
            );
        }
    }

    #[test]
    fn test_retry_detection() {
        assert!(StageTransition::is_retry(StageStatus::Running, StageStatus::Pending));
        assert!(!StageTransition::is_retry(StageStatus::Pending, StageStatus::Running));
    }
}
