use thiserror::Error;

use crate::stage::{StageId, TransitionError};

/// Plan-scoped errors. Any of these aborts the whole run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("duplicate stage id: {0}")]
    DuplicateStage(StageId),

    #[error("invalid stage id '{0}': use ASCII letters, digits, '-', '_' or '.'")]
    InvalidStageId(StageId),

    #[error("dependency not found: stage '{stage}' depends on '{missing}'")]
    DependencyNotFound { stage: StageId, missing: StageId },

    #[error("stage '{0}' depends on itself")]
    SelfDependency(StageId),

    #[error("circular dependency detected: {path}")]
    Cycle { path: String, stages: Vec<StageId> },

    #[error("unknown stage: {0}")]
    UnknownStage(StageId),

    #[error("stage '{stage}': {source}")]
    Transition {
        stage: StageId,
        #[source]
        source: TransitionError,
    },
}

impl GraphError {
    pub(crate) fn cycle(stages: Vec<StageId>) -> Self {
        let path = stages
            .iter()
            .map(StageId::as_str)
            .collect::<Vec<_>>()
            .join(" -> ");
        Self::Cycle { path, stages }
    }
}
