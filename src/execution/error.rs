//! Run-time errors.

use thiserror::Error;

use super::condition::ConditionError;
use crate::compiler::ArtifactError;
use crate::repository::RepositoryError;

/// Fatal problems that abort a run.
///
/// Task, space and parameter-set identifiers are carried so failures can
/// be matched against persisted history.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Task '{task}' failed in space '{space}', parameter set {param_set}: {message}")]
    TaskFailed {
        space: String,
        param_set: usize,
        task: String,
        message: String,
    },

    #[error("No transition condition evaluated to true from space '{space}'")]
    NoTransition { space: String },

    #[error("Transition condition '{condition}' from space '{space}' is invalid: {source}")]
    Condition {
        space: String,
        condition: String,
        source: ConditionError,
    },

    #[error("Artifact references unknown task '{task}' in space '{space}'")]
    UnknownTask { space: String, task: String },

    #[error("Artifact references unknown space '{0}'")]
    UnknownSpace(String),

    #[error("Task '{task}' needs parameter '{parameter}' but parameter set {param_set} of space '{space}' does not provide it")]
    MissingParameter {
        space: String,
        param_set: usize,
        task: String,
        parameter: String,
    },

    #[error("Task '{task}' needs input '{input}' but no value is recorded for it (space '{space}', parameter set {param_set})")]
    MissingInputValue {
        space: String,
        param_set: usize,
        task: String,
        input: String,
    },

    #[error("Run '{run_id}' was created from artifact {expected} but the current artifact hashes to {actual}")]
    ArtifactMismatch {
        run_id: String,
        expected: String,
        actual: String,
    },

    #[error("Run '{0}' was terminated")]
    Terminated(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Failed to read user input: {0}")]
    Input(String),

    #[error("Run limiter is closed")]
    LimiterClosed,

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunError {
    /// Terminated runs can be resumed and are not reported as failures.
    pub fn is_termination(&self) -> bool {
        matches!(self, RunError::Terminated(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_failure_carries_identifiers() {
        let err = RunError::TaskFailed {
            space: "S".to_string(),
            param_set: 2,
            task: "W:t1".to_string(),
            message: "exit status 1".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("'W:t1'"));
        assert!(text.contains("'S'"));
        assert!(text.contains("parameter set 2"));
    }

    #[test]
    fn test_no_transition_message() {
        let err = RunError::NoTransition {
            space: "S".to_string(),
        };
        assert!(err
            .to_string()
            .contains("No transition condition evaluated to true"));
        assert!(!err.is_termination());
        assert!(RunError::Terminated("r".into()).is_termination());
    }
}
