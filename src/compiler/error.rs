//! Compile-time errors and warnings.

use std::fmt;

use thiserror::Error;

use crate::execution::condition::ConditionError;

/// Fatal problems that abort artifact generation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("Experiment has no spaces")]
    EmptyExperiment,

    #[error("Duplicate space name: '{0}'")]
    DuplicateSpace(String),

    #[error("Space '{space}' references undefined workflow '{workflow}'")]
    UndefinedWorkflow { space: String, workflow: String },

    #[error("Workflow '{workflow}' extends undefined parent '{parent}'")]
    UndefinedParent { workflow: String, parent: String },

    #[error("Circular inheritance: {}", chain.join(" -> "))]
    CircularInheritance { chain: Vec<String> },

    #[error("Workflow '{workflow}' re-declares task '{task}' inherited from '{ancestor}'; configure it instead")]
    IllegalOverride {
        workflow: String,
        task: String,
        ancestor: String,
    },

    #[error("Workflow '{workflow}' declares task '{task}' more than once")]
    DuplicateTask { workflow: String, task: String },

    #[error("{scope} references undefined task '{task}'")]
    UndefinedTask { scope: String, task: String },

    #[error("Workflow '{workflow}' has a malformed task chain (expected START ... END)")]
    MalformedChain { workflow: String },

    #[error("Space '{space}': task has no implementation: '{task}'")]
    MissingImplementation { space: String, task: String },

    #[error("Space '{space}' declares parameter '{parameter}' more than once")]
    DuplicateParameter { space: String, parameter: String },

    #[error("Space '{space}': parameter '{parameter}' has an invalid range: {reason}")]
    InvalidRange {
        space: String,
        parameter: String,
        reason: String,
    },

    #[error("Space '{space}': parameter '{parameter}' has an empty value domain")]
    EmptyDomain { space: String, parameter: String },

    #[error("Space '{space}': task '{task}' requires input '{input}' which is not available at that point")]
    MissingInput {
        space: String,
        task: String,
        input: String,
    },

    #[error("Space '{space}': initial input '{input}' has no value at space or experiment level")]
    UnsatisfiedInitialInput { space: String, input: String },

    #[error("Control flow has no START transition")]
    MissingStart,

    #[error("Control flow has more than one START transition: {}", targets.join(", "))]
    AmbiguousStart { targets: Vec<String> },

    #[error("Transition {from} -> {to} references undefined space '{space}'")]
    UndefinedSpace {
        from: String,
        to: String,
        space: String,
    },

    #[error("Transition {from} -> {to} has an invalid condition: {source}")]
    InvalidCondition {
        from: String,
        to: String,
        source: ConditionError,
    },

    #[error("END is not reachable from start space '{start}'")]
    UnreachableEnd { start: String },

    #[error("Space '{space}' is not reachable from start space '{start}'")]
    UnreachableSpace { space: String, start: String },

    #[error("{} compile errors:\n{}", .0.len(), format_multiple(.0))]
    Multiple(Vec<CompileError>),
}

fn format_multiple(errors: &[CompileError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

impl CompileError {
    /// Folds a list of errors into a single error, or `Ok` when empty.
    pub fn aggregate(mut errors: Vec<CompileError>) -> Result<(), CompileError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(CompileError::Multiple(errors)),
        }
    }

    /// Flattens nested aggregates into individual errors.
    pub fn into_list(self) -> Vec<CompileError> {
        match self {
            CompileError::Multiple(errors) => {
                errors.into_iter().flat_map(|e| e.into_list()).collect()
            }
            other => vec![other],
        }
    }
}

/// Non-fatal advisory findings.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileWarning {
    /// A dynamic parameter no space parameter definition provides
    UnboundDynamicParameter {
        space: String,
        task: String,
        parameter: String,
    },
    /// A space whose workflow resolves to no tasks
    EmptySpace { space: String },
    /// A workflow not referenced by any space
    UnusedWorkflow { workflow: String },
}

impl fmt::Display for CompileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnboundDynamicParameter {
                space,
                task,
                parameter,
            } => write!(
                f,
                "Space '{}': task '{}' parameter '{}' is dynamic but the space does not define it",
                space, task, parameter
            ),
            Self::EmptySpace { space } => write!(f, "Space '{}' has no tasks to execute", space),
            Self::UnusedWorkflow { workflow } => {
                write!(f, "Workflow '{}' is not used by any space", workflow)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_empty_is_ok() {
        assert!(CompileError::aggregate(Vec::new()).is_ok());
    }

    #[test]
    fn test_aggregate_single_is_unwrapped() {
        let err = CompileError::aggregate(vec![CompileError::MissingStart]).unwrap_err();
        assert_eq!(err, CompileError::MissingStart);
    }

    #[test]
    fn test_multiple_lists_every_error() {
        let err = CompileError::aggregate(vec![
            CompileError::DuplicateSpace("A".to_string()),
            CompileError::DuplicateSpace("B".to_string()),
        ])
        .unwrap_err();

        let text = err.to_string();
        assert!(text.starts_with("2 compile errors"));
        assert!(text.contains("'A'"));
        assert!(text.contains("'B'"));
        assert_eq!(err.into_list().len(), 2);
    }

    #[test]
    fn test_circular_inheritance_display() {
        let err = CompileError::CircularInheritance {
            chain: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(err.to_string(), "Circular inheritance: A -> B -> A");
    }

    #[test]
    fn test_warning_display() {
        let warning = CompileWarning::EmptySpace {
            space: "S".to_string(),
        };
        assert!(warning.to_string().contains("'S'"));
    }
}
