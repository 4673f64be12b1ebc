//! ExpFlow - Experiment Compiler and Execution Engine
//!
//! Compiles a declarative experiment (workflows of tasks, parameter spaces
//! and a control graph between them) into a self-contained JSON artifact,
//! then executes that artifact with every unit of progress persisted so a
//! crashed or stopped run picks up where it left off.
//!
//! # Architecture
//!
//! - [`workflow`]: Source model and YAML loading
//! - [`compiler`]: Inheritance, parameter expansion, validation, artifact
//! - [`execution`]: Run engine, control flow, task subprocesses
//! - [`repository`]: Durable run state
//! - [`monitoring`]: Resource usage tracking and execution timeline
//! - [`config`]: Settings file and environment overrides
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use expflow::execution::Engine;
//! use expflow::repository::MemoryRunRepository;
//! use expflow::{compile, load_experiment, load_workflows_from_dir};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load the sources
//!     let workflows = load_workflows_from_dir("workflows")?;
//!     let experiment = load_experiment("experiment.yaml")?;
//!
//!     // Compile and execute
//!     let compilation = compile(&experiment, &workflows)?;
//!     let engine = Engine::new(compilation.artifact, Arc::new(MemoryRunRepository::new()));
//!     let summary = engine.run().await?;
//!     println!("{:?}", summary.results);
//!     Ok(())
//! }
//! ```

pub mod compiler;
pub mod config;
pub mod execution;
pub mod monitoring;
pub mod repository;
pub mod workflow;

// Re-export commonly used types
pub use compiler::{compile, load_artifact, save_artifact, Artifact, Compilation, Compiler};
pub use config::Settings;
pub use execution::{Engine, RunError, RunSummary};
pub use repository::{FileRunRepository, MemoryRunRepository, RunRepository};
pub use workflow::parser::{load_experiment, load_workflow_file, load_workflows_from_dir};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "ExpFlow";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exports_compile_pipeline() {
        use crate::workflow::experiment::SpaceModel;
        use crate::workflow::model::{TaskModel, WorkflowModel};
        use crate::workflow::ExperimentModel;

        let workflow = WorkflowModel::new("W")
            .with_task(TaskModel::new("t").with_implementation("./t.sh"));
        let experiment = ExperimentModel::new("E").with_space(SpaceModel::new("S", "W"));

        let compilation = compile(&experiment, &[workflow]).unwrap();
        assert_eq!(compilation.artifact.spaces[0].tasks_order, vec!["W:t"]);
    }
}
