//! Source Model Module
//!
//! Data structures for workflows and experiments, and loading them from
//! YAML source files.
//!
//! # Structure
//!
//! - [`model`]: Workflows, tasks, data and task chains
//! - [`experiment`]: Experiments, spaces, parameters and transitions
//! - [`parser`]: YAML parsing and loading

pub mod experiment;
pub mod model;
pub mod parser;

pub use experiment::{ExperimentModel, ParameterDefinition, SpaceModel, TransitionModel};
pub use model::{DataModel, TaskModel, WorkflowModel, END, START};
pub use parser::{
    load_experiment, load_workflow_file, load_workflow_files, load_workflows_from_dir, LoadError,
};
