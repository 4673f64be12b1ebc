//! Experiment Execution Module
//!
//! Runs a compiled artifact: one space at a time along the control graph,
//! parameter sets in index order, tasks in chain order. All progress is
//! persisted in a run repository so an interrupted run can be resumed.
//!
//! # Architecture
//!
//! - [`engine`]: Run orchestration, resume and termination
//! - [`control`]: Chooses the next space after one completes
//! - [`condition`]: Restricted expression language for transitions
//! - [`space`]: Executes the parameter sets of one space
//! - [`task`]: Runs a task implementation as a subprocess
//! - [`data`]: Collects the results of a run
//! - [`progress`]: Progress event fan-out
//! - [`input`]: User input for conditional transitions
//! - [`limiter`]: Bounds concurrently executing runs

pub mod condition;
pub mod context;
pub mod control;
pub mod data;
pub mod engine;
pub mod error;
pub mod input;
pub mod limiter;
pub mod progress;
pub mod space;
pub mod task;

pub use condition::{Condition, ConditionError};
pub use context::{RunContext, TerminationHandle};
pub use control::ControlFlowManager;
pub use data::{DataManager, RunResults};
pub use engine::{Engine, RunSummary};
pub use error::RunError;
pub use input::{ConsoleInputProvider, InputProvider, ScriptedInputProvider};
pub use limiter::RunLimiter;
pub use progress::{ProgressEmitter, ProgressEvent};
pub use space::SpaceExecutor;
pub use task::{TaskError, TaskExecutor, DRY_RUN_VALUE};
