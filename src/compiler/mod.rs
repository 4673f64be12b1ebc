//! Artifact Compiler
//!
//! Turns an experiment plus the workflows it references into an
//! executable [`Artifact`]:
//!
//! - [`inheritance`]: flattens workflow parent chains
//! - [`params`]: expands parameter spaces into concrete sets
//! - [`resolver`]: merges tasks with their configurations, per space
//! - [`dedup`]: collapses structurally identical tasks
//! - [`dataflow`]: checks every input exists before it is consumed
//! - [`control`]: builds and checks the space transition graph
//! - [`artifact`]: the IR and its JSON persistence

pub mod artifact;
pub mod control;
pub mod dataflow;
pub mod dedup;
pub mod error;
pub mod inheritance;
pub mod params;
pub mod resolver;

use std::collections::{BTreeMap, HashSet};

use log::{debug, info, warn};

pub use artifact::{
    load_artifact, save_artifact, Artifact, ArtifactError, ControlDefinition, SpaceDefinition,
    TaskDefinition, ARTIFACT_VERSION,
};
pub use control::{ControlGraph, Transition};
pub use error::{CompileError, CompileWarning};
pub use params::ParameterSet;

use crate::workflow::experiment::ExperimentModel;
use crate::workflow::model::{DataModel, WorkflowModel};
use inheritance::InheritanceResolver;
use resolver::ResolvedTask;

/// Everything the compiler knows about one space before assembly.
#[derive(Debug, Clone)]
pub struct SpacePlan {
    pub name: String,
    pub workflow: String,
    /// Resolved tasks in execution order
    pub tasks: Vec<ResolvedTask>,
    /// Data slots of the workflow and its ancestors
    pub workflow_data: Vec<DataModel>,
    pub space_data: Vec<DataModel>,
    pub parameter_sets: Vec<ParameterSet>,
}

/// Successful compile output.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub artifact: Artifact,
    pub warnings: Vec<CompileWarning>,
}

/// Compiles one experiment against a set of workflow definitions.
pub struct Compiler<'a> {
    experiment: &'a ExperimentModel,
    workflows: &'a [WorkflowModel],
}

impl<'a> Compiler<'a> {
    pub fn new(experiment: &'a ExperimentModel, workflows: &'a [WorkflowModel]) -> Self {
        Self {
            experiment,
            workflows,
        }
    }

    /// Runs every compile stage, stopping after the first stage that fails.
    ///
    /// Within a stage, all errors found are reported together.
    pub fn compile(&self) -> Result<Compilation, CompileError> {
        let experiment = self.experiment;
        info!("Compiling experiment '{}'", experiment.name);

        self.check_spaces()?;

        let mut warnings = Vec::new();
        let plans = self.plan_spaces(&mut warnings)?;

        dataflow::validate(&plans, &experiment.data)?;

        let graph = control::build_control(experiment)?;

        let discovered: Vec<ResolvedTask> =
            plans.iter().flat_map(|p| p.tasks.iter().cloned()).collect();
        let dedup = dedup::deduplicate(&discovered);
        debug!(
            "{} resolved task(s) collapsed to {} definition(s)",
            discovered.len(),
            dedup.task_count()
        );

        let tasks = dedup
            .groups
            .iter()
            .map(|group| group.iter().map(task_definition).collect())
            .collect();

        let spaces = plans
            .iter()
            .map(|plan| SpaceDefinition {
                space_id: plan.name.clone(),
                tasks_order: plan
                    .tasks
                    .iter()
                    .map(|t| {
                        dedup
                            .canonical_id(&plan.name, &t.id)
                            .unwrap_or(&t.id)
                            .to_string()
                    })
                    .collect(),
                parameters: plan.parameter_sets.clone(),
                input_data: input_values(&experiment.data, &plan.space_data),
            })
            .collect();

        let artifact = Artifact {
            experiment: experiment.name.clone(),
            version: ARTIFACT_VERSION.to_string(),
            tasks,
            spaces,
            control: ControlDefinition {
                start: graph.start,
                transitions: graph.transitions,
            },
        };

        let referenced: HashSet<String> = experiment.referenced_workflows().into_iter().collect();
        let mut unused: Vec<&str> = self
            .workflows
            .iter()
            .map(|w| w.name.as_str())
            .filter(|name| !referenced.contains(*name))
            .filter(|name| !self.is_ancestor_of_referenced(name, &referenced))
            .collect();
        unused.sort_unstable();
        warnings.extend(unused.into_iter().map(|workflow| CompileWarning::UnusedWorkflow {
            workflow: workflow.to_string(),
        }));

        for warning in &warnings {
            warn!("{}", warning);
        }
        info!(
            "Compiled '{}': {} space(s), {} task definition(s), {} warning(s)",
            artifact.experiment,
            artifact.spaces.len(),
            artifact.task_count(),
            warnings.len()
        );

        Ok(Compilation { artifact, warnings })
    }

    fn check_spaces(&self) -> Result<(), CompileError> {
        if self.experiment.spaces.is_empty() {
            return Err(CompileError::EmptyExperiment);
        }

        let mut seen = HashSet::new();
        let mut errors = Vec::new();
        for space in &self.experiment.spaces {
            if !seen.insert(space.name.as_str()) {
                errors.push(CompileError::DuplicateSpace(space.name.clone()));
            }
        }
        CompileError::aggregate(errors)
    }

    /// Resolves inheritance, expands parameters and resolves tasks per space.
    fn plan_spaces(&self, warnings: &mut Vec<CompileWarning>) -> Result<Vec<SpacePlan>, CompileError> {
        let mut resolver = InheritanceResolver::new(self.workflows);
        let mut errors: Vec<CompileError> = Vec::new();
        let mut plans = Vec::new();

        for space in &self.experiment.spaces {
            if !resolver.contains(&space.workflow) {
                errors.push(CompileError::UndefinedWorkflow {
                    space: space.name.clone(),
                    workflow: space.workflow.clone(),
                });
                continue;
            }

            let workflow = match resolver.resolve(&space.workflow) {
                Ok(workflow) => workflow.clone(),
                Err(e) => {
                    if !errors.contains(&e) {
                        errors.push(e);
                    }
                    continue;
                }
            };

            let parameter_sets = match params::expand_space(space) {
                Ok(sets) => sets,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };

            match resolver::resolve_space_tasks(space, &workflow) {
                Ok(resolution) => {
                    warnings.extend(resolution.warnings);
                    plans.push(SpacePlan {
                        name: space.name.clone(),
                        workflow: workflow.name.clone(),
                        tasks: resolution.tasks,
                        workflow_data: workflow.data.clone(),
                        space_data: space.data.clone(),
                        parameter_sets,
                    });
                }
                Err(e) => errors.extend(e.into_list()),
            }
        }

        CompileError::aggregate(errors)?;
        Ok(plans)
    }

    fn is_ancestor_of_referenced(&self, name: &str, referenced: &HashSet<String>) -> bool {
        let by_name: BTreeMap<&str, &WorkflowModel> =
            self.workflows.iter().map(|w| (w.name.as_str(), w)).collect();

        referenced.iter().any(|start| {
            let mut current = by_name.get(start.as_str()).and_then(|w| w.parent.as_deref());
            let mut steps = 0;
            while let Some(parent) = current {
                if parent == name {
                    return true;
                }
                steps += 1;
                if steps > by_name.len() {
                    break;
                }
                current = by_name.get(parent).and_then(|w| w.parent.as_deref());
            }
            false
        })
    }
}

fn task_definition(task: &ResolvedTask) -> TaskDefinition {
    TaskDefinition {
        task_id: task.id.clone(),
        workflow: task.workflow.clone(),
        implementation: task.implementation.clone(),
        dynamic_parameters: task.dynamic_parameters.clone(),
        static_parameters: task.static_parameters.clone(),
        input_data: task.inputs.clone(),
        output_data: task.outputs.clone(),
    }
}

/// Concrete data values for a space; space values override experiment values.
fn input_values(experiment: &[DataModel], space: &[DataModel]) -> BTreeMap<String, String> {
    experiment
        .iter()
        .chain(space.iter())
        .filter_map(|d| d.value.as_ref().map(|v| (d.name.clone(), v.clone())))
        .collect()
}

/// Convenience wrapper around [`Compiler`].
pub fn compile(
    experiment: &ExperimentModel,
    workflows: &[WorkflowModel],
) -> Result<Compilation, CompileError> {
    Compiler::new(experiment, workflows).compile()
}
