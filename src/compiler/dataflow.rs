//! Data-Flow Validation
//!
//! Simulates each space's task order and checks that every input is
//! available before the task consuming it runs. Then checks that every
//! experiment-wide *initial input* (consumed somewhere, produced nowhere)
//! has a concrete value for every space.
//!
//! Both checks aggregate all violations instead of stopping at the first.

use std::collections::{BTreeSet, HashSet};

use log::debug;

use super::error::CompileError;
use super::SpacePlan;
use crate::workflow::model::DataModel;

/// Walks one space's tasks and reports every input used before it exists.
pub fn validate_space(plan: &SpacePlan, experiment_data: &[DataModel]) -> Vec<CompileError> {
    let mut available: HashSet<&str> = experiment_data.iter().map(|d| d.name.as_str()).collect();
    available.extend(plan.workflow_data.iter().map(|d| d.name.as_str()));
    available.extend(plan.space_data.iter().map(|d| d.name.as_str()));

    let mut errors = Vec::new();
    for task in &plan.tasks {
        for input in &task.inputs {
            if !available.contains(input.as_str()) {
                errors.push(CompileError::MissingInput {
                    space: plan.name.clone(),
                    task: task.id.clone(),
                    input: input.clone(),
                });
            }
        }
        available.extend(task.outputs.iter().map(String::as_str));
    }

    errors
}

/// Inputs required by at least one task but produced by none, sorted.
pub fn initial_inputs(plans: &[SpacePlan]) -> Vec<String> {
    let produced: HashSet<&str> = plans
        .iter()
        .flat_map(|p| p.tasks.iter())
        .flat_map(|t| t.outputs.iter().map(String::as_str))
        .collect();

    let required: BTreeSet<&str> = plans
        .iter()
        .flat_map(|p| p.tasks.iter())
        .flat_map(|t| t.inputs.iter().map(String::as_str))
        .filter(|input| !produced.contains(input))
        .collect();

    required.into_iter().map(str::to_string).collect()
}

/// Requires every initial input to have a value at space or experiment level.
pub fn validate_initial_inputs(
    plans: &[SpacePlan],
    experiment_data: &[DataModel],
) -> Vec<CompileError> {
    let inputs = initial_inputs(plans);
    debug!("Initial inputs: {:?}", inputs);

    let has_value = |data: &[DataModel], name: &str| {
        data.iter().any(|d| d.name == name && d.value.is_some())
    };

    let mut errors = Vec::new();
    for plan in plans {
        for input in &inputs {
            if !has_value(&plan.space_data, input) && !has_value(experiment_data, input) {
                errors.push(CompileError::UnsatisfiedInitialInput {
                    space: plan.name.clone(),
                    input: input.clone(),
                });
            }
        }
    }
    errors
}

/// Runs both checks over all spaces.
pub fn validate(plans: &[SpacePlan], experiment_data: &[DataModel]) -> Result<(), CompileError> {
    let mut errors: Vec<CompileError> = plans
        .iter()
        .flat_map(|plan| validate_space(plan, experiment_data))
        .collect();
    errors.extend(validate_initial_inputs(plans, experiment_data));
    CompileError::aggregate(errors)
}
