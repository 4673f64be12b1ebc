//! Task Resolution
//!
//! For every (space, task) pair, merges the inherited task with its
//! nearest configuration. Precedence, strongest first:
//!
//! 1. space-level `taskConfigurations`
//! 2. workflow-level `taskConfigurations` (child over parent)
//! 3. the task's inline declaration
//!
//! The result is a flat [`ResolvedTask`] keyed by `workflow:name`, where
//! `workflow` is the space's workflow.

use std::collections::BTreeMap;

use serde_json::Value;

use super::error::{CompileError, CompileWarning};
use super::inheritance::ResolvedWorkflow;
use crate::workflow::experiment::SpaceModel;
use crate::workflow::model::{task_id, TaskModel};

/// A fully configured task as seen from one space.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTask {
    /// `workflow:name`
    pub id: String,
    pub name: String,
    /// The space's workflow this task was resolved through
    pub workflow: String,
    /// The ancestor that declared the task
    pub declared_in: String,
    /// Inheritance depth of `workflow`
    pub depth: usize,
    /// Space this task was resolved for
    pub space: String,
    pub implementation: String,
    pub dynamic_parameters: Vec<String>,
    pub static_parameters: BTreeMap<String, Value>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// Resolution output for one space.
#[derive(Debug, Default)]
pub struct SpaceResolution {
    /// Tasks in execution order
    pub tasks: Vec<ResolvedTask>,
    pub warnings: Vec<CompileWarning>,
}

/// Resolves every task of a space's workflow, in execution order.
///
/// Errors are collected so a single compile reports every task lacking
/// an implementation.
pub fn resolve_space_tasks(
    space: &SpaceModel,
    workflow: &ResolvedWorkflow,
) -> Result<SpaceResolution, CompileError> {
    let mut errors = Vec::new();

    for config in &space.task_configurations {
        if workflow.get_task(&config.task).is_none() {
            errors.push(CompileError::UndefinedTask {
                scope: format!("Space '{}' configuration", space.name),
                task: config.task.clone(),
            });
        }
    }

    let space_parameters: Vec<&str> = space.parameters.iter().map(|p| p.name.as_str()).collect();
    let mut resolution = SpaceResolution::default();

    for name in workflow.execution_order() {
        let Some(base) = workflow.get_task(&name) else {
            // chains are validated during inheritance resolution
            continue;
        };

        let mut task: TaskModel = base.clone();
        for config in space.task_configurations.iter().filter(|c| c.task == name) {
            task.apply(config);
        }

        let id = task_id(&workflow.name, &task.name);

        if task.is_abstract() {
            errors.push(CompileError::MissingImplementation {
                space: space.name.clone(),
                task: id,
            });
            continue;
        }

        let mut dynamic_parameters = Vec::new();
        let mut static_parameters = BTreeMap::new();
        for parameter in &task.parameters {
            match &parameter.value {
                Some(value) => {
                    static_parameters.insert(parameter.name.clone(), value.clone());
                }
                None => {
                    if !space_parameters.contains(&parameter.name.as_str()) {
                        resolution.warnings.push(CompileWarning::UnboundDynamicParameter {
                            space: space.name.clone(),
                            task: id.clone(),
                            parameter: parameter.name.clone(),
                        });
                    }
                    dynamic_parameters.push(parameter.name.clone());
                }
            }
        }

        resolution.tasks.push(ResolvedTask {
            id,
            name: task.name.clone(),
            workflow: workflow.name.clone(),
            declared_in: task.workflow.clone(),
            depth: workflow.depth,
            space: space.name.clone(),
            implementation: task.implementation.clone().unwrap_or_default(),
            dynamic_parameters,
            static_parameters,
            inputs: task.inputs.clone(),
            outputs: task.outputs.clone(),
        });
    }

    if resolution.tasks.is_empty() && errors.is_empty() {
        resolution.warnings.push(CompileWarning::EmptySpace {
            space: space.name.clone(),
        });
    }

    CompileError::aggregate(errors)?;
    Ok(resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::inheritance::InheritanceResolver;
    use crate::workflow::experiment::ParameterDefinition;
    use crate::workflow::model::{TaskChain, TaskConfiguration, TaskParameter, WorkflowModel};
    use serde_json::json;

    fn resolved(workflows: &[WorkflowModel], name: &str) -> ResolvedWorkflow {
        InheritanceResolver::new(workflows).resolve(name).unwrap().clone()
    }

    fn workflows() -> Vec<WorkflowModel> {
        vec![
            WorkflowModel::new("W")
                .with_task(
                    TaskModel::new("t1")
                        .with_implementation("./t1.sh")
                        .with_parameter(TaskParameter::bound("seed", 1))
                        .with_parameter(TaskParameter::dynamic("rate"))
                        .with_outputs(vec!["a".to_string()]),
                )
                .with_task(TaskModel::new("t2").with_inputs(vec!["a".to_string()]))
                .with_configuration(TaskConfiguration::for_task("t2").with_implementation("./t2.sh"))
                .with_chain(TaskChain::from_tasks(["t1", "t2"])),
        ]
    }

    #[test]
    fn test_resolve_static_and_dynamic() {
        let workflows = workflows();
        let workflow = resolved(&workflows, "W");
        let space = SpaceModel::new("S", "W").with_parameter(ParameterDefinition::enumeration(
            "rate",
            vec![json!(0.1)],
        ));

        let resolution = resolve_space_tasks(&space, &workflow).unwrap();
        let t1 = &resolution.tasks[0];

        assert_eq!(t1.id, "W:t1");
        assert_eq!(t1.static_parameters.get("seed"), Some(&json!(1)));
        assert_eq!(t1.dynamic_parameters, vec!["rate"]);
        assert_eq!(resolution.tasks[1].implementation, "./t2.sh");
        assert!(resolution.warnings.is_empty());
    }

    #[test]
    fn test_space_configuration_takes_precedence() {
        let workflows = workflows();
        let workflow = resolved(&workflows, "W");
        let space = SpaceModel::new("S", "W").with_configuration(
            TaskConfiguration::for_task("t1")
                .with_implementation("./space_t1.sh")
                .with_parameter(TaskParameter::bound("rate", 0.5)),
        );

        let resolution = resolve_space_tasks(&space, &workflow).unwrap();
        let t1 = &resolution.tasks[0];

        assert_eq!(t1.implementation, "./space_t1.sh");
        assert!(t1.dynamic_parameters.is_empty());
        assert_eq!(t1.static_parameters.get("rate"), Some(&json!(0.5)));
    }

    #[test]
    fn test_missing_implementation_reports_every_task() {
        let workflows = vec![WorkflowModel::new("W")
            .with_task(TaskModel::new("a"))
            .with_task(TaskModel::new("b"))];
        let workflow = resolved(&workflows, "W");
        let space = SpaceModel::new("S", "W");

        let err = resolve_space_tasks(&space, &workflow).unwrap_err();
        let errors = err.into_list();

        assert_eq!(errors.len(), 2);
        assert!(errors[0].to_string().contains("task has no implementation"));
        assert!(errors[1].to_string().contains("W:b"));
    }

    #[test]
    fn test_dynamic_parameter_without_space_definition_warns() {
        let workflows = workflows();
        let workflow = resolved(&workflows, "W");
        let space = SpaceModel::new("S", "W");

        let resolution = resolve_space_tasks(&space, &workflow).unwrap();
        assert_eq!(resolution.warnings.len(), 1);
        assert!(matches!(
            &resolution.warnings[0],
            CompileWarning::UnboundDynamicParameter { parameter, .. } if parameter == "rate"
        ));
    }

    #[test]
    fn test_space_configuration_unknown_task() {
        let workflows = workflows();
        let workflow = resolved(&workflows, "W");
        let space =
            SpaceModel::new("S", "W").with_configuration(TaskConfiguration::for_task("ghost"));

        assert!(matches!(
            resolve_space_tasks(&space, &workflow),
            Err(CompileError::UndefinedTask { .. })
        ));
    }

    #[test]
    fn test_inherited_task_records_declaring_workflow() {
        let mut workflows = workflows();
        workflows.push(WorkflowModel::new("W2").with_parent("W"));
        let workflow = resolved(&workflows, "W2");

        let resolution = resolve_space_tasks(&SpaceModel::new("S", "W2"), &workflow).unwrap();
        let t1 = &resolution.tasks[0];

        assert_eq!(t1.id, "W2:t1");
        assert_eq!(t1.declared_in, "W");
        assert_eq!(t1.depth, 1);
    }
}
