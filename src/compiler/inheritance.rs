//! Workflow Inheritance Resolution
//!
//! Flattens every workflow's parent chain into an explicit, acyclic
//! [`ResolvedWorkflow`] view, built once per compile:
//!
//! - ancestor tasks come first, in declaration order
//! - a child may *configure* an inherited task but never re-declare it
//! - data slots merge by name, child definitions replacing the parent's
//! - a workflow without its own chain uses its nearest ancestor's
//!
//! Circular inheritance is detected with a per-walk visiting list.

use std::collections::BTreeMap;

use log::debug;

use super::error::CompileError;
use crate::workflow::model::{DataModel, TaskChain, TaskModel, WorkflowModel};

/// A workflow with its entire lineage merged in.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedWorkflow {
    pub name: String,
    pub parent: Option<String>,
    /// Inheritance depth; root workflows have depth 0
    pub depth: usize,
    /// Workflow names from the root ancestor down to this workflow
    pub lineage: Vec<String>,
    /// Merged tasks; `TaskModel::workflow` names the declaring workflow
    pub tasks: Vec<TaskModel>,
    pub data: Vec<DataModel>,
    pub chain: Option<TaskChain>,
}

impl ResolvedWorkflow {
    pub fn get_task(&self, name: &str) -> Option<&TaskModel> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Task names in execution order.
    ///
    /// Uses the (possibly inherited) chain; without one, the merged
    /// declaration order.
    pub fn execution_order(&self) -> Vec<String> {
        match &self.chain {
            Some(chain) => chain.execution_order(),
            None => self.tasks.iter().map(|t| t.name.clone()).collect(),
        }
    }

    pub fn data_names(&self) -> Vec<String> {
        self.data.iter().map(|d| d.name.clone()).collect()
    }
}

/// Resolves workflow inheritance for a set of parsed workflows.
pub struct InheritanceResolver<'a> {
    models: BTreeMap<&'a str, &'a WorkflowModel>,
    resolved: BTreeMap<String, ResolvedWorkflow>,
}

impl<'a> InheritanceResolver<'a> {
    pub fn new(workflows: &'a [WorkflowModel]) -> Self {
        let models = workflows.iter().map(|w| (w.name.as_str(), w)).collect();
        Self {
            models,
            resolved: BTreeMap::new(),
        }
    }

    /// Names of all known workflows.
    pub fn workflow_names(&self) -> Vec<String> {
        self.models.keys().map(|k| k.to_string()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Resolves one workflow (and, memoized, all of its ancestors).
    pub fn resolve(&mut self, name: &str) -> Result<&ResolvedWorkflow, CompileError> {
        let mut visiting = Vec::new();
        self.resolve_inner(name, &mut visiting)?;
        Ok(&self.resolved[name])
    }

    /// Resolves every known workflow; collects errors from all of them.
    pub fn resolve_all(&mut self) -> Result<BTreeMap<String, ResolvedWorkflow>, CompileError> {
        let mut errors = Vec::new();
        for name in self.workflow_names() {
            let mut visiting = Vec::new();
            if let Err(e) = self.resolve_inner(&name, &mut visiting) {
                if !errors.contains(&e) {
                    errors.push(e);
                }
            }
        }
        CompileError::aggregate(errors)?;
        Ok(self.resolved.clone())
    }

    fn resolve_inner(&mut self, name: &str, visiting: &mut Vec<String>) -> Result<(), CompileError> {
        if self.resolved.contains_key(name) {
            return Ok(());
        }

        if visiting.iter().any(|v| v == name) {
            let mut chain = visiting.clone();
            chain.push(name.to_string());
            return Err(CompileError::CircularInheritance { chain });
        }

        let model = *self
            .models
            .get(name)
            .ok_or_else(|| CompileError::UndefinedParent {
                workflow: visiting.last().cloned().unwrap_or_default(),
                parent: name.to_string(),
            })?;

        visiting.push(name.to_string());

        let base = match &model.parent {
            Some(parent) => {
                self.resolve_inner(parent, visiting)?;
                self.resolved.get(parent.as_str()).cloned()
            }
            None => None,
        };

        visiting.pop();

        let resolved = merge(model, base)?;
        debug!(
            "Resolved workflow '{}' (depth {}, {} tasks, lineage {:?})",
            resolved.name,
            resolved.depth,
            resolved.tasks.len(),
            resolved.lineage
        );
        self.resolved.insert(name.to_string(), resolved);
        Ok(())
    }
}

/// Merges a workflow's own declarations over its resolved parent.
fn merge(
    model: &WorkflowModel,
    base: Option<ResolvedWorkflow>,
) -> Result<ResolvedWorkflow, CompileError> {
    let (depth, mut lineage, mut tasks, mut data, inherited_chain) = match base {
        Some(parent) => (
            parent.depth + 1,
            parent.lineage,
            parent.tasks,
            parent.data,
            parent.chain,
        ),
        None => (0, Vec::new(), Vec::new(), Vec::new(), None),
    };
    lineage.push(model.name.clone());

    let inherited_count = tasks.len();
    for task in &model.tasks {
        if let Some(position) = tasks.iter().position(|t| t.name == task.name) {
            return Err(if position < inherited_count {
                CompileError::IllegalOverride {
                    workflow: model.name.clone(),
                    task: task.name.clone(),
                    ancestor: tasks[position].workflow.clone(),
                }
            } else {
                CompileError::DuplicateTask {
                    workflow: model.name.clone(),
                    task: task.name.clone(),
                }
            });
        }
        let mut declared = task.clone();
        declared.workflow = model.name.clone();
        tasks.push(declared);
    }

    for config in &model.task_configurations {
        let target = tasks
            .iter_mut()
            .find(|t| t.name == config.task)
            .ok_or_else(|| CompileError::UndefinedTask {
                scope: format!("Workflow '{}' configuration", model.name),
                task: config.task.clone(),
            })?;
        target.apply(config);
    }

    for slot in &model.data {
        match data.iter_mut().find(|d| d.name == slot.name) {
            Some(existing) => *existing = slot.clone(),
            None => data.push(slot.clone()),
        }
    }

    let chain = model.chain.clone().or(inherited_chain);
    if let Some(chain) = &chain {
        if !chain.is_well_formed() {
            return Err(CompileError::MalformedChain {
                workflow: model.name.clone(),
            });
        }
        for element in chain.execution_order() {
            if !tasks.iter().any(|t| t.name == element) {
                return Err(CompileError::UndefinedTask {
                    scope: format!("Workflow '{}' task chain", model.name),
                    task: element,
                });
            }
        }
    }

    Ok(ResolvedWorkflow {
        name: model.name.clone(),
        parent: model.parent.clone(),
        depth,
        lineage,
        tasks,
        data,
        chain,
    })
}
