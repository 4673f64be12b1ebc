//! Space Executor
//!
//! Runs every parameter set of one space, in index order, and every task
//! of a set in chain order. A parameter set whose persisted record is
//! `completed` is skipped; any other set is executed from its first task.
//!
//! A failing task marks itself, its parameter set and the space `failed`
//! before the error is returned.

use std::collections::BTreeMap;

use log::{debug, error, info};
use serde_json::Value;

use super::context::RunContext;
use super::error::RunError;
use super::progress::ProgressEvent;
use super::task::TaskExecutor;
use crate::compiler::{SpaceDefinition, TaskDefinition};
use crate::monitoring::{EventType, TaskKey};
use crate::repository::{DataMappingRecord, UnitStatus};

pub struct SpaceExecutor<'a> {
    ctx: &'a RunContext,
    tasks: &'a TaskExecutor,
}

impl<'a> SpaceExecutor<'a> {
    pub fn new(ctx: &'a RunContext, tasks: &'a TaskExecutor) -> Self {
        Self { ctx, tasks }
    }

    pub async fn execute(&self, space: &SpaceDefinition) -> Result<(), RunError> {
        let ctx = self.ctx;
        let repo = ctx.repo();
        let space_id = space.space_id.as_str();

        match repo.get_space_record(&ctx.run_id, space_id)? {
            Some(record) if record.status == UnitStatus::Running => {
                info!("Resuming space '{}'", space_id);
            }
            Some(_) | None => {
                repo.create_space_record(&ctx.run_id, space_id)?;
                info!("Starting space '{}'", space_id);
            }
        }
        ctx.emit(ProgressEvent::SpaceStarted {
            run_id: ctx.run_id.clone(),
            space: space_id.to_string(),
        });

        let tasks = space
            .tasks_order
            .iter()
            .map(|id| {
                ctx.artifact
                    .find_task(id)
                    .ok_or_else(|| RunError::UnknownTask {
                        space: space_id.to_string(),
                        task: id.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let total_sets = space.param_set_count();
        let mut completed_sets = 0;

        for (index, parameters) in space.parameters.iter().enumerate() {
            let done = repo
                .get_param_set_record(&ctx.run_id, space_id, index)?
                .map_or(false, |r| r.status == UnitStatus::Completed);
            if done {
                debug!("Parameter set {} of '{}' already completed, skipping", index, space_id);
                completed_sets += 1;
                continue;
            }

            repo.create_param_set_record(&ctx.run_id, space_id, index, parameters)?;
            ctx.emit(ProgressEvent::ParamSetStarted {
                run_id: ctx.run_id.clone(),
                space: space_id.to_string(),
                index,
            });
            info!(
                "Space '{}': parameter set {}/{}",
                space_id,
                index + 1,
                total_sets
            );

            for (position, task) in tasks.iter().enumerate() {
                self.run_task(space, index, task).await?;

                let done_tasks = completed_sets * tasks.len() + position + 1;
                let total_tasks = tasks.len() * total_sets;
                ctx.emit(ProgressEvent::Progress {
                    run_id: ctx.run_id.clone(),
                    fraction: done_tasks as f64 / total_tasks as f64,
                    message: format!(
                        "{}: task {}/{} ({})",
                        space_id, done_tasks, total_tasks, task.task_id
                    ),
                });
                ctx.check_terminated()?;
            }

            repo.update_param_set_status(&ctx.run_id, space_id, index, UnitStatus::Completed)?;
            completed_sets += 1;
            ctx.emit(ProgressEvent::ParamSetCompleted {
                run_id: ctx.run_id.clone(),
                space: space_id.to_string(),
                index,
            });
            ctx.emit(ProgressEvent::Progress {
                run_id: ctx.run_id.clone(),
                fraction: completed_sets as f64 / total_sets as f64,
                message: format!(
                    "{}: parameter set {}/{}",
                    space_id, completed_sets, total_sets
                ),
            });
            ctx.check_terminated()?;
        }

        repo.update_space_status(&ctx.run_id, space_id, UnitStatus::Completed)?;
        ctx.emit(ProgressEvent::SpaceCompleted {
            run_id: ctx.run_id.clone(),
            space: space_id.to_string(),
        });
        info!("Space '{}' completed", space_id);
        Ok(())
    }

    async fn run_task(
        &self,
        space: &SpaceDefinition,
        index: usize,
        task: &TaskDefinition,
    ) -> Result<(), RunError> {
        let ctx = self.ctx;
        let repo = ctx.repo();
        let space_id = space.space_id.as_str();
        let key = TaskKey::new(space_id, index, &task.task_id);

        ctx.wait_if_paused().await;

        repo.create_task_record(&ctx.run_id, space_id, index, &task.task_id)?;
        ctx.record(key.clone(), EventType::Started);
        ctx.emit(ProgressEvent::TaskStarted {
            run_id: ctx.run_id.clone(),
            space: space_id.to_string(),
            index,
            task: task.task_id.clone(),
        });

        let outcome = match self.prepare(space, index, task) {
            Ok((parameters, inputs)) => self
                .tasks
                .execute(task, &parameters, &inputs)
                .await
                .map_err(|e| RunError::TaskFailed {
                    space: space_id.to_string(),
                    param_set: index,
                    task: task.task_id.clone(),
                    message: e.to_string(),
                }),
            Err(e) => Err(e),
        };

        let values = match outcome {
            Ok(values) => values,
            Err(e) => {
                error!("{}", e);
                let message = e.to_string();
                repo.update_task_status(
                    &ctx.run_id,
                    space_id,
                    index,
                    &task.task_id,
                    UnitStatus::Failed,
                    Some(message),
                )?;
                repo.update_param_set_status(&ctx.run_id, space_id, index, UnitStatus::Failed)?;
                repo.update_space_status(&ctx.run_id, space_id, UnitStatus::Failed)?;
                ctx.record(key, EventType::Failed);
                return Err(e);
            }
        };

        for (name, value) in task.output_data.iter().zip(values) {
            repo.put_data_mapping(
                &ctx.run_id,
                DataMappingRecord::new(space_id, index, name.as_str(), value)
                    .produced_by(task.task_id.as_str()),
            )?;
        }
        repo.update_task_status(
            &ctx.run_id,
            space_id,
            index,
            &task.task_id,
            UnitStatus::Completed,
            None,
        )?;
        ctx.record(key, EventType::Completed);
        ctx.sample_resources(&task.task_id);
        ctx.emit(ProgressEvent::TaskCompleted {
            run_id: ctx.run_id.clone(),
            space: space_id.to_string(),
            index,
            task: task.task_id.clone(),
        });
        Ok(())
    }

    /// Concrete parameters and input values for one task run.
    fn prepare(
        &self,
        space: &SpaceDefinition,
        index: usize,
        task: &TaskDefinition,
    ) -> Result<(BTreeMap<String, Value>, Vec<String>), RunError> {
        let mut parameters = task.static_parameters.clone();
        let set = &space.parameters[index];
        for name in &task.dynamic_parameters {
            let value = set.get(name).ok_or_else(|| RunError::MissingParameter {
                space: space.space_id.clone(),
                param_set: index,
                task: task.task_id.clone(),
                parameter: name.clone(),
            })?;
            parameters.insert(name.clone(), value.clone());
        }

        let inputs = task
            .input_data
            .iter()
            .map(|name| self.input_value(space, index, task, name))
            .collect::<Result<Vec<_>, _>>()?;

        Ok((parameters, inputs))
    }

    /// Looks an input up in this parameter set's outputs, then the space's
    /// initial values, then the latest value produced anywhere in the run.
    fn input_value(
        &self,
        space: &SpaceDefinition,
        index: usize,
        task: &TaskDefinition,
        name: &str,
    ) -> Result<String, RunError> {
        let repo = self.ctx.repo();
        let run_id = &self.ctx.run_id;

        if let Some(mapping) = repo.get_data_mapping(run_id, &space.space_id, index, name)? {
            return Ok(mapping.value);
        }
        if let Some(value) = space.input_data.get(name) {
            return Ok(value.clone());
        }
        if let Some(mapping) = repo.find_latest_data_mapping(run_id, name)? {
            debug!(
                "Input '{}' of '{}' taken from space '{}'",
                name, task.task_id, mapping.space_id
            );
            return Ok(mapping.value);
        }

        Err(RunError::MissingInputValue {
            space: space.space_id.clone(),
            param_set: index,
            task: task.task_id.clone(),
            input: name.to_string(),
        })
    }
}
