//! Run Repository
//!
//! Durable execution state, the single source of truth for "has this
//! already run" decisions when a run is resumed.
//!
//! A backend only stores and loads whole [`RunSnapshot`]s; every record
//! operation is a provided method built on those primitives.
//!
//! - [`records`]: the persisted record types
//! - [`memory`]: in-process storage for tests and one-shot runs
//! - [`file`]: one JSON document per run under a runs directory

pub mod file;
pub mod memory;
pub mod records;

use std::path::PathBuf;

use chrono::Utc;
use thiserror::Error;

use crate::compiler::ParameterSet;

pub use file::FileRunRepository;
pub use memory::MemoryRunRepository;
pub use records::{
    ControlState, DataMappingRecord, ExecutionStats, ParamSetExecutionRecord, RunRecord,
    RunSnapshot, RunStatus, SpaceExecutionRecord, TaskExecutionRecord, UnitStatus,
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Corrupt run record {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run already exists: {0}")]
    RunExists(String),

    #[error("No record for {0}")]
    RecordNotFound(String),

    #[error("Repository lock poisoned")]
    Poisoned,
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Storage for run execution state.
///
/// Implementations must be safe to share between runs; each run writes
/// only its own snapshot.
pub trait RunRepository: Send + Sync {
    fn load_snapshot(&self, run_id: &str) -> RepositoryResult<Option<RunSnapshot>>;

    fn store_snapshot(&self, snapshot: &RunSnapshot) -> RepositoryResult<()>;

    /// Returns false when there was nothing to remove.
    fn remove_snapshot(&self, run_id: &str) -> RepositoryResult<bool>;

    fn run_ids(&self) -> RepositoryResult<Vec<String>>;

    /// Loads, mutates and stores one run's snapshot.
    fn modify(
        &self,
        run_id: &str,
        change: &mut dyn FnMut(&mut RunSnapshot) -> RepositoryResult<()>,
    ) -> RepositoryResult<()> {
        let mut snapshot = self
            .load_snapshot(run_id)?
            .ok_or_else(|| RepositoryError::RunNotFound(run_id.to_string()))?;
        change(&mut snapshot)?;
        snapshot.touch();
        self.store_snapshot(&snapshot)
    }

    fn snapshot(&self, run_id: &str) -> RepositoryResult<RunSnapshot> {
        self.load_snapshot(run_id)?
            .ok_or_else(|| RepositoryError::RunNotFound(run_id.to_string()))
    }

    // Runs

    fn create_run(&self, run: RunRecord) -> RepositoryResult<()> {
        if self.load_snapshot(&run.run_id)?.is_some() {
            return Err(RepositoryError::RunExists(run.run_id));
        }
        self.store_snapshot(&RunSnapshot::new(run))
    }

    fn get_run(&self, run_id: &str) -> RepositoryResult<Option<RunRecord>> {
        Ok(self.load_snapshot(run_id)?.map(|s| s.run))
    }

    fn update_run(&self, run: &RunRecord) -> RepositoryResult<()> {
        self.modify(&run.run_id, &mut |snapshot| {
            snapshot.run = run.clone();
            Ok(())
        })
    }

    /// Sets the run status; terminal statuses also stamp the finish time.
    fn set_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
        error: Option<String>,
    ) -> RepositoryResult<()> {
        self.modify(run_id, &mut |snapshot| {
            snapshot.run.status = status;
            snapshot.run.error = error.clone();
            snapshot.run.finished_at = match status {
                RunStatus::Running => None,
                _ => Some(Utc::now()),
            };
            Ok(())
        })
    }

    fn set_run_position(
        &self,
        run_id: &str,
        space: Option<&str>,
        param_set: Option<usize>,
        task: Option<&str>,
    ) -> RepositoryResult<()> {
        self.modify(run_id, &mut |snapshot| {
            snapshot.run.current_space = space.map(str::to_string);
            snapshot.run.current_param_set = param_set;
            snapshot.run.current_task = task.map(str::to_string);
            Ok(())
        })
    }

    /// All runs, oldest first.
    fn list_runs(&self) -> RepositoryResult<Vec<RunRecord>> {
        let mut runs = Vec::new();
        for run_id in self.run_ids()? {
            if let Some(snapshot) = self.load_snapshot(&run_id)? {
                runs.push(snapshot.run);
            }
        }
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.run_id.cmp(&b.run_id)));
        Ok(runs)
    }

    fn delete_run(&self, run_id: &str) -> RepositoryResult<bool> {
        self.remove_snapshot(run_id)
    }

    // Spaces

    fn get_space_record(
        &self,
        run_id: &str,
        space_id: &str,
    ) -> RepositoryResult<Option<SpaceExecutionRecord>> {
        Ok(self
            .snapshot(run_id)?
            .spaces
            .into_iter()
            .find(|s| s.space_id == space_id))
    }

    /// Creates (or restarts) a space record in `running` state.
    fn create_space_record(
        &self,
        run_id: &str,
        space_id: &str,
    ) -> RepositoryResult<SpaceExecutionRecord> {
        let record = SpaceExecutionRecord {
            space_id: space_id.to_string(),
            status: UnitStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.modify(run_id, &mut |snapshot| {
            snapshot.spaces.retain(|s| s.space_id != space_id);
            snapshot.spaces.push(record.clone());
            Ok(())
        })?;
        Ok(record)
    }

    fn update_space_status(
        &self,
        run_id: &str,
        space_id: &str,
        status: UnitStatus,
    ) -> RepositoryResult<()> {
        self.modify(run_id, &mut |snapshot| {
            let record = snapshot
                .spaces
                .iter_mut()
                .find(|s| s.space_id == space_id)
                .ok_or_else(|| RepositoryError::RecordNotFound(format!("space '{}'", space_id)))?;
            record.status = status;
            record.finished_at = finish_time(status);
            Ok(())
        })
    }

    /// Forgets a space's parameter-set and task records so it runs again.
    fn reset_space(&self, run_id: &str, space_id: &str) -> RepositoryResult<()> {
        self.modify(run_id, &mut |snapshot| {
            snapshot.spaces.retain(|s| s.space_id != space_id);
            snapshot.param_sets.retain(|p| p.space_id != space_id);
            snapshot.tasks.retain(|t| t.space_id != space_id);
            Ok(())
        })
    }

    // Parameter sets

    fn get_param_set_record(
        &self,
        run_id: &str,
        space_id: &str,
        index: usize,
    ) -> RepositoryResult<Option<ParamSetExecutionRecord>> {
        Ok(self
            .snapshot(run_id)?
            .param_sets
            .into_iter()
            .find(|p| p.space_id == space_id && p.param_set_index == index))
    }

    fn create_param_set_record(
        &self,
        run_id: &str,
        space_id: &str,
        index: usize,
        parameters: &ParameterSet,
    ) -> RepositoryResult<ParamSetExecutionRecord> {
        let record = ParamSetExecutionRecord {
            space_id: space_id.to_string(),
            param_set_index: index,
            parameters: parameters.clone(),
            status: UnitStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.modify(run_id, &mut |snapshot| {
            snapshot
                .param_sets
                .retain(|p| !(p.space_id == space_id && p.param_set_index == index));
            snapshot.param_sets.push(record.clone());
            Ok(())
        })?;
        Ok(record)
    }

    fn update_param_set_status(
        &self,
        run_id: &str,
        space_id: &str,
        index: usize,
        status: UnitStatus,
    ) -> RepositoryResult<()> {
        self.modify(run_id, &mut |snapshot| {
            let record = snapshot
                .param_sets
                .iter_mut()
                .find(|p| p.space_id == space_id && p.param_set_index == index)
                .ok_or_else(|| {
                    RepositoryError::RecordNotFound(format!(
                        "parameter set {} of space '{}'",
                        index, space_id
                    ))
                })?;
            record.status = status;
            record.finished_at = finish_time(status);
            Ok(())
        })
    }

    // Tasks

    fn get_task_record(
        &self,
        run_id: &str,
        space_id: &str,
        index: usize,
        task_id: &str,
    ) -> RepositoryResult<Option<TaskExecutionRecord>> {
        Ok(self.snapshot(run_id)?.tasks.into_iter().find(|t| {
            t.space_id == space_id && t.param_set_index == index && t.task_id == task_id
        }))
    }

    fn create_task_record(
        &self,
        run_id: &str,
        space_id: &str,
        index: usize,
        task_id: &str,
    ) -> RepositoryResult<TaskExecutionRecord> {
        let record = TaskExecutionRecord {
            space_id: space_id.to_string(),
            param_set_index: index,
            task_id: task_id.to_string(),
            status: UnitStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        };
        self.modify(run_id, &mut |snapshot| {
            snapshot.tasks.retain(|t| {
                !(t.space_id == space_id && t.param_set_index == index && t.task_id == task_id)
            });
            snapshot.tasks.push(record.clone());
            snapshot.run.current_space = Some(space_id.to_string());
            snapshot.run.current_param_set = Some(index);
            snapshot.run.current_task = Some(task_id.to_string());
            Ok(())
        })?;
        Ok(record)
    }

    fn update_task_status(
        &self,
        run_id: &str,
        space_id: &str,
        index: usize,
        task_id: &str,
        status: UnitStatus,
        error: Option<String>,
    ) -> RepositoryResult<()> {
        self.modify(run_id, &mut |snapshot| {
            let record = snapshot
                .tasks
                .iter_mut()
                .find(|t| {
                    t.space_id == space_id && t.param_set_index == index && t.task_id == task_id
                })
                .ok_or_else(|| {
                    RepositoryError::RecordNotFound(format!(
                        "task '{}' in parameter set {} of space '{}'",
                        task_id, index, space_id
                    ))
                })?;
            record.status = status;
            record.finished_at = finish_time(status);
            record.error = error.clone();
            Ok(())
        })
    }

    // Data mappings

    /// Inserts or replaces the mapping for (space, index, name).
    fn put_data_mapping(&self, run_id: &str, mapping: DataMappingRecord) -> RepositoryResult<()> {
        self.modify(run_id, &mut |snapshot| {
            snapshot.data_mappings.retain(|m| {
                !(m.space_id == mapping.space_id
                    && m.param_set_index == mapping.param_set_index
                    && m.data_name == mapping.data_name)
            });
            snapshot.data_mappings.push(mapping.clone());
            Ok(())
        })
    }

    fn get_data_mapping(
        &self,
        run_id: &str,
        space_id: &str,
        index: usize,
        name: &str,
    ) -> RepositoryResult<Option<DataMappingRecord>> {
        Ok(self.snapshot(run_id)?.data_mappings.into_iter().find(|m| {
            m.space_id == space_id && m.param_set_index == index && m.data_name == name
        }))
    }

    fn get_data_mappings(
        &self,
        run_id: &str,
        space_id: &str,
        index: usize,
    ) -> RepositoryResult<Vec<DataMappingRecord>> {
        Ok(self
            .snapshot(run_id)?
            .data_mappings
            .into_iter()
            .filter(|m| m.space_id == space_id && m.param_set_index == index)
            .collect())
    }

    /// The most recently recorded value for a data name, in any space.
    fn find_latest_data_mapping(
        &self,
        run_id: &str,
        name: &str,
    ) -> RepositoryResult<Option<DataMappingRecord>> {
        // later entries win ties, since mappings are appended in write order
        Ok(self
            .snapshot(run_id)?
            .data_mappings
            .into_iter()
            .filter(|m| m.data_name == name)
            .fold(None, |latest: Option<DataMappingRecord>, m| match latest {
                Some(l) if l.recorded_at > m.recorded_at => Some(l),
                _ => Some(m),
            }))
    }

    // Control state

    fn get_control_state(&self, run_id: &str) -> RepositoryResult<Option<ControlState>> {
        Ok(self.snapshot(run_id)?.control)
    }

    fn set_control_state(&self, run_id: &str, space_id: &str) -> RepositoryResult<()> {
        self.modify(run_id, &mut |snapshot| {
            snapshot.control = Some(ControlState {
                current_space: space_id.to_string(),
                updated_at: Utc::now(),
            });
            Ok(())
        })
    }

    // Aggregates

    /// Task counts for a run, optionally limited to one space.
    fn get_task_stats(&self, run_id: &str, space_id: Option<&str>) -> RepositoryResult<ExecutionStats> {
        let snapshot = self.snapshot(run_id)?;
        Ok(ExecutionStats::from_statuses(
            snapshot
                .tasks
                .iter()
                .filter(|t| space_id.map_or(true, |s| t.space_id == s))
                .map(|t| &t.status),
        ))
    }

    fn get_space_stats(&self, run_id: &str) -> RepositoryResult<ExecutionStats> {
        let snapshot = self.snapshot(run_id)?;
        Ok(ExecutionStats::from_statuses(
            snapshot.spaces.iter().map(|s| &s.status),
        ))
    }

    fn get_param_set_stats(&self, run_id: &str, space_id: &str) -> RepositoryResult<ExecutionStats> {
        let snapshot = self.snapshot(run_id)?;
        Ok(ExecutionStats::from_statuses(
            snapshot
                .param_sets
                .iter()
                .filter(|p| p.space_id == space_id)
                .map(|p| &p.status),
        ))
    }
}

fn finish_time(status: UnitStatus) -> Option<chrono::DateTime<Utc>> {
    match status {
        UnitStatus::Running => None,
        UnitStatus::Completed | UnitStatus::Failed => Some(Utc::now()),
    }
}
