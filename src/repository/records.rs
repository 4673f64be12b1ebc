//! Persisted execution records.
//!
//! One [`RunSnapshot`] holds everything recorded for a run. Units are
//! keyed by space id, parameter-set index and task id within the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::compiler::ParameterSet;

/// Overall status of a run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Terminated,
}

impl RunStatus {
    /// Completed runs are final; everything else can be resumed.
    pub fn is_resumable(&self) -> bool {
        !matches!(self, RunStatus::Completed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Terminated => "terminated",
        };
        f.write_str(text)
    }
}

/// Status of a space, parameter set or task.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub experiment: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
    pub artifact_hash: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    // Position of the last unit started, for crash diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_space: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_param_set: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    pub fn new(
        run_id: impl Into<String>,
        experiment: impl Into<String>,
        version: impl Into<String>,
        artifact_hash: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            experiment: experiment.into(),
            version: version.into(),
            artifact_path: None,
            artifact_hash: artifact_hash.into(),
            status: RunStatus::Running,
            started_at: now,
            updated_at: now,
            finished_at: None,
            current_space: None,
            current_param_set: None,
            current_task: None,
            error: None,
        }
    }

    pub fn with_artifact_path(mut self, path: impl Into<String>) -> Self {
        self.artifact_path = Some(path.into());
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SpaceExecutionRecord {
    pub space_id: String,
    pub status: UnitStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParamSetExecutionRecord {
    pub space_id: String,
    pub param_set_index: usize,
    #[serde(default)]
    pub parameters: ParameterSet,
    pub status: UnitStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskExecutionRecord {
    pub space_id: String,
    pub param_set_index: usize,
    pub task_id: String,
    pub status: UnitStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A resolved output value of one task run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DataMappingRecord {
    pub space_id: String,
    pub param_set_index: usize,
    pub data_name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl DataMappingRecord {
    pub fn new(
        space_id: impl Into<String>,
        param_set_index: usize,
        data_name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            space_id: space_id.into(),
            param_set_index,
            data_name: data_name.into(),
            value: value.into(),
            task_id: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn produced_by(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

/// Last space a run was in.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ControlState {
    pub current_space: String,
    pub updated_at: DateTime<Utc>,
}

/// Completion counts for progress reporting.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    pub total: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl ExecutionStats {
    pub fn from_statuses<'a>(statuses: impl Iterator<Item = &'a UnitStatus>) -> Self {
        statuses.fold(Self::default(), |mut stats, status| {
            stats.total += 1;
            match status {
                UnitStatus::Running => stats.running += 1,
                UnitStatus::Completed => stats.completed += 1,
                UnitStatus::Failed => stats.failed += 1,
            }
            stats
        })
    }
}

/// Everything persisted for one run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunSnapshot {
    pub run: RunRecord,
    #[serde(default)]
    pub spaces: Vec<SpaceExecutionRecord>,
    #[serde(default)]
    pub param_sets: Vec<ParamSetExecutionRecord>,
    #[serde(default)]
    pub tasks: Vec<TaskExecutionRecord>,
    #[serde(default)]
    pub data_mappings: Vec<DataMappingRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control: Option<ControlState>,
}

impl RunSnapshot {
    pub fn new(run: RunRecord) -> Self {
        Self {
            run,
            spaces: Vec::new(),
            param_sets: Vec::new(),
            tasks: Vec::new(),
            data_mappings: Vec::new(),
            control: None,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.run.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&RunStatus::Terminated).unwrap(), "\"terminated\"");
        assert_eq!(serde_json::to_string(&UnitStatus::Completed).unwrap(), "\"completed\"");
        assert_eq!(RunStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_resumable_statuses() {
        assert!(RunStatus::Running.is_resumable());
        assert!(RunStatus::Failed.is_resumable());
        assert!(RunStatus::Terminated.is_resumable());
        assert!(!RunStatus::Completed.is_resumable());
    }

    #[test]
    fn test_stats_from_statuses() {
        let statuses = [UnitStatus::Completed, UnitStatus::Completed, UnitStatus::Failed];
        let stats = ExecutionStats::from_statuses(statuses.iter());
        assert_eq!(
            stats,
            ExecutionStats {
                total: 3,
                running: 0,
                completed: 2,
                failed: 1
            }
        );
    }

    #[test]
    fn test_snapshot_json_round_trip() {
        let mut snapshot = RunSnapshot::new(RunRecord::new("r1", "E", "1.0", "abc"));
        snapshot
            .data_mappings
            .push(DataMappingRecord::new("S", 0, "out", "/tmp/out.csv").produced_by("W:t1"));

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: RunSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
