//! Data Manager
//!
//! Collects a run's externally visible results: for every space, the
//! outputs of its last task for each completed parameter set, keyed as
//! `<output>_param<index>`.

use std::collections::BTreeMap;

use log::debug;

use super::error::RunError;
use crate::compiler::Artifact;
use crate::repository::{RunRepository, UnitStatus};

/// space id -> `<output>_param<index>` -> value
pub type RunResults = BTreeMap<String, BTreeMap<String, String>>;

pub struct DataManager<'a> {
    artifact: &'a Artifact,
    repository: &'a dyn RunRepository,
}

impl<'a> DataManager<'a> {
    pub fn new(artifact: &'a Artifact, repository: &'a dyn RunRepository) -> Self {
        Self {
            artifact,
            repository,
        }
    }

    pub fn collect(&self, run_id: &str) -> Result<RunResults, RunError> {
        let mut results = RunResults::new();

        for space in &self.artifact.spaces {
            let mut values = BTreeMap::new();
            let Some(last) = space.last_task() else {
                results.insert(space.space_id.clone(), values);
                continue;
            };
            let task = self
                .artifact
                .find_task(last)
                .ok_or_else(|| RunError::UnknownTask {
                    space: space.space_id.clone(),
                    task: last.to_string(),
                })?;

            for index in 0..space.param_set_count() {
                let completed = self
                    .repository
                    .get_param_set_record(run_id, &space.space_id, index)?
                    .map_or(false, |r| r.status == UnitStatus::Completed);
                if !completed {
                    continue;
                }

                for output in &task.output_data {
                    if let Some(mapping) =
                        self.repository
                            .get_data_mapping(run_id, &space.space_id, index, output)?
                    {
                        values.insert(result_key(output, index), mapping.value);
                    }
                }
            }

            debug!(
                "Collected {} result value(s) for space '{}'",
                values.len(),
                space.space_id
            );
            results.insert(space.space_id.clone(), values);
        }

        Ok(results)
    }
}

pub fn result_key(output: &str, index: usize) -> String {
    format!("{}_param{}", output, index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{
        ControlDefinition, ParameterSet, SpaceDefinition, TaskDefinition, ARTIFACT_VERSION,
    };
    use crate::repository::{DataMappingRecord, MemoryRunRepository, RunRecord};

    fn artifact() -> Artifact {
        let task = |id: &str, outputs: &[&str]| TaskDefinition {
            task_id: id.to_string(),
            workflow: "W".to_string(),
            implementation: "./x.sh".to_string(),
            dynamic_parameters: Vec::new(),
            static_parameters: BTreeMap::new(),
            input_data: Vec::new(),
            output_data: outputs.iter().map(|s| s.to_string()).collect(),
        };
        Artifact {
            experiment: "E".into(),
            version: ARTIFACT_VERSION.into(),
            tasks: vec![vec![task("W:t1", &["mid"]), task("W:t2", &["result"])]],
            spaces: vec![SpaceDefinition {
                space_id: "S".into(),
                tasks_order: vec!["W:t1".into(), "W:t2".into()],
                parameters: vec![ParameterSet::new(), ParameterSet::new(), ParameterSet::new()],
                input_data: BTreeMap::new(),
            }],
            control: ControlDefinition {
                start: "S".into(),
                transitions: Vec::new(),
            },
        }
    }

    #[test]
    fn test_collects_last_task_outputs_of_completed_sets() {
        let repo = MemoryRunRepository::new();
        repo.create_run(RunRecord::new("r", "E", "1.0", "h")).unwrap();

        for index in 0..3 {
            repo.create_param_set_record("r", "S", index, &ParameterSet::new())
                .unwrap();
            repo.put_data_mapping("r", DataMappingRecord::new("S", index, "mid", "m"))
                .unwrap();
            repo.put_data_mapping(
                "r",
                DataMappingRecord::new("S", index, "result", format!("out{}", index)),
            )
            .unwrap();
        }
        repo.update_param_set_status("r", "S", 0, UnitStatus::Completed).unwrap();
        repo.update_param_set_status("r", "S", 2, UnitStatus::Completed).unwrap();

        let results = DataManager::new(&artifact(), &repo).collect("r").unwrap();
        let space = &results["S"];

        assert_eq!(space.len(), 2);
        assert_eq!(space["result_param0"], "out0");
        assert_eq!(space["result_param2"], "out2");
        assert!(!space.contains_key("mid_param0"));
    }

    #[test]
    fn test_result_key_format() {
        assert_eq!(result_key("model", 4), "model_param4");
    }
}
