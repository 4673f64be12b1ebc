//! Artifact
//!
//! The compiled, self-contained executable form of an experiment and the
//! only contract between the compiler and the execution engine. It is
//! stored as JSON; every map is ordered so that compiling the same
//! sources twice produces byte-identical output.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::control::Transition;
use super::params::ParameterSet;
use crate::workflow::model::END;

/// Artifact format tag.
pub const ARTIFACT_VERSION: &str = "1.0";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Failed to read or write artifact {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid artifact JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to serialize artifact: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Malformed artifact: {0}")]
    Malformed(String),
}

/// One executable task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub task_id: String,
    pub workflow: String,
    pub implementation: String,
    #[serde(default)]
    pub dynamic_parameters: Vec<String>,
    #[serde(default)]
    pub static_parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub input_data: Vec<String>,
    #[serde(default)]
    pub output_data: Vec<String>,
}

/// One space: task order, parameter sets, and initial input values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceDefinition {
    pub space_id: String,
    pub tasks_order: Vec<String>,
    pub parameters: Vec<ParameterSet>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_data: BTreeMap<String, String>,
}

impl SpaceDefinition {
    pub fn param_set_count(&self) -> usize {
        self.parameters.len()
    }

    pub fn last_task(&self) -> Option<&str> {
        self.tasks_order.last().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlDefinition {
    #[serde(rename = "START", alias = "start")]
    pub start: String,
    #[serde(default)]
    pub transitions: Vec<Transition>,
}

/// The compiled experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub experiment: String,
    pub version: String,
    /// One group per owning workflow, in discovery order
    pub tasks: Vec<Vec<TaskDefinition>>,
    pub spaces: Vec<SpaceDefinition>,
    pub control: ControlDefinition,
}

impl Artifact {
    pub fn find_task(&self, task_id: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().flatten().find(|t| t.task_id == task_id)
    }

    pub fn find_space(&self, space_id: &str) -> Option<&SpaceDefinition> {
        self.spaces.iter().find(|s| s.space_id == space_id)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.iter().map(Vec::len).sum()
    }

    /// Canonical JSON text.
    pub fn to_json(&self) -> Result<String, ArtifactError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Hex SHA-256 of the canonical JSON.
    pub fn content_hash(&self) -> Result<String, ArtifactError> {
        let json = self.to_json()?;
        let digest = Sha256::digest(json.as_bytes());
        Ok(format!("{:x}", digest))
    }

    /// Run identifier: `<experiment>-<version>-<first 12 hash chars>`.
    pub fn run_id(&self) -> Result<String, ArtifactError> {
        let hash = self.content_hash()?;
        Ok(format!("{}-{}-{}", self.experiment, self.version, &hash[..12]))
    }

    /// Checks the structural invariants the engine relies on.
    pub fn validate(&self) -> Result<(), ArtifactError> {
        let task_ids: HashSet<&str> = self
            .tasks
            .iter()
            .flatten()
            .map(|t| t.task_id.as_str())
            .collect();
        let space_ids: HashSet<&str> = self.spaces.iter().map(|s| s.space_id.as_str()).collect();

        for space in &self.spaces {
            for task in &space.tasks_order {
                if !task_ids.contains(task.as_str()) {
                    return Err(ArtifactError::Malformed(format!(
                        "space '{}' references unknown task '{}'",
                        space.space_id, task
                    )));
                }
            }
        }

        if !space_ids.contains(self.control.start.as_str()) {
            return Err(ArtifactError::Malformed(format!(
                "start '{}' is not a declared space",
                self.control.start
            )));
        }

        for transition in &self.control.transitions {
            let known = |name: &str| space_ids.contains(name) || name == END;
            if !space_ids.contains(transition.from.as_str()) || !known(&transition.to) {
                return Err(ArtifactError::Malformed(format!(
                    "transition {} -> {} references an undeclared space",
                    transition.from, transition.to
                )));
            }
        }

        Ok(())
    }
}

/// Writes the artifact as pretty JSON.
pub fn save_artifact(artifact: &Artifact, path: impl AsRef<Path>) -> Result<(), ArtifactError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ArtifactError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let json = artifact.to_json()?;
    fs::write(path, json).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    info!("Artifact written to {}", path.display());
    Ok(())
}

/// Reads and validates an artifact.
pub fn load_artifact(path: impl AsRef<Path>) -> Result<Artifact, ArtifactError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let artifact: Artifact = serde_json::from_str(&content).map_err(|source| ArtifactError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    artifact.validate()?;

    debug!(
        "Loaded artifact '{}' ({} tasks, {} spaces)",
        artifact.experiment,
        artifact.task_count(),
        artifact.spaces.len()
    );
    Ok(artifact)
}
