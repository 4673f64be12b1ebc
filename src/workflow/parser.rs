//! Source Loading
//!
//! Loads workflow and experiment syntax trees from their YAML rendition.
//! The grammar-level parser is an external collaborator; these loaders
//! accept the tree it produces and stamp ownership information the rest
//! of the compiler relies on.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Deserialize;
use thiserror::Error;

use super::experiment::ExperimentModel;
use super::model::WorkflowModel;

/// Failures while reading or decoding source files.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read '{path}': {source}. Check that the file exists and is readable.")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse '{path}': {source}. Check the file format.")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Workflow '{name}' is defined more than once ('{first}' and '{second}')")]
    DuplicateWorkflow {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Workflow file '{0}' declares a workflow with an empty name")]
    UnnamedWorkflow(PathBuf),
}

/// A workflow file holds either a list of workflows or a single one.
#[derive(Deserialize)]
#[serde(untagged)]
enum WorkflowFile {
    Many { workflows: Vec<WorkflowModel> },
    Single(WorkflowModel),
}

fn read_source(path: &Path) -> Result<String, LoadError> {
    let content = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Loaded {} ({} bytes)", path.display(), content.len());
    Ok(content)
}

/// Parses workflow YAML text. `origin` only labels errors.
pub fn parse_workflows(yaml: &str, origin: &Path) -> Result<Vec<WorkflowModel>, LoadError> {
    let file: WorkflowFile = serde_yaml::from_str(yaml).map_err(|source| LoadError::Yaml {
        path: origin.to_path_buf(),
        source,
    })?;

    let mut workflows = match file {
        WorkflowFile::Many { workflows } => workflows,
        WorkflowFile::Single(workflow) => vec![workflow],
    };

    for workflow in &mut workflows {
        workflow.name = workflow.name.trim().to_string();
        if workflow.name.is_empty() {
            return Err(LoadError::UnnamedWorkflow(origin.to_path_buf()));
        }
        workflow.assign_ownership();
    }

    Ok(workflows)
}

/// Loads every workflow declared in a single file.
pub fn load_workflow_file(path: impl AsRef<Path>) -> Result<Vec<WorkflowModel>, LoadError> {
    let path = path.as_ref();
    let workflows = parse_workflows(&read_source(path)?, path)?;
    info!(
        "Loaded {} workflow(s) from {}",
        workflows.len(),
        path.display()
    );
    Ok(workflows)
}

/// Loads workflows from several files, rejecting duplicate names.
pub fn load_workflow_files<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<WorkflowModel>, LoadError> {
    let mut all: Vec<WorkflowModel> = Vec::new();
    let mut origins: Vec<(String, PathBuf)> = Vec::new();

    for path in paths {
        let path = path.as_ref();
        for workflow in load_workflow_file(path)? {
            if let Some((_, first)) = origins.iter().find(|(name, _)| *name == workflow.name) {
                return Err(LoadError::DuplicateWorkflow {
                    name: workflow.name.clone(),
                    first: first.clone(),
                    second: path.to_path_buf(),
                });
            }
            origins.push((workflow.name.clone(), path.to_path_buf()));
            all.push(workflow);
        }
    }

    Ok(all)
}

/// Loads every `*.yaml` / `*.yml` workflow file in a directory, sorted by path.
pub fn load_workflows_from_dir(dir: impl AsRef<Path>) -> Result<Vec<WorkflowModel>, LoadError> {
    let dir = dir.as_ref();
    let entries = fs::read_dir(dir).map_err(|source| LoadError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
        })
        .collect();
    paths.sort();

    debug!("Workflow files in {}: {:?}", dir.display(), paths);
    load_workflow_files(&paths)
}

/// Parses experiment YAML text.
pub fn parse_experiment(yaml: &str, origin: &Path) -> Result<ExperimentModel, LoadError> {
    let mut experiment: ExperimentModel =
        serde_yaml::from_str(yaml).map_err(|source| LoadError::Yaml {
            path: origin.to_path_buf(),
            source,
        })?;
    experiment.name = experiment.name.trim().to_string();
    Ok(experiment)
}

/// Loads an experiment file.
pub fn load_experiment(path: impl AsRef<Path>) -> Result<ExperimentModel, LoadError> {
    let path = path.as_ref();
    let experiment = parse_experiment(&read_source(path)?, path)?;

    let workflows: HashSet<_> = experiment.spaces.iter().map(|s| &s.workflow).collect();
    info!(
        "Loaded experiment '{}': {} space(s) over {} workflow(s)",
        experiment.name,
        experiment.spaces.len(),
        workflows.len()
    );
    Ok(experiment)
}
