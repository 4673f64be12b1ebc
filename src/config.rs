//! Settings
//!
//! # Resolution Priority
//!
//! 1. Command-line flags (applied by the binary)
//! 2. `EXPFLOW_RUNS_DIR` environment variable
//! 3. The settings file: an explicit path, or `config.yaml` in the home
//!    directory
//! 4. Built-in defaults
//!
//! The home directory is `EXPFLOW_HOME`, or `.expflow` under the current
//! directory.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const HOME_ENV: &str = "EXPFLOW_HOME";
pub const RUNS_DIR_ENV: &str = "EXPFLOW_RUNS_DIR";

/// Lazily-initialized home directory for settings and run state.
pub static EXPFLOW_HOME: Lazy<PathBuf> = Lazy::new(|| {
    let home = std::env::var(HOME_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".expflow"));
    debug!("Using home directory: {}", home.display());
    home
});

pub static DEFAULT_RUNS_DIR: Lazy<PathBuf> = Lazy::new(|| EXPFLOW_HOME.join("runs"));

pub static DEFAULT_CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| EXPFLOW_HOME.join("config.yaml"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read settings {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid settings file {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Where run records are stored
    pub runs_dir: PathBuf,
    /// Working directory for task execution
    pub working_dir: Option<PathBuf>,
    /// Independent runs allowed at once in one process
    pub max_concurrent_runs: usize,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            runs_dir: DEFAULT_RUNS_DIR.clone(),
            working_dir: None,
            max_concurrent_runs: num_cpus::get(),
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Loads settings and applies environment overrides.
    ///
    /// An explicit path must exist; the default settings file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match Self::source_path(path) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// The settings file `load` reads for `path`, if any.
    pub fn source_path(path: Option<&Path>) -> Option<PathBuf> {
        match path {
            Some(path) => Some(path.to_path_buf()),
            None if DEFAULT_CONFIG_PATH.exists() => Some(DEFAULT_CONFIG_PATH.clone()),
            None => None,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_yaml(&content).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(settings)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(RUNS_DIR_ENV).filter(|d| !d.trim().is_empty()) {
            debug!("{} overrides runs directory: {}", RUNS_DIR_ENV, dir);
            self.runs_dir = PathBuf::from(dir);
        }
    }
}
