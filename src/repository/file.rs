//! File-backed run repository.
//!
//! Each run is one pretty-printed JSON document, `<runs_dir>/<run_id>.json`.
//! Every mutation rewrites the document through a temporary file and a
//! rename, so a crash never leaves a half-written record behind.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::debug;

use super::{RepositoryError, RepositoryResult, RunRepository, RunSnapshot};

const RECORD_EXTENSION: &str = "json";

pub struct FileRunRepository {
    runs_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileRunRepository {
    /// Opens (and creates if needed) a runs directory.
    pub fn open(runs_dir: impl Into<PathBuf>) -> RepositoryResult<Self> {
        let runs_dir = runs_dir.into();
        fs::create_dir_all(&runs_dir).map_err(|source| RepositoryError::Io {
            path: runs_dir.clone(),
            source,
        })?;
        debug!("Using run repository at {}", runs_dir.display());

        Ok(Self {
            runs_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    /// Path of a run's document; unsafe filename characters become `_`.
    pub fn record_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir
            .join(format!("{}.{}", sanitize(run_id), RECORD_EXTENSION))
    }
}

fn sanitize(run_id: &str) -> String {
    run_id
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl RunRepository for FileRunRepository {
    fn load_snapshot(&self, run_id: &str) -> RepositoryResult<Option<RunSnapshot>> {
        let path = self.record_path(run_id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(RepositoryError::Io { path, source }),
        };

        let snapshot = serde_json::from_str(&content)
            .map_err(|source| RepositoryError::Json { path, source })?;
        Ok(Some(snapshot))
    }

    fn store_snapshot(&self, snapshot: &RunSnapshot) -> RepositoryResult<()> {
        let _guard = self.write_lock.lock().map_err(|_| RepositoryError::Poisoned)?;

        let path = self.record_path(&snapshot.run.run_id);
        let json = serde_json::to_string_pretty(snapshot).map_err(|source| RepositoryError::Json {
            path: path.clone(),
            source,
        })?;

        let temp = path.with_extension(format!("{}.tmp", RECORD_EXTENSION));
        fs::write(&temp, json).map_err(|source| RepositoryError::Io {
            path: temp.clone(),
            source,
        })?;
        fs::rename(&temp, &path).map_err(|source| RepositoryError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(())
    }

    fn remove_snapshot(&self, run_id: &str) -> RepositoryResult<bool> {
        let _guard = self.write_lock.lock().map_err(|_| RepositoryError::Poisoned)?;

        let path = self.record_path(run_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(RepositoryError::Io { path, source }),
        }
    }

    fn run_ids(&self) -> RepositoryResult<Vec<String>> {
        let entries = fs::read_dir(&self.runs_dir).map_err(|source| RepositoryError::Io {
            path: self.runs_dir.clone(),
            source,
        })?;

        let mut ids = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            // the stored record carries the real id; the filename is sanitized
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(_) => continue,
            };
            if let Ok(snapshot) = serde_json::from_str::<RunSnapshot>(&content) {
                ids.push(snapshot.run.run_id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::tests::exercise_repository;
    use crate::repository::{RunRecord, RunStatus};
    use tempfile::tempdir;

    #[test]
    fn test_file_repository_operations() {
        let dir = tempdir().unwrap();
        let repo = FileRunRepository::open(dir.path().join("runs")).unwrap();
        exercise_repository(&repo);
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let repo = FileRunRepository::open(dir.path()).unwrap();
            repo.create_run(RunRecord::new("E-1.0-abc", "E", "1.0", "abc")).unwrap();
            repo.set_run_status("E-1.0-abc", RunStatus::Failed, Some("boom".into()))
                .unwrap();
        }

        let repo = FileRunRepository::open(dir.path()).unwrap();
        let run = repo.get_run("E-1.0-abc").unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("boom"));
        assert_eq!(repo.run_ids().unwrap(), vec!["E-1.0-abc".to_string()]);
    }

    #[test]
    fn test_unsafe_run_id_is_sanitized() {
        let dir = tempdir().unwrap();
        let repo = FileRunRepository::open(dir.path()).unwrap();
        let path = repo.record_path("my exp/1.0");

        assert_eq!(path.file_name().unwrap(), "my_exp_1.0.json");
        repo.create_run(RunRecord::new("my exp/1.0", "my exp", "1.0", "h")).unwrap();
        assert_eq!(repo.run_ids().unwrap(), vec!["my exp/1.0".to_string()]);
        assert!(repo.get_run("my exp/1.0").unwrap().is_some());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempdir().unwrap();
        let repo = FileRunRepository::open(dir.path()).unwrap();
        repo.create_run(RunRecord::new("r", "E", "1.0", "h")).unwrap();
        repo.set_control_state("r", "S").unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["r.json".to_string()]);
    }

    #[test]
    fn test_corrupt_record_is_error() {
        let dir = tempdir().unwrap();
        let repo = FileRunRepository::open(dir.path()).unwrap();
        fs::write(repo.record_path("bad"), "{").unwrap();
        assert!(matches!(repo.get_run("bad"), Err(RepositoryError::Json { .. })));
    }
}
