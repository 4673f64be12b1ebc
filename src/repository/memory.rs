//! In-memory run repository.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{RepositoryError, RepositoryResult, RunRepository, RunSnapshot};

/// Keeps run snapshots in process memory; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryRunRepository {
    runs: Mutex<BTreeMap<String, RunSnapshot>>,
}

impl MemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunRepository for MemoryRunRepository {
    fn load_snapshot(&self, run_id: &str) -> RepositoryResult<Option<RunSnapshot>> {
        let runs = self.runs.lock().map_err(|_| RepositoryError::Poisoned)?;
        Ok(runs.get(run_id).cloned())
    }

    fn store_snapshot(&self, snapshot: &RunSnapshot) -> RepositoryResult<()> {
        let mut runs = self.runs.lock().map_err(|_| RepositoryError::Poisoned)?;
        runs.insert(snapshot.run.run_id.clone(), snapshot.clone());
        Ok(())
    }

    fn remove_snapshot(&self, run_id: &str) -> RepositoryResult<bool> {
        let mut runs = self.runs.lock().map_err(|_| RepositoryError::Poisoned)?;
        Ok(runs.remove(run_id).is_some())
    }

    fn run_ids(&self) -> RepositoryResult<Vec<String>> {
        let runs = self.runs.lock().map_err(|_| RepositoryError::Poisoned)?;
        Ok(runs.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::tests::exercise_repository;

    #[test]
    fn test_memory_repository_operations() {
        exercise_repository(&MemoryRunRepository::new());
    }
}
