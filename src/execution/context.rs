//! Per-run state shared by the engine's managers.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, warn};

use super::error::RunError;
use super::progress::{ProgressEmitter, ProgressEvent};
use crate::compiler::Artifact;
use crate::monitoring::{EventType, ExecutionTimeline, ResourceMonitor, TaskKey};
use crate::repository::{RunRepository, RunStatus};

/// Interval for checking the pause flag file.
const PAUSE_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Requests that a run stop at the next unit boundary.
///
/// A subprocess that is already running is not interrupted.
#[derive(Debug, Clone, Default)]
pub struct TerminationHandle {
    flag: Arc<AtomicBool>,
}

impl TerminationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn terminate(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_terminated(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clears a previous request so the handle can drive another run.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

pub struct RunContext {
    pub run_id: String,
    pub artifact: Arc<Artifact>,
    pub repository: Arc<dyn RunRepository>,
    pub emitter: ProgressEmitter,
    pub termination: TerminationHandle,
    pub pause_flag: Option<PathBuf>,
    timeline: Mutex<ExecutionTimeline>,
    monitor: Mutex<ResourceMonitor>,
}

impl RunContext {
    pub fn new(
        run_id: impl Into<String>,
        artifact: Arc<Artifact>,
        repository: Arc<dyn RunRepository>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            artifact,
            repository,
            emitter: ProgressEmitter::new(),
            termination: TerminationHandle::new(),
            pause_flag: None,
            timeline: Mutex::new(ExecutionTimeline::new()),
            monitor: Mutex::new(ResourceMonitor::new()),
        }
    }

    pub fn with_emitter(mut self, emitter: ProgressEmitter) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn with_termination(mut self, termination: TerminationHandle) -> Self {
        self.termination = termination;
        self
    }

    pub fn with_pause_flag(mut self, path: Option<PathBuf>) -> Self {
        self.pause_flag = path;
        self
    }

    pub fn repo(&self) -> &dyn RunRepository {
        self.repository.as_ref()
    }

    pub fn emit(&self, event: ProgressEvent) {
        self.emitter.emit(event);
    }

    /// Persists `terminated` and fails if termination was requested.
    pub fn check_terminated(&self) -> Result<(), RunError> {
        if !self.termination.is_terminated() {
            return Ok(());
        }
        info!("Run '{}' terminated on request", self.run_id);
        self.repo()
            .set_run_status(&self.run_id, RunStatus::Terminated, None)?;
        Err(RunError::Terminated(self.run_id.clone()))
    }

    /// Waits while the pause flag file exists.
    pub async fn wait_if_paused(&self) {
        let Some(path) = &self.pause_flag else { return };
        if !path.exists() {
            return;
        }

        info!("Execution paused - waiting for resume signal");
        while path.exists() && !self.termination.is_terminated() {
            tokio::time::sleep(PAUSE_CHECK_INTERVAL).await;
        }
        info!("Resumed");
    }

    pub fn record(&self, key: TaskKey, event_type: EventType) {
        match self.timeline.lock() {
            Ok(mut timeline) => timeline.add_event(key, event_type),
            Err(_) => warn!("Timeline lock poisoned; event dropped"),
        }
    }

    pub fn sample_resources(&self, label: &str) {
        if let Ok(mut monitor) = self.monitor.lock() {
            monitor.sample(label);
        }
    }

    pub fn timeline_chart(&self) -> String {
        self.timeline
            .lock()
            .map(|t| t.gantt_chart())
            .unwrap_or_default()
    }

    pub fn resource_summary(&self) -> String {
        self.monitor
            .lock()
            .map(|m| m.get_summary())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MemoryRunRepository, RunRecord};
    use crate::compiler::{ControlDefinition, ARTIFACT_VERSION};

    fn context() -> RunContext {
        let artifact = Artifact {
            experiment: "E".into(),
            version: ARTIFACT_VERSION.into(),
            tasks: Vec::new(),
            spaces: Vec::new(),
            control: ControlDefinition {
                start: "S".into(),
                transitions: Vec::new(),
            },
        };
        let repo = Arc::new(MemoryRunRepository::new());
        repo.create_run(RunRecord::new("r", "E", "1.0", "h")).unwrap();
        RunContext::new("r", Arc::new(artifact), repo)
    }

    #[test]
    fn test_termination_marks_run() {
        let ctx = context();
        assert!(ctx.check_terminated().is_ok());

        ctx.termination.terminate();
        assert!(matches!(ctx.check_terminated(), Err(RunError::Terminated(_))));
        let run = ctx.repo().get_run("r").unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Terminated);

        ctx.termination.reset();
        assert!(ctx.check_terminated().is_ok());
    }

    #[tokio::test]
    async fn test_pause_flag_blocks_until_removed() {
        let dir = tempfile::tempdir().unwrap();
        let flag = dir.path().join("pause.flag");
        std::fs::write(&flag, "paused").unwrap();

        let ctx = context().with_pause_flag(Some(flag.clone()));
        let remover = {
            let flag = flag.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                std::fs::remove_file(flag).unwrap();
            })
        };

        ctx.wait_if_paused().await;
        assert!(!flag.exists());
        remover.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_pause_flag_returns_immediately() {
        let ctx = context();
        ctx.wait_if_paused().await;
    }
}
