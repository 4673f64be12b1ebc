//! Experiment Execution Engine
//!
//! Drives one run of a compiled artifact:
//! - Derives the run id from the artifact and resumes an existing run
//! - Walks the control graph one space at a time
//! - Persists every state change before announcing it
//! - Pause/resume via file-based signaling, termination between units

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info};

use super::context::{RunContext, TerminationHandle};
use super::control::ControlFlowManager;
use super::data::{DataManager, RunResults};
use super::error::RunError;
use super::input::{ConsoleInputProvider, InputProvider};
use super::limiter::RunLimiter;
use super::progress::{ProgressEmitter, ProgressEvent};
use super::space::SpaceExecutor;
use super::task::TaskExecutor;
use crate::compiler::Artifact;
use crate::repository::{ExecutionStats, RunRecord, RunRepository, RunStatus, UnitStatus};
use crate::workflow::model::END;

/// Outcome of a finished run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub results: RunResults,
    pub task_stats: ExecutionStats,
    pub elapsed: Duration,
    /// Whether previously persisted progress was picked up
    pub resumed: bool,
    pub timeline_chart: String,
    pub resource_summary: String,
}

/// Experiment execution engine.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use expflow::compiler::load_artifact;
/// use expflow::execution::Engine;
/// use expflow::repository::FileRunRepository;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let artifact = load_artifact("experiment.json")?;
///     let repository = Arc::new(FileRunRepository::open(".expflow/runs")?);
///
///     let mut engine = Engine::new(artifact, repository);
///     engine.set_working_dir("/data/analysis");
///
///     let summary = engine.run().await?;
///     println!("{} finished: {}", summary.run_id, summary.status);
///     Ok(())
/// }
/// ```
pub struct Engine {
    artifact: Arc<Artifact>,
    repository: Arc<dyn RunRepository>,
    artifact_path: Option<PathBuf>,
    working_dir: Option<PathBuf>,
    input: Arc<dyn InputProvider>,
    emitter: ProgressEmitter,
    limiter: RunLimiter,
    pause_flag_path: Option<PathBuf>,
    termination: TerminationHandle,
    dry_run: bool,
}

impl Engine {
    pub fn new(artifact: Artifact, repository: Arc<dyn RunRepository>) -> Self {
        Self {
            artifact: Arc::new(artifact),
            repository,
            artifact_path: None,
            working_dir: None,
            input: Arc::new(ConsoleInputProvider::new()),
            emitter: ProgressEmitter::new(),
            limiter: RunLimiter::default(),
            pause_flag_path: None,
            termination: TerminationHandle::new(),
            dry_run: false,
        }
    }

    /// Recorded on new runs for later inspection.
    pub fn set_artifact_path(&mut self, path: impl Into<PathBuf>) {
        self.artifact_path = Some(path.into());
    }

    /// Sets the working directory for task execution.
    pub fn set_working_dir(&mut self, dir: impl Into<PathBuf>) {
        self.working_dir = Some(dir.into());
    }

    /// Source of values for conditional transitions.
    pub fn set_input_provider(&mut self, provider: impl InputProvider + 'static) {
        self.input = Arc::new(provider);
    }

    pub fn set_emitter(&mut self, emitter: ProgressEmitter) {
        self.emitter = emitter;
    }

    pub fn emitter(&self) -> &ProgressEmitter {
        &self.emitter
    }

    /// Shares a limiter between engines in the same process.
    pub fn set_limiter(&mut self, limiter: RunLimiter) {
        self.limiter = limiter;
    }

    /// Sets the path for pause/resume signaling.
    pub fn set_pause_flag_path(&mut self, path: impl Into<PathBuf>) {
        self.pause_flag_path = Some(path.into());
    }

    pub fn set_termination_handle(&mut self, handle: TerminationHandle) {
        self.termination = handle;
    }

    pub fn termination_handle(&self) -> TerminationHandle {
        self.termination.clone()
    }

    /// Enables or disables dry run mode.
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    /// Executes the artifact.
    ///
    /// A run that already exists for this artifact is resumed, or, if it
    /// completed, its results are returned without executing anything.
    pub async fn run(&self) -> Result<RunSummary, RunError> {
        let hash = self.artifact.content_hash()?;
        let run_id = self.artifact.run_id()?;

        match self.repository.get_run(&run_id)? {
            Some(run) => {
                check_hash(&run, &hash)?;
                if run.status == RunStatus::Completed {
                    info!("Run '{}' already completed", run_id);
                    return self.summary(&run_id, true, Duration::ZERO, None);
                }
                info!("Resuming run '{}' (was {})", run_id, run.status);
                self.drive(run_id, true).await
            }
            None => {
                let mut record = RunRecord::new(
                    &run_id,
                    &self.artifact.experiment,
                    &self.artifact.version,
                    &hash,
                );
                if let Some(path) = &self.artifact_path {
                    record = record.with_artifact_path(path.display().to_string());
                }
                self.repository.create_run(record)?;
                info!("Starting fresh run '{}'", run_id);
                self.drive(run_id, false).await
            }
        }
    }

    /// Resumes a specific run, which must belong to this artifact.
    pub async fn resume(&self, run_id: &str) -> Result<RunSummary, RunError> {
        let run = self
            .repository
            .get_run(run_id)?
            .ok_or_else(|| RunError::RunNotFound(run_id.to_string()))?;
        check_hash(&run, &self.artifact.content_hash()?)?;

        if run.status == RunStatus::Completed {
            info!("Run '{}' already completed", run_id);
            return self.summary(run_id, true, Duration::ZERO, None);
        }
        info!("Resuming run '{}' (was {})", run_id, run.status);
        self.drive(run_id.to_string(), true).await
    }

    /// Results of a run of this artifact, complete or not.
    pub fn results(&self, run_id: &str) -> Result<RunResults, RunError> {
        DataManager::new(&self.artifact, self.repository.as_ref()).collect(run_id)
    }

    async fn drive(&self, run_id: String, resumed: bool) -> Result<RunSummary, RunError> {
        let _permit = self.limiter.acquire().await?;
        let start_time = Instant::now();

        let ctx = RunContext::new(&run_id, Arc::clone(&self.artifact), Arc::clone(&self.repository))
            .with_emitter(self.emitter.clone())
            .with_termination(self.termination.clone())
            .with_pause_flag(self.pause_flag_path.clone());

        self.repository
            .set_run_status(&run_id, RunStatus::Running, None)?;

        info!(
            "Executing '{}' ({} spaces, dry run: {})",
            self.artifact.experiment,
            self.artifact.spaces.len(),
            self.dry_run
        );

        let outcome = self.traverse(&ctx, resumed).await;
        let elapsed = start_time.elapsed();

        match outcome {
            Ok(()) => {
                self.repository
                    .set_run_status(&run_id, RunStatus::Completed, None)?;
                self.repository.set_run_position(&run_id, None, None, None)?;
                info!("Run '{}' completed in {:.2?}", run_id, elapsed);
                self.summary(&run_id, resumed, elapsed, Some(&ctx))
            }
            Err(e) if e.is_termination() => {
                info!("Run '{}' terminated after {:.2?}; it can be resumed", run_id, elapsed);
                Err(e)
            }
            Err(e) => {
                error!("Run '{}' failed: {}", run_id, e);
                let message = e.to_string();
                self.repository
                    .set_run_status(&run_id, RunStatus::Failed, Some(message.clone()))?;
                ctx.emit(ProgressEvent::Error {
                    run_id: run_id.clone(),
                    message,
                });
                Err(e)
            }
        }
    }

    async fn traverse(&self, ctx: &RunContext, resumed: bool) -> Result<(), RunError> {
        let repo = ctx.repo();
        let tasks = self.task_executor();
        let spaces = SpaceExecutor::new(ctx, &tasks);
        let control = ControlFlowManager::new(ctx, self.input.as_ref());

        let mut current = match repo.get_control_state(&ctx.run_id)? {
            Some(state) if resumed => state.current_space,
            _ => ctx.artifact.control.start.clone(),
        };
        let mut first = true;

        while current != END {
            let space = ctx
                .artifact
                .find_space(&current)
                .ok_or_else(|| RunError::UnknownSpace(current.clone()))?;
            repo.set_control_state(&ctx.run_id, &current)?;

            let completed = repo
                .get_space_record(&ctx.run_id, &current)?
                .map_or(false, |r| r.status == UnitStatus::Completed);

            if completed && resumed && first {
                debug!("Space '{}' already completed, evaluating its transitions", current);
            } else {
                if completed {
                    info!("Re-entering space '{}'", current);
                    repo.reset_space(&ctx.run_id, &current)?;
                }
                spaces.execute(space).await?;
                ctx.check_terminated()?;
            }

            first = false;
            current = control.next_space(&current).await?;
        }

        repo.set_control_state(&ctx.run_id, END)?;
        Ok(())
    }

    fn task_executor(&self) -> TaskExecutor {
        let executor = TaskExecutor::new().with_dry_run(self.dry_run);
        match &self.working_dir {
            Some(dir) => executor.with_working_dir(dir),
            None => executor,
        }
    }

    fn summary(
        &self,
        run_id: &str,
        resumed: bool,
        elapsed: Duration,
        ctx: Option<&RunContext>,
    ) -> Result<RunSummary, RunError> {
        let status = self
            .repository
            .get_run(run_id)?
            .map(|r| r.status)
            .ok_or_else(|| RunError::RunNotFound(run_id.to_string()))?;

        Ok(RunSummary {
            run_id: run_id.to_string(),
            status,
            results: self.results(run_id)?,
            task_stats: self.repository.get_task_stats(run_id, None)?,
            elapsed,
            resumed,
            timeline_chart: ctx.map(|c| c.timeline_chart()).unwrap_or_default(),
            resource_summary: ctx.map(|c| c.resource_summary()).unwrap_or_default(),
        })
    }
}

fn check_hash(run: &RunRecord, actual: &str) -> Result<(), RunError> {
    if run.artifact_hash == actual {
        return Ok(());
    }
    Err(RunError::ArtifactMismatch {
        run_id: run.run_id.clone(),
        expected: run.artifact_hash.clone(),
        actual: actual.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{
        ControlDefinition, ParameterSet, SpaceDefinition, TaskDefinition, Transition,
        ARTIFACT_VERSION,
    };
    use crate::execution::input::ScriptedInputProvider;
    use crate::execution::task::DRY_RUN_VALUE;
    use crate::repository::MemoryRunRepository;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn task(id: &str, implementation: &str, outputs: &[&str]) -> TaskDefinition {
        TaskDefinition {
            task_id: id.to_string(),
            workflow: "W".to_string(),
            implementation: implementation.to_string(),
            dynamic_parameters: vec!["p".to_string()],
            static_parameters: BTreeMap::new(),
            input_data: Vec::new(),
            output_data: outputs.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn space(id: &str, task: &str, sets: usize) -> SpaceDefinition {
        SpaceDefinition {
            space_id: id.to_string(),
            tasks_order: vec![task.to_string()],
            parameters: (0..sets)
                .map(|i| ParameterSet::from([("p".to_string(), json!(i))]))
                .collect(),
            input_data: BTreeMap::new(),
        }
    }

    fn artifact(transitions: Vec<Transition>) -> Artifact {
        Artifact {
            experiment: "E".into(),
            version: ARTIFACT_VERSION.into(),
            tasks: vec![vec![
                task("W:a", "./a.sh", &["x"]),
                task("W:b", "./b.sh", &["y"]),
            ]],
            spaces: vec![space("A", "W:a", 2), space("B", "W:b", 1)],
            control: ControlDefinition {
                start: "A".into(),
                transitions,
            },
        }
    }

    fn chain() -> Vec<Transition> {
        vec![Transition::new("A", "B"), Transition::new("B", END)]
    }

    fn engine(artifact: Artifact, repo: Arc<MemoryRunRepository>) -> Engine {
        let mut engine = Engine::new(artifact, repo);
        engine.set_dry_run(true);
        engine.set_input_provider(ScriptedInputProvider::default());
        engine
    }

    #[tokio::test]
    async fn test_run_completes_and_collects_results() {
        let repo = Arc::new(MemoryRunRepository::new());
        let engine = engine(artifact(chain()), repo.clone());

        let summary = engine.run().await.unwrap();

        assert_eq!(summary.status, RunStatus::Completed);
        assert!(!summary.resumed);
        assert_eq!(summary.task_stats.completed, 3);
        assert_eq!(summary.results["A"]["x_param0"], DRY_RUN_VALUE);
        assert_eq!(summary.results["A"]["x_param1"], DRY_RUN_VALUE);
        assert_eq!(summary.results["B"].len(), 1);

        let state = repo.get_control_state(&summary.run_id).unwrap().unwrap();
        assert_eq!(state.current_space, END);
    }

    #[tokio::test]
    async fn test_completed_run_is_not_executed_again() {
        let repo = Arc::new(MemoryRunRepository::new());
        let engine = engine(artifact(chain()), repo.clone());
        engine.run().await.unwrap();

        let mut events = engine.emitter().subscribe_channel();
        let summary = engine.run().await.unwrap();

        assert!(summary.resumed);
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.results["A"].len(), 2);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_resume_rejects_changed_artifact() {
        let repo = Arc::new(MemoryRunRepository::new());
        let original = artifact(chain());
        let run_id = original.run_id().unwrap();
        repo.create_run(RunRecord::new(&run_id, "E", ARTIFACT_VERSION, "stale-hash"))
            .unwrap();

        let engine = engine(original, repo);
        let err = engine.resume(&run_id).await.unwrap_err();
        assert!(matches!(err, RunError::ArtifactMismatch { expected, .. } if expected == "stale-hash"));
    }

    #[tokio::test]
    async fn test_resume_unknown_run() {
        let engine = engine(artifact(chain()), Arc::new(MemoryRunRepository::new()));
        let err = engine.resume("nope").await.unwrap_err();
        assert!(matches!(err, RunError::RunNotFound(_)));
    }

    #[tokio::test]
    async fn test_conditional_loop_reexecutes_space() {
        let transitions = vec![
            Transition::new("A", "B"),
            Transition::new("B", "A").with_condition("again == 'yes'"),
            Transition::new("B", END),
        ];
        let repo = Arc::new(MemoryRunRepository::new());
        let mut engine = engine(artifact(transitions), repo);
        engine.set_input_provider(ScriptedInputProvider::new(["yes", "no"]));

        let mut events = engine.emitter().subscribe_channel();
        let summary = engine.run().await.unwrap();
        assert_eq!(summary.status, RunStatus::Completed);

        let mut space_starts = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ProgressEvent::SpaceStarted { space, .. } = event {
                space_starts.push(space);
            }
        }
        assert_eq!(space_starts, vec!["A", "B", "A", "B"]);
    }

    #[tokio::test]
    async fn test_no_transition_fails_run() {
        let transitions = vec![
            Transition::new("A", "B"),
            Transition::new("B", END).with_condition("n > 10"),
        ];
        let repo = Arc::new(MemoryRunRepository::new());
        let mut engine = engine(artifact(transitions), repo.clone());
        engine.set_input_provider(ScriptedInputProvider::new(["3"]));
        let run_id = engine.artifact().run_id().unwrap();

        let mut events = engine.emitter().subscribe_channel();
        let err = engine.run().await.unwrap_err();
        assert!(matches!(err, RunError::NoTransition { .. }));

        let run = repo.get_run(&run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.unwrap().contains("No transition condition evaluated to true"));

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            saw_error |= matches!(event, ProgressEvent::Error { .. });
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_terminated_run_resumes_to_completion() {
        let repo = Arc::new(MemoryRunRepository::new());
        let engine = engine(artifact(chain()), repo.clone());
        let run_id = engine.artifact().run_id().unwrap();

        engine.termination_handle().terminate();
        let err = engine.run().await.unwrap_err();
        assert!(err.is_termination());
        assert_eq!(
            repo.get_run(&run_id).unwrap().unwrap().status,
            RunStatus::Terminated
        );
        assert_eq!(repo.get_task_stats(&run_id, None).unwrap().completed, 1);

        engine.termination_handle().reset();
        let summary = engine.run().await.unwrap();
        assert!(summary.resumed);
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.task_stats.completed, 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_task_failure_marks_run_failed() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("a.sh");
        std::fs::write(&script, "#!/bin/sh\necho boom >&2\nexit 3\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let repo = Arc::new(MemoryRunRepository::new());
        let mut engine = Engine::new(artifact(chain()), repo.clone());
        engine.set_working_dir(dir.path());
        let run_id = engine.artifact().run_id().unwrap();

        let err = engine.run().await.unwrap_err();
        assert!(matches!(
            err,
            RunError::TaskFailed { ref task, param_set: 0, .. } if task == "W:a"
        ));

        let snapshot = repo.snapshot(&run_id).unwrap();
        assert_eq!(snapshot.run.status, RunStatus::Failed);
        assert_eq!(snapshot.spaces[0].status, UnitStatus::Failed);
        assert_eq!(snapshot.param_sets[0].status, UnitStatus::Failed);
        assert!(snapshot.tasks[0].error.as_deref().unwrap_or("").contains("boom"));
    }
}
