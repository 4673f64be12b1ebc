//! ExpFlow CLI Entry Point
//!
//! # Usage
//!
//! ```bash
//! # Compile an experiment into an artifact
//! expflow compile experiment.yaml --workflows workflows/ -o experiment.json
//!
//! # Execute (or continue) the run for an artifact
//! expflow run experiment.json --working-dir /path/to/data
//!
//! # Preview task commands without executing them
//! expflow run experiment.json --dry-run
//!
//! # Inspect runs
//! expflow status
//! expflow results experiment.json
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use log::{info, warn};

use expflow::compiler::{load_artifact, save_artifact, Compilation, Compiler};
use expflow::config::Settings;
use expflow::execution::{Engine, RunLimiter, RunSummary, ScriptedInputProvider};
use expflow::repository::{FileRunRepository, RunRepository, RunStatus};
use expflow::workflow::{load_experiment, load_workflow_files, load_workflows_from_dir};
use expflow::{APP_NAME, VERSION};

#[derive(Parser)]
#[command(name = "expflow")]
#[command(about = "Compile and run multi-stage parameterized experiments")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,

    #[arg(short, long, global = true, help = "Path to settings file")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Directory holding run records")]
    runs_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Compile an experiment into a JSON artifact
    Compile {
        #[arg(help = "Path to experiment YAML file")]
        experiment: PathBuf,

        #[arg(short, long, num_args = 1.., required = true, help = "Workflow files or directories")]
        workflows: Vec<PathBuf>,

        #[arg(short, long, help = "Artifact output path (default: <experiment>.json)")]
        output: Option<PathBuf>,
    },

    /// Check an experiment without writing an artifact
    Validate {
        #[arg(help = "Path to experiment YAML file")]
        experiment: PathBuf,

        #[arg(short, long, num_args = 1.., required = true, help = "Workflow files or directories")]
        workflows: Vec<PathBuf>,
    },

    /// Execute an artifact, resuming its run if one exists
    Run {
        #[arg(help = "Path to artifact JSON file")]
        artifact: PathBuf,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Resume a specific run
    Resume {
        #[arg(help = "Run id")]
        run_id: String,

        #[arg(help = "Path to the artifact the run was started from")]
        artifact: PathBuf,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Show stored runs, or one run in detail
    Status {
        #[arg(help = "Run id")]
        run_id: Option<String>,
    },

    /// Print the results of an artifact's run as JSON
    Results {
        #[arg(help = "Path to artifact JSON file")]
        artifact: PathBuf,

        #[arg(long, help = "Run id (default: derived from the artifact)")]
        run_id: Option<String>,
    },
}

#[derive(clap::Args)]
struct RunOptions {
    #[arg(long, help = "Preview commands without execution")]
    dry_run: bool,

    #[arg(long, help = "Working directory for task execution")]
    working_dir: Option<PathBuf>,

    #[arg(long, help = "Pause while this file exists")]
    pause_flag: Option<PathBuf>,

    #[arg(long = "answer", help = "Answer for a transition prompt, in order (repeatable)")]
    answers: Vec<String>,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!();
}

fn load_workflows(paths: &[PathBuf]) -> Result<Vec<expflow::workflow::WorkflowModel>, Box<dyn std::error::Error>> {
    let mut files = Vec::new();
    let mut workflows = Vec::new();
    for path in paths {
        if path.is_dir() {
            workflows.extend(load_workflows_from_dir(path)?);
        } else {
            files.push(path.clone());
        }
    }
    workflows.extend(load_workflow_files(&files)?);
    Ok(workflows)
}

fn compile_sources(
    experiment: &Path,
    workflows: &[PathBuf],
) -> Result<Compilation, Box<dyn std::error::Error>> {
    info!("Loading experiment: {}", experiment.display());
    let experiment = load_experiment(experiment)?;
    let workflows = load_workflows(workflows)?;

    let compilation = Compiler::new(&experiment, &workflows).compile().map_err(|e| {
        for error in e.clone().into_list() {
            eprintln!("{} {}", "error:".red().bold(), error);
        }
        e
    })?;

    for warning in &compilation.warnings {
        println!("{} {}", "warning:".yellow().bold(), warning);
    }
    Ok(compilation)
}

fn colored_status(status: RunStatus) -> colored::ColoredString {
    let text = status.to_string();
    match status {
        RunStatus::Completed => text.green(),
        RunStatus::Running => text.cyan(),
        RunStatus::Failed => text.red(),
        RunStatus::Terminated => text.yellow(),
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Run {}: {}", summary.run_id.bold(), colored_status(summary.status));
    if summary.resumed {
        println!("Resumed from stored progress");
    }
    println!(
        "Tasks: {} completed, {} failed",
        summary.task_stats.completed, summary.task_stats.failed
    );
    println!("Total execution time: {:.2?}", summary.elapsed);

    if !summary.timeline_chart.is_empty() {
        println!();
        println!("{}", summary.timeline_chart);
    }
    if !summary.resource_summary.is_empty() {
        println!("{}", summary.resource_summary);
    }

    println!();
    for (space, values) in &summary.results {
        println!("{}", space.bold());
        for (name, value) in values {
            println!("  {} = {}", name, value);
        }
    }
}

fn open_repository(settings: &Settings) -> Result<Arc<FileRunRepository>, Box<dyn std::error::Error>> {
    let repository = FileRunRepository::open(&settings.runs_dir)?;
    info!("Run records: {}", settings.runs_dir.display());
    Ok(Arc::new(repository))
}

fn build_engine(
    artifact_path: &Path,
    options: RunOptions,
    settings: &Settings,
) -> Result<Engine, Box<dyn std::error::Error>> {
    let artifact = load_artifact(artifact_path)?;
    info!(
        "Artifact loaded: '{}', {} spaces, {} tasks",
        artifact.experiment,
        artifact.spaces.len(),
        artifact.task_count()
    );

    let mut engine = Engine::new(artifact, open_repository(settings)?);
    engine.set_artifact_path(artifact_path);
    engine.set_dry_run(options.dry_run);
    engine.set_limiter(RunLimiter::new(settings.max_concurrent_runs));

    if options.dry_run {
        info!("Mode: DRY RUN (commands will not execute)");
    }
    if let Some(dir) = options.working_dir.or_else(|| settings.working_dir.clone()) {
        if !dir.is_dir() {
            return Err(format!("Working directory does not exist: {}", dir.display()).into());
        }
        info!("Working directory: {}", dir.display());
        engine.set_working_dir(dir);
    }
    if let Some(path) = options.pause_flag {
        info!("Pause control: {}", path.display());
        engine.set_pause_flag_path(path);
    }
    if !options.answers.is_empty() {
        engine.set_input_provider(ScriptedInputProvider::new(options.answers));
    }

    // Ctrl-C stops the run at the next unit boundary
    let handle = engine.termination_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received - stopping after the current task");
            handle.terminate();
        }
    });

    Ok(engine)
}

fn print_status(repository: &dyn RunRepository, run_id: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(run_id) = run_id else {
        let runs = repository.list_runs()?;
        if runs.is_empty() {
            println!("No runs recorded");
        }
        for run in runs {
            println!(
                "{}  {}  {}",
                run.run_id,
                colored_status(run.status),
                run.updated_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
        return Ok(());
    };

    let run = repository
        .get_run(run_id)?
        .ok_or_else(|| format!("Run not found: {}", run_id))?;
    let spaces = repository.get_space_stats(run_id)?;
    let tasks = repository.get_task_stats(run_id, None)?;

    println!("Run:        {}", run.run_id.bold());
    println!("Experiment: {} (artifact {})", run.experiment, run.version);
    println!("Status:     {}", colored_status(run.status));
    println!("Started:    {}", run.started_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(finished) = run.finished_at {
        println!("Finished:   {}", finished.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(space) = &run.current_space {
        println!(
            "Position:   space {}, parameter set {}, task {}",
            space,
            run.current_param_set.map_or("-".to_string(), |i| i.to_string()),
            run.current_task.as_deref().unwrap_or("-")
        );
    }
    println!("Spaces:     {} completed, {} failed", spaces.completed, spaces.failed);
    println!("Tasks:      {} completed, {} failed", tasks.completed, tasks.failed);
    if let Some(error) = &run.error {
        println!("Error:      {}", error.red());
    }
    Ok(())
}

/// Main application entry point.
async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(dir) = cli.runs_dir {
        settings.runs_dir = dir;
    }

    setup_logging(cli.verbose, &settings.log_level);
    print_banner();
    if let Some(path) = Settings::source_path(cli.config.as_deref()) {
        info!("Loaded settings from {}", path.display());
    }

    match cli.command {
        Command::Compile {
            experiment,
            workflows,
            output,
        } => {
            let compilation = compile_sources(&experiment, &workflows)?;
            let output = output.unwrap_or_else(|| experiment.with_extension("json"));
            save_artifact(&compilation.artifact, &output)?;
            println!(
                "{} {} ({} spaces, {} tasks)",
                "Wrote".green(),
                output.display(),
                compilation.artifact.spaces.len(),
                compilation.artifact.task_count()
            );
        }
        Command::Validate {
            experiment,
            workflows,
        } => {
            let compilation = compile_sources(&experiment, &workflows)?;
            println!(
                "{} '{}' is valid ({} warning(s))",
                "OK".green().bold(),
                compilation.artifact.experiment,
                compilation.warnings.len()
            );
        }
        Command::Run { artifact, options } => {
            let engine = build_engine(&artifact, options, &settings)?;
            let summary = engine.run().await?;
            print_summary(&summary);
        }
        Command::Resume {
            run_id,
            artifact,
            options,
        } => {
            let engine = build_engine(&artifact, options, &settings)?;
            let summary = engine.resume(&run_id).await?;
            print_summary(&summary);
        }
        Command::Status { run_id } => {
            let repository = open_repository(&settings)?;
            print_status(repository.as_ref(), run_id.as_deref())?;
        }
        Command::Results { artifact, run_id } => {
            let artifact = load_artifact(&artifact)?;
            let run_id = match run_id {
                Some(id) => id,
                None => artifact.run_id()?,
            };
            let engine = Engine::new(artifact, open_repository(&settings)?);
            let results = engine.results(&run_id)?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
