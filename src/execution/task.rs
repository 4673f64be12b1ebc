//! Task Execution
//!
//! Runs one task implementation as a subprocess:
//!
//! - parameters are passed as `--name value` flags, in name order
//! - input values follow as a single positional argument, each value
//!   double-quoted and comma-joined (already quoted values pass through)
//! - the last non-empty stdout line holds the outputs as comma-separated,
//!   double-quoted values matching `outputData` positionally
//!
//! A non-zero exit status or a malformed output line fails the task.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use log::{debug, error};
use serde_json::Value;
use thiserror::Error;
use tokio::process::Command;

use crate::compiler::TaskDefinition;

/// Output value recorded for every declared output in dry-run mode.
pub const DRY_RUN_VALUE: &str = "<dry-run>";

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task has no implementation")]
    NoImplementation,

    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("exited with status {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },

    #[error("malformed output: {0}")]
    MalformedOutput(String),
}

/// Invokes task implementations.
#[derive(Debug, Clone, Default)]
pub struct TaskExecutor {
    working_dir: Option<PathBuf>,
    dry_run: bool,
}

impl TaskExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Runs a task and returns its output values in `outputData` order.
    pub async fn execute(
        &self,
        task: &TaskDefinition,
        parameters: &BTreeMap<String, Value>,
        inputs: &[String],
    ) -> Result<Vec<String>, TaskError> {
        let mut words = task.implementation.split_whitespace();
        let program = words.next().ok_or(TaskError::NoImplementation)?;
        let program = resolve_program(program, self.working_dir.as_deref());

        let mut args: Vec<String> = words.map(str::to_string).collect();
        args.extend(build_arguments(parameters, inputs));

        if self.dry_run {
            println!();
            println!("[DRY RUN] Task: {}", task.task_id);
            println!("  Command: {} {}", program.display(), args.join(" "));
            return Ok(vec![DRY_RUN_VALUE.to_string(); task.output_data.len()]);
        }

        debug!("Running {}: {} {:?}", task.task_id, program.display(), args);
        let started = Instant::now();

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await.map_err(|source| TaskError::Spawn {
            program: program.display().to_string(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            error!(
                "Task '{}' failed with exit code: {:?}",
                task.task_id,
                output.status.code()
            );
            if !stdout.trim().is_empty() {
                debug!("stdout:\n{}", stdout);
            }
            return Err(TaskError::Exit {
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        if !stderr.trim().is_empty() {
            debug!("Task '{}' stderr:\n{}", task.task_id, stderr);
        }
        debug!(
            "Task '{}' finished in {:.2?}",
            task.task_id,
            started.elapsed()
        );

        if task.output_data.is_empty() {
            return Ok(Vec::new());
        }

        let line = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| {
                TaskError::MalformedOutput(format!(
                    "expected {} output value(s), got no output",
                    task.output_data.len()
                ))
            })?;

        let values = parse_output_line(line)?;
        if values.len() != task.output_data.len() {
            return Err(TaskError::MalformedOutput(format!(
                "expected {} output value(s) {:?}, got {} in '{}'",
                task.output_data.len(),
                task.output_data,
                values.len(),
                line.trim()
            )));
        }
        Ok(values)
    }
}

/// Relative paths like `./run.sh` resolve against the working directory;
/// bare program names are looked up on `PATH`.
fn resolve_program(program: &str, working_dir: Option<&Path>) -> PathBuf {
    let path = Path::new(program);
    match working_dir {
        Some(dir) if path.is_relative() && path.components().count() > 1 => dir.join(path),
        _ => path.to_path_buf(),
    }
}

/// Flags for every parameter, then the quoted input list.
pub fn build_arguments(parameters: &BTreeMap<String, Value>, inputs: &[String]) -> Vec<String> {
    let mut args = Vec::with_capacity(parameters.len() * 2 + 1);
    for (name, value) in parameters {
        args.push(format!("--{}", name));
        args.push(value_text(value));
    }
    if !inputs.is_empty() {
        args.push(quote_inputs(inputs));
    }
    args
}

/// Parameter values as plain text; strings lose their JSON quotes.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `a`, `"b"` -> `"a","b"`
pub fn quote_inputs(inputs: &[String]) -> String {
    inputs
        .iter()
        .map(|value| {
            if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
                value.clone()
            } else {
                format!("\"{}\"", value)
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Splits one line of comma-separated, optionally double-quoted values.
///
/// Inside quotes, `""` is a literal quote and commas are kept.
pub fn parse_output_line(line: &str) -> Result<Vec<String>, TaskError> {
    let mut values = Vec::new();
    let mut chars = line.trim().chars().peekable();

    loop {
        while chars.peek().map_or(false, |c| c.is_whitespace()) {
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                if c == '"' {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        value.push('"');
                    } else {
                        closed = true;
                        break;
                    }
                } else {
                    value.push(c);
                }
            }
            if !closed {
                return Err(TaskError::MalformedOutput(format!(
                    "unterminated quote in '{}'",
                    line.trim()
                )));
            }
            while chars.peek().map_or(false, |c| c.is_whitespace()) {
                chars.next();
            }
            match chars.peek() {
                None | Some(',') => {}
                Some(other) => {
                    return Err(TaskError::MalformedOutput(format!(
                        "unexpected '{}' after quoted value in '{}'",
                        other,
                        line.trim()
                    )))
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
            value = value.trim().to_string();
        }

        values.push(value);

        match chars.next() {
            Some(',') => continue,
            None => break,
            Some(other) => {
                return Err(TaskError::MalformedOutput(format!(
                    "unexpected '{}' in '{}'",
                    other,
                    line.trim()
                )))
            }
        }
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn definition(implementation: &str, outputs: &[&str]) -> TaskDefinition {
        TaskDefinition {
            task_id: "W:t".to_string(),
            workflow: "W".to_string(),
            implementation: implementation.to_string(),
            dynamic_parameters: Vec::new(),
            static_parameters: BTreeMap::new(),
            input_data: Vec::new(),
            output_data: outputs.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[cfg(unix)]
    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_quote_inputs() {
        let inputs = vec!["a.csv".to_string(), "\"b.csv\"".to_string()];
        assert_eq!(quote_inputs(&inputs), "\"a.csv\",\"b.csv\"");
    }

    #[test]
    fn test_build_arguments() {
        let params = BTreeMap::from([
            ("rate".to_string(), json!(0.1)),
            ("mode".to_string(), json!("fast")),
        ]);
        let args = build_arguments(&params, &["in.csv".to_string()]);
        assert_eq!(args, vec!["--mode", "fast", "--rate", "0.1", "\"in.csv\""]);

        assert!(build_arguments(&BTreeMap::new(), &[]).is_empty());
    }

    #[test]
    fn test_parse_output_line() {
        assert_eq!(parse_output_line("\"a\",\"b\"").unwrap(), vec!["a", "b"]);
        assert_eq!(parse_output_line(" \"x, y\" , \"z\" ").unwrap(), vec!["x, y", "z"]);
        assert_eq!(parse_output_line("\"say \"\"hi\"\"\"").unwrap(), vec!["say \"hi\""]);
        assert_eq!(parse_output_line("plain,values").unwrap(), vec!["plain", "values"]);
        assert_eq!(parse_output_line("\"\"").unwrap(), vec![""]);
    }

    #[test]
    fn test_parse_output_line_errors() {
        assert!(parse_output_line("\"open").is_err());
        assert!(parse_output_line("\"a\"b").is_err());
    }

    #[test]
    fn test_resolve_program() {
        let dir = Path::new("/work");
        assert_eq!(resolve_program("./run.sh", Some(dir)), PathBuf::from("/work/./run.sh"));
        assert_eq!(resolve_program("bin/run", Some(dir)), PathBuf::from("/work/bin/run"));
        assert_eq!(resolve_program("python", Some(dir)), PathBuf::from("python"));
        assert_eq!(resolve_program("/abs/run", Some(dir)), PathBuf::from("/abs/run"));
        assert_eq!(resolve_program("./run.sh", None), PathBuf::from("./run.sh"));
    }

    #[tokio::test]
    async fn test_dry_run_records_placeholder() {
        let executor = TaskExecutor::new().with_dry_run(true);
        let outputs = executor
            .execute(&definition("./missing.sh", &["a", "b"]), &BTreeMap::new(), &[])
            .await
            .unwrap();
        assert_eq!(outputs, vec![DRY_RUN_VALUE, DRY_RUN_VALUE]);
    }

    #[tokio::test]
    async fn test_empty_implementation() {
        let result = TaskExecutor::new()
            .execute(&definition("  ", &[]), &BTreeMap::new(), &[])
            .await;
        assert!(matches!(result, Err(TaskError::NoImplementation)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_passes_flags_and_inputs() {
        let dir = tempdir().unwrap();
        script(
            dir.path(),
            "echo_args.sh",
            r#"echo "log line"
printf '"%s",%s\n' "$2" "$3""#,
        );

        let executor = TaskExecutor::new().with_working_dir(dir.path());
        let params = BTreeMap::from([("p".to_string(), json!("v1"))]);
        let outputs = executor
            .execute(
                &definition("./echo_args.sh", &["flag", "positional"]),
                &params,
                &["in.csv".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(outputs, vec!["v1", "in.csv"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let dir = tempdir().unwrap();
        script(dir.path(), "fail.sh", "echo broken >&2\nexit 3");

        let result = TaskExecutor::new()
            .with_working_dir(dir.path())
            .execute(&definition("./fail.sh", &[]), &BTreeMap::new(), &[])
            .await;

        match result {
            Err(TaskError::Exit { code, stderr }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_count_mismatch_fails() {
        let dir = tempdir().unwrap();
        script(dir.path(), "one.sh", "echo '\"only\"'");

        let result = TaskExecutor::new()
            .with_working_dir(dir.path())
            .execute(&definition("./one.sh", &["a", "b"]), &BTreeMap::new(), &[])
            .await;
        assert!(matches!(result, Err(TaskError::MalformedOutput(_))));
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let dir = tempdir().unwrap();
        let result = TaskExecutor::new()
            .with_working_dir(dir.path())
            .execute(&definition("./does-not-exist", &[]), &BTreeMap::new(), &[])
            .await;
        assert!(matches!(result, Err(TaskError::Spawn { .. })));
    }
}
