//! User input providers for conditional transitions.
//!
//! The control-flow manager suspends on [`InputProvider::request`] until a
//! value arrives. There is no timeout here; callers that need bounded
//! waits wrap the provider.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use futures::future::BoxFuture;
use futures::FutureExt;
use log::debug;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::error::RunError;

/// Given a prompt, produce a string value.
pub trait InputProvider: Send + Sync {
    fn request<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String, RunError>>;
}

type LineSource = Box<dyn AsyncBufRead + Send + Unpin>;

/// Prompts on stdout and reads one line per request from stdin.
///
/// One reader is kept for the provider's lifetime, so lines that arrive
/// together (piped answers) are handed out one request at a time.
pub struct ConsoleInputProvider {
    reader: tokio::sync::Mutex<LineSource>,
}

impl ConsoleInputProvider {
    pub fn new() -> Self {
        Self::from_reader(BufReader::new(tokio::io::stdin()))
    }

    /// Reads answers from `reader` instead of stdin.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        Self {
            reader: tokio::sync::Mutex::new(Box::new(reader)),
        }
    }
}

impl Default for ConsoleInputProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConsoleInputProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleInputProvider").finish_non_exhaustive()
    }
}

impl InputProvider for ConsoleInputProvider {
    fn request<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String, RunError>> {
        async move {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(format!("{} ", prompt).as_bytes()).await?;
            stdout.flush().await?;

            let mut line = String::new();
            let read = self.reader.lock().await.read_line(&mut line).await?;
            if read == 0 {
                return Err(RunError::Input("stdin closed".to_string()));
            }
            Ok(line.trim_end_matches(['\r', '\n']).to_string())
        }
        .boxed()
    }
}

/// Answers prompts from a fixed queue, in order.
#[derive(Debug, Default)]
pub struct ScriptedInputProvider {
    answers: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedInputProvider {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.answers.lock().map(|a| a.len()).unwrap_or(0)
    }
}

impl InputProvider for ScriptedInputProvider {
    fn request<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String, RunError>> {
        async move {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
            let answer = self
                .answers
                .lock()
                .map_err(|_| RunError::Input("answer queue poisoned".to_string()))?
                .pop_front()
                .ok_or_else(|| RunError::Input(format!("no scripted answer for '{}'", prompt)))?;
            debug!("Scripted answer for '{}': {}", prompt, answer);
            Ok(answer)
        }
        .boxed()
    }
}
