//! Mock command runner for testing
//!
//! Records every invocation and answers with scripted output.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{CommandOutput, CommandRunner};
use crate::BastionError;

type Handler = Arc<dyn Fn(&[String]) -> CommandOutput + Send + Sync>;

/// A single recorded invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment passed with the call
    pub env: Vec<(String, String)>,
}

impl RecordedCall {
    /// `program arg1 arg2 ...` on one line
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Mock command runner
///
/// Programs without a handler succeed with empty output.
///
/// # Example
/// ```
/// use bastion_init::system::mock::MockRunner;
/// use bastion_init::system::CommandOutput;
///
/// let runner = MockRunner::new()
///     .with_output("systemctl", CommandOutput::failure(1, "unit not found"));
/// ```
#[derive(Default)]
pub struct MockRunner {
    handlers: HashMap<String, Handler>,
    missing: Vec<String>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockRunner {
    /// Create a runner where every command succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer calls to `program` with a computed output
    pub fn with_handler<F>(mut self, program: &str, handler: F) -> Self
    where
        F: Fn(&[String]) -> CommandOutput + Send + Sync + 'static,
    {
        self.handlers.insert(program.to_string(), Arc::new(handler));
        self
    }

    /// Answer every call to `program` with the same output
    pub fn with_output(self, program: &str, output: CommandOutput) -> Self {
        self.with_handler(program, move |_| output.clone())
    }

    /// Make `program` fail to start, as if it were not installed
    pub fn with_missing(mut self, program: &str) -> Self {
        self.missing.push(program.to_string());
        self
    }

    /// All recorded calls, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Recorded calls to one program, in order
    pub fn calls_to(&self, program: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == program)
            .collect()
    }

    /// Index of the first call whose command line starts with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.calls()
            .iter()
            .position(|c| c.command_line().starts_with(prefix))
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run_with_env(
        &self,
        program: &str,
        args: &[String],
        env: &[(&str, &str)],
    ) -> Result<CommandOutput, BastionError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                program: program.to_string(),
                args: args.to_vec(),
                env: env
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            });
        }

        if self.missing.iter().any(|m| m == program) {
            return Err(BastionError::Command(format!(
                "{}: No such file or directory",
                program
            )));
        }

        Ok(match self.handlers.get(program) {
            Some(handler) => handler(args),
            None => CommandOutput::success(""),
        })
    }
}
