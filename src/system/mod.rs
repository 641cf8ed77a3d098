//! External command execution
//!
//! Every privileged operation (user creation, ownership changes, service
//! management, key inspection) goes through a [`CommandRunner`] so the
//! provisioning procedure can be exercised without root.

pub mod mock;

use crate::BastionError;
use async_trait::async_trait;
use tracing::debug;

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// A successful run with the given stdout
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed run with the given exit code and stderr
    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Trait for running external programs
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and extra environment variables
    ///
    /// Returns `Err` only when the program could not be started; a non-zero
    /// exit is reported through [`CommandOutput::code`].
    async fn run_with_env(
        &self,
        program: &str,
        args: &[String],
        env: &[(&str, &str)],
    ) -> Result<CommandOutput, BastionError>;

    /// Run `program` with `args` in the inherited environment
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, BastionError> {
        self.run_with_env(program, args, &[]).await
    }
}

/// Runs commands on the host with `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run_with_env(
        &self,
        program: &str,
        args: &[String],
        env: &[(&str, &str)],
    ) -> Result<CommandOutput, BastionError> {
        debug!("Running: {} {}", program, args.join(" "));

        let output = tokio::process::Command::new(program)
            .args(args)
            .envs(env.iter().copied())
            .output()
            .await
            .map_err(|e| BastionError::Command(format!("{}: {}", program, e)))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Build an owned argument vector from string slices
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items.into_iter().map(|s| s.as_ref().to_string()).collect()
}

/// Run a command and turn a non-zero exit into [`BastionError::Command`]
pub async fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[String],
) -> Result<CommandOutput, BastionError> {
    let output = runner.run(program, args).await?;
    if !output.is_success() {
        return Err(BastionError::Command(format!(
            "{} {} exited with status {}: {}",
            program,
            args.join(" "),
            output.code.unwrap_or(-1),
            output.stderr.trim()
        )));
    }
    Ok(output)
}
