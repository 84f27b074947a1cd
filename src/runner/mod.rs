//! Helper-executable runner abstraction.
//!
//! Every external tool the rotator drives (`mount`, `exportfs`, `govc`,
//! `sendmail`, ...) is invoked through [`CommandRunner`] so tests can script
//! outcomes without spawning processes.

use std::ffi::OsString;
use std::io::Write as _;
use std::process::{Command, Stdio};

use shell_escape::unix::escape;
use thiserror::Error;
use tracing::debug;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Human readable exit status, `unknown` when the process was killed.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Extra process settings for a single invocation.
///
/// Secrets belong in `env`, never in the argument vector, so they do not
/// leak through the process table or the debug log.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunOptions {
    /// Environment variables added to the child environment.
    pub env: Vec<(String, String)>,
    /// Payload written to the child's standard input.
    pub stdin: Option<String>,
}

impl RunOptions {
    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the standard input payload.
    #[must_use]
    pub fn stdin(mut self, payload: impl Into<String>) -> Self {
        self.stdin = Some(payload.into());
        self
    }
}

/// Errors raised when a command cannot be run at all.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the stdin payload cannot be delivered.
    #[error("failed to write input to {program}: {message}")]
    Input {
        /// Command whose stdin could not be written.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError>;

    /// Runs `program` with extra environment and optional stdin.
    ///
    /// Runners that cannot honour the options fall back to [`Self::run`].
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] if the command cannot be started or fed.
    fn run_with(
        &self,
        program: &str,
        args: &[OsString],
        options: &RunOptions,
    ) -> Result<CommandOutput, CommandError> {
        let _ = options;
        self.run(program, args)
    }
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        self.run_with(program, args, &RunOptions::default())
    }

    fn run_with(
        &self,
        program: &str,
        args: &[OsString],
        options: &RunOptions,
    ) -> Result<CommandOutput, CommandError> {
        debug!(command = %render_command(program, args), "running helper");

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(options.env.iter().map(|(key, value)| (key, value)))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if options.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = command.spawn().map_err(|err| CommandError::Spawn {
            program: program.to_owned(),
            message: err.to_string(),
        })?;

        if let Some(payload) = options.stdin.as_deref()
            && let Some(mut stdin) = child.stdin.take()
        {
            stdin
                .write_all(payload.as_bytes())
                .map_err(|err| CommandError::Input {
                    program: program.to_owned(),
                    message: err.to_string(),
                })?;
        }

        let output = child.wait_with_output().map_err(|err| CommandError::Spawn {
            program: program.to_owned(),
            message: err.to_string(),
        })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Renders a shell-like command line for log output.
#[must_use]
pub fn render_command(program: &str, args: &[OsString]) -> String {
    let mut rendered = escape(program.into()).into_owned();
    for arg in args {
        rendered.push(' ');
        let text = arg.to_string_lossy();
        rendered.push_str(escape(text).as_ref());
    }
    rendered
}
