// SPDX-License-Identifier: GPL-3.0-only

//! External command execution with bounded exponential backoff
//!
//! [`CommandExecutor`] is the only place that decides how often a failing
//! command is retried and how long to wait in between. Callers pick a
//! [`Budget`] per operation; the [`Backoff`] time unit is fixed when the
//! executor is built (one second on a real host, zero in tests).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{Instrument, Span, error, info};

use crate::error::{Result, SysError};

/// A program and its ordered arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            write!(f, "{}", self.program)
        } else {
            write!(f, "{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured outcome of a single process run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Spawns one process per call and waits for it.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &Cmd) -> std::io::Result<CommandOutput>;
}

/// Runs commands on the local host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &Cmd) -> std::io::Result<CommandOutput> {
        let output = tokio::process::Command::new(command.program())
            .args(command.arguments())
            .output()
            .await?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Delay schedule between attempts: `unit * 2^attempt`, attempts from zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    unit: Duration,
}

impl Backoff {
    pub const fn new(unit: Duration) -> Self {
        Self { unit }
    }

    /// One second per unit, used against a real host.
    pub const fn seconds() -> Self {
        Self::new(Duration::from_secs(1))
    }

    /// No waiting at all.
    pub const fn immediate() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.unit.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::seconds()
    }
}

/// Maximum number of attempts for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget(u32);

impl Budget {
    /// Probes whose failure carries meaning and must not be retried.
    pub const ONCE: Budget = Budget(1);
    /// Queries and ordinary LVM mutations.
    pub const DEFAULT: Budget = Budget(3);
    /// Unmount, where "target is busy" usually clears within seconds.
    pub const UNMOUNT: Budget = Budget(5);

    pub const fn attempts(attempts: u32) -> Self {
        if attempts == 0 { Budget(1) } else { Budget(attempts) }
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

pub struct CommandExecutor {
    runner: Arc<dyn CommandRunner>,
    backoff: Backoff,
    span: Span,
}

impl CommandExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>, backoff: Backoff, span: Span) -> Self {
        Self {
            runner,
            backoff,
            span,
        }
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Run `command` until it exits successfully or `budget` is spent.
    ///
    /// Returns captured stdout on success. A spawn failure counts as a failed
    /// attempt. After the last attempt fails the error carries the command
    /// line, its exit code and the last captured stderr.
    pub async fn run(&self, command: &Cmd, budget: Budget) -> Result<String> {
        let span = tracing::info_span!(parent: &self.span, "command", command = %command);
        self.run_attempts(command, budget).instrument(span).await
    }

    async fn run_attempts(&self, command: &Cmd, budget: Budget) -> Result<String> {
        let rendered = command.to_string();
        let mut last_code = None;
        let mut last_stderr = String::new();

        for attempt in 0..budget.get() {
            info!("Command [{rendered}] attempt {attempt}");
            match self.runner.run(command).await {
                Ok(output) if output.success() => {
                    info!("Command [{rendered}] success");
                    return Ok(output.stdout);
                }
                Ok(output) => {
                    error!(
                        "Command [{rendered}] attempt {attempt} failed with {}, out: {}",
                        output.stderr.trim(),
                        output.stdout.trim()
                    );
                    last_code = output.code;
                    last_stderr = output.stderr;
                }
                Err(e) => {
                    error!("Command [{rendered}] attempt {attempt} could not start: {e}");
                    last_code = None;
                    last_stderr = e.to_string();
                }
            }

            if attempt + 1 < budget.get() {
                let delay = self.backoff.delay(attempt);
                info!("Retrying [{rendered}] in {delay:?}");
                tokio::time::sleep(delay).await;
            }
        }

        Err(SysError::CommandFailed {
            command: rendered,
            code: last_code,
            stderr: last_stderr.trim().to_string(),
        })
    }

    /// Run `command` exactly once and hand back whatever happened.
    ///
    /// A non-zero exit is not an error here; only failing to start is.
    pub async fn probe(&self, command: &Cmd) -> Result<CommandOutput> {
        let output = self
            .runner
            .run(command)
            .instrument(tracing::debug_span!(parent: &self.span, "probe", command = %command))
            .await
            .map_err(|e| SysError::io(command.program(), e))?;
        Ok(output)
    }
}
