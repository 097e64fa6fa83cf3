//! Step execution with local processes.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use anyhow::Context;
use async_trait::async_trait;
use ews_core::{
    did_command_time_out, AttemptOutcome, BuildContext, BuildStatus, CompileOutcome, ResultSet,
    ResultsFormat, Step, StepOutcome,
};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::command::{CommandBuilder, StepCommand};
use crate::executor::StepExecutor;

/// Lines kept from a failed compile log.
const MAX_ERROR_LINES: usize = 10;

/// What a finished (or killed) process left behind.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// `None` when the process was killed.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// Killed for running past its budget.
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn status(&self) -> BuildStatus {
        if !self.timed_out && self.exit_code == Some(0) {
            BuildStatus::Success
        } else {
            BuildStatus::Failure
        }
    }

    /// Process killed by us, or by the framework that printed its notice.
    fn hit_time_limit(&self) -> bool {
        self.timed_out || did_command_time_out(&self.stdout) || did_command_time_out(&self.stderr)
    }
}

/// Runs steps as processes inside a WebKit checkout.
pub struct ShellExecutor {
    workdir: PathBuf,
    commands: CommandBuilder,
}

impl ShellExecutor {
    pub fn new(workdir: impl Into<PathBuf>, commands: CommandBuilder) -> Self {
        Self {
            workdir: workdir.into(),
            commands,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Run a command in the workdir under its wall-clock budget. The child
    /// is killed when the budget runs out.
    pub async fn run_command(&self, command: &StepCommand) -> anyhow::Result<ProcessOutput> {
        let start = Instant::now();
        let (exe, args) = command
            .argv
            .split_first()
            .context("step has an empty command line")?;

        let child = Command::new(exe)
            .args(args)
            .current_dir(&self.workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", command.display()))?;

        let output = match tokio::time::timeout(command.timeout, child.wait_with_output()).await {
            Ok(output) => output.with_context(|| format!("failed to wait for `{exe}`"))?,
            Err(_) => {
                warn!(
                    command = %command.display(),
                    timeout_secs = command.timeout.as_secs(),
                    "step exceeded its time budget, process killed"
                );
                return Ok(ProcessOutput {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration_ms: start.elapsed().as_millis() as u64,
                    timed_out: true,
                });
            }
        };

        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
            timed_out: false,
        })
    }

    /// Remove results left by an earlier attempt so a crashed runner is
    /// never credited with them.
    async fn clear_results(&self, file: &Path) {
        if let Err(err) = tokio::fs::remove_file(self.workdir.join(file)).await {
            if err.kind() != ErrorKind::NotFound {
                warn!(file = %file.display(), error = %err, "unable to remove stale results");
            }
        }
    }

    async fn read_results(&self, file: &Path, format: ResultsFormat) -> Option<ResultSet> {
        match tokio::fs::read_to_string(self.workdir.join(file)).await {
            Ok(raw) => ResultSet::parse_lenient(format, &raw),
            Err(err) => {
                warn!(file = %file.display(), error = %err, "no results file produced");
                None
            }
        }
    }
}

#[async_trait]
impl StepExecutor for ShellExecutor {
    async fn execute(&self, step: &Step, ctx: &BuildContext) -> anyhow::Result<StepOutcome> {
        let Some(command) = self.commands.command(step, ctx) else {
            debug!(step = %step, "nothing to run locally");
            return Ok(StepOutcome::done(BuildStatus::Success));
        };

        if let Some(file) = &command.results_file {
            self.clear_results(file).await;
        }

        info!(
            stage = %step,
            command = %command.display(),
            timeout_secs = command.timeout.as_secs(),
            "Executing step"
        );
        let output = self.run_command(&command).await?;
        let status = output.status();
        info!(
            stage = %step,
            exit_code = ?output.exit_code,
            duration_ms = output.duration_ms,
            status = %status,
            "Step finished"
        );

        let outcome = match step {
            Step::RunTests { attempt } => {
                let results = match (&command.results_file, command.results_format) {
                    (Some(file), Some(format)) => self.read_results(file, format).await,
                    _ => None,
                };
                StepOutcome::Tests(
                    AttemptOutcome::new(*attempt, status, results)
                        .timed_out(output.hit_time_limit()),
                )
            }
            Step::Compile { .. } => StepOutcome::Compile(CompileOutcome {
                status,
                error_lines: if status.is_success() {
                    Vec::new()
                } else {
                    error_lines(&output)
                },
            }),
            _ => StepOutcome::done(status),
        };
        Ok(outcome)
    }
}

/// The last compiler errors in a build log.
fn error_lines(output: &ProcessOutput) -> Vec<String> {
    let mut lines: Vec<String> = output
        .stdout
        .lines()
        .chain(output.stderr.lines())
        .filter(|line| line.contains("rror:"))
        .map(str::to_string)
        .collect();
    if lines.len() > MAX_ERROR_LINES {
        lines.drain(..lines.len() - MAX_ERROR_LINES);
    }
    lines
}
