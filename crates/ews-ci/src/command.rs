//! Command lines for planned steps.
//!
//! Steps that are handled by the build master (uploads, result extraction,
//! S3 transfer, triggers) and the in-process steps (validation, analysis)
//! have no command.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use ews_core::config::LayoutConfig;
use ews_core::{BuildContext, ResultsFormat, RunAttempt, Step, Suite, TestId};

/// Budget for steps that don't set their own.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 3 * 60 * 60;
const KILL_OLD_PROCESSES_TIMEOUT_SECS: u64 = 120;

pub const LAYOUT_RESULTS_DIR: &str = "layout-test-results";
pub const API_RESULTS_FILE: &str = "api_test_results.json";
pub const JSC_RESULTS_FILE: &str = "jsc_results.json";

/// A process to run for a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepCommand {
    pub argv: Vec<String>,
    pub timeout: Duration,
    /// Structured results written by the runner, relative to the workdir.
    pub results_file: Option<PathBuf>,
    pub results_format: Option<ResultsFormat>,
}

impl StepCommand {
    pub(crate) fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            timeout: Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS),
            results_file: None,
            results_format: None,
        }
    }

    fn arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    pub(crate) fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    fn results(mut self, file: impl Into<PathBuf>, format: ResultsFormat) -> Self {
        self.results_file = Some(file.into());
        self.results_format = Some(format);
        self
    }

    /// Shell-style rendering for logs.
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// Builds WebKit tool invocations for planned steps.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    layout: LayoutConfig,
    configuration: String,
    base_revision: String,
}

impl CommandBuilder {
    pub fn new(layout: LayoutConfig) -> Self {
        Self {
            layout,
            configuration: "release".to_string(),
            base_revision: "origin/main".to_string(),
        }
    }

    /// `release` or `debug`.
    pub fn with_configuration(mut self, configuration: impl Into<String>) -> Self {
        self.configuration = configuration.into();
        self
    }

    /// Revision a pull request checkout is reset to for clean-tree runs.
    pub fn with_base_revision(mut self, revision: impl Into<String>) -> Self {
        self.base_revision = revision.into();
        self
    }

    pub fn command(&self, step: &Step, ctx: &BuildContext) -> Option<StepCommand> {
        let command = match step {
            Step::UnApplyPatch => StepCommand::new(["python3", "Tools/Scripts/clean-webkit"]),
            Step::RevertPullRequestChanges => {
                StepCommand::new(["git", "reset", "--hard", self.base_revision.as_str()])
            }
            Step::InstallDependencies { platform } => StepCommand::new([
                "perl".to_string(),
                format!("Tools/Scripts/update-webkit{platform}-libs"),
            ])
            .arg(self.configuration_flag()),
            Step::Compile { .. } => StepCommand::new(["perl", "Tools/Scripts/build-webkit"])
                .arg(self.configuration_flag())
                .args(platform_flag(ctx)),
            Step::KillOldProcesses => {
                StepCommand::new(["python3", "Tools/CISupport/kill-old-processes", "buildbot"])
                    .timeout_secs(KILL_OLD_PROCESSES_TIMEOUT_SECS)
            }
            Step::RunTests { attempt } => self.run_tests(*attempt, ctx)?,
            Step::ArchiveTestResults => self.archive("Tools/CISupport/test-result-archive", ctx),
            Step::ArchiveBuiltProduct => {
                self.archive("Tools/CISupport/built-product-archive", ctx)
            }
            Step::ValidateChange
            | Step::Analyze { .. }
            | Step::UploadTestResults { .. }
            | Step::ExtractTestResults { .. }
            | Step::UploadBuiltProduct
            | Step::TransferToS3
            | Step::Trigger { .. } => return None,
        };
        Some(command)
    }

    fn configuration_flag(&self) -> String {
        format!("--{}", self.configuration)
    }

    fn archive(&self, script: &str, ctx: &BuildContext) -> StepCommand {
        StepCommand::new(["python3", script])
            .arg(format!(
                "--platform={}",
                ctx.platform.as_deref().unwrap_or("mac")
            ))
            .arg(self.configuration_flag())
            .arg("archive")
    }

    fn run_tests(&self, attempt: RunAttempt, ctx: &BuildContext) -> Option<StepCommand> {
        let command = match ctx.suite {
            Suite::Compile => return None,
            Suite::LayoutTests | Suite::LayoutTestsRedTree => self.layout_tests(attempt, ctx),
            Suite::ApiTests => StepCommand::new([
                "python3",
                "Tools/Scripts/run-api-tests",
                "--no-build",
            ])
            .arg(self.configuration_flag())
            .args(["--verbose".to_string(), format!("--json-output={API_RESULTS_FILE}")])
            .results(API_RESULTS_FILE, ResultsFormat::ApiTests),
            Suite::Jsc => StepCommand::new([
                "perl",
                "Tools/Scripts/run-javascriptcore-tests",
                "--no-build",
                "--no-fail-fast",
            ])
            .arg(format!("--json-output={JSC_RESULTS_FILE}"))
            .arg(self.configuration_flag())
            .arg("--treat-failing-as-flaky=0.6,10,200")
            .results(JSC_RESULTS_FILE, ResultsFormat::Jsc),
        };
        Some(command)
    }

    fn layout_tests(&self, attempt: RunAttempt, ctx: &BuildContext) -> StepCommand {
        let command = StepCommand::new([
            "python3",
            "Tools/Scripts/run-webkit-tests",
            "--no-build",
            "--no-show-results",
            "--no-new-test-results",
            "--clobber-old-results",
        ])
        .arg(self.configuration_flag())
        .args(["--results-directory", LAYOUT_RESULTS_DIR, "--debug-rwt-logging"])
        .results(
            PathBuf::from(LAYOUT_RESULTS_DIR).join("full_results.json"),
            ResultsFormat::Layout,
        );

        let failing = |attempt: RunAttempt| -> Vec<TestId> {
            ctx.attempt(attempt)
                .map(|outcome| outcome.failing_tests().iter().cloned().collect())
                .unwrap_or_default()
        };
        let repeat = |command: StepCommand| {
            command.args([
                "--fully-parallel".to_string(),
                format!("--repeat-each={}", self.layout.repeat_each),
            ])
        };

        match attempt {
            RunAttempt::RepeatedFailuresWithChange => repeat(command)
                .args(failing(RunAttempt::FirstWithChange))
                .timeout_secs(self.layout.repeat_failures_timeout_secs),
            RunAttempt::RepeatedFailuresWithoutChange => {
                // A timed-out repeat run has no usable failing list; fall back
                // to what the first run saw.
                let timed_out = ctx
                    .attempt(RunAttempt::RepeatedFailuresWithChange)
                    .is_some_and(|outcome| outcome.timed_out);
                let tests = if timed_out {
                    failing(RunAttempt::FirstWithChange)
                } else {
                    failing(RunAttempt::RepeatedFailuresWithChange)
                };
                repeat(command)
                    .arg("--skipped=always")
                    .args(tests)
                    .timeout_secs(self.layout.repeat_failures_without_change_timeout_secs)
            }
            _ => {
                let limit = if ctx.suite == Suite::LayoutTestsRedTree {
                    self.layout.red_tree_exit_after_failures
                } else {
                    self.layout.exit_after_failures
                };
                let command = command
                    .args(["--exit-after-n-failures".to_string(), limit.to_string()])
                    .arg("--skip-failing-tests");
                if attempt == RunAttempt::WithoutChange && ctx.suite == Suite::LayoutTests {
                    match rerun_targets(ctx) {
                        Some(tests) => command.arg("--skipped=always").args(tests),
                        None => command,
                    }
                } else {
                    command
                }
            }
        }
    }
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new(LayoutConfig::default())
    }
}

/// Tests the clean-tree layout run is narrowed to: everything that failed
/// with the change, unless a with-change run was cut short.
fn rerun_targets(ctx: &BuildContext) -> Option<BTreeSet<TestId>> {
    let runs: Vec<_> = [RunAttempt::FirstWithChange, RunAttempt::SecondWithChange]
        .into_iter()
        .filter_map(|attempt| ctx.attempt(attempt))
        .collect();
    if runs.is_empty() || runs.iter().any(|run| run.exceeded_failure_limit()) {
        return None;
    }
    let tests: BTreeSet<TestId> = runs
        .iter()
        .flat_map(|run| run.failing_tests().iter().cloned())
        .collect();
    (!tests.is_empty()).then_some(tests)
}

fn platform_flag(ctx: &BuildContext) -> Option<String> {
    match ctx.platform.as_deref() {
        Some(platform @ ("gtk" | "wpe")) => Some(format!("--{platform}")),
        _ => None,
    }
}
