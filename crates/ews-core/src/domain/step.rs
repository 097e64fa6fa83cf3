//! Build steps the planner can schedule, and what running one produces.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::attempt::{AttemptOutcome, CompileOutcome, RunAttempt};
use super::status::BuildStatus;
use super::verdict::Verdict;

/// Which analysis an [`Step::Analyze`] step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Analysis {
    Compile,
    Tests,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "kebab-case")]
pub enum Step {
    /// Re-check that the change is still open and current.
    ValidateChange,
    UnApplyPatch,
    RevertPullRequestChanges,
    InstallDependencies {
        platform: String,
    },
    Compile {
        with_change: bool,
        /// A failure of this compile is an infrastructure problem, not a verdict.
        retry_build_on_failure: bool,
    },
    KillOldProcesses,
    RunTests {
        attempt: RunAttempt,
    },
    Analyze {
        analysis: Analysis,
    },
    ArchiveTestResults,
    UploadTestResults {
        identifier: Option<String>,
    },
    ExtractTestResults {
        identifier: Option<String>,
    },
    ArchiveBuiltProduct,
    UploadBuiltProduct,
    TransferToS3,
    Trigger {
        schedulers: Vec<String>,
        retry_count: u32,
    },
}

impl Step {
    pub fn compile_with_change() -> Self {
        Step::Compile {
            with_change: true,
            retry_build_on_failure: false,
        }
    }

    pub fn compile_without_change(retry_build_on_failure: bool) -> Self {
        Step::Compile {
            with_change: false,
            retry_build_on_failure,
        }
    }

    pub fn run(attempt: RunAttempt) -> Self {
        Step::RunTests { attempt }
    }

    pub fn analyze(analysis: Analysis) -> Self {
        Step::Analyze { analysis }
    }

    pub fn upload_results(identifier: Option<&str>) -> Self {
        Step::UploadTestResults {
            identifier: identifier.map(str::to_string),
        }
    }

    pub fn extract_results(identifier: Option<&str>) -> Self {
        Step::ExtractTestResults {
            identifier: identifier.map(str::to_string),
        }
    }

    /// Buildbot-style step name.
    pub fn name(&self) -> String {
        match self {
            Step::ValidateChange => "validate-change".into(),
            Step::UnApplyPatch => "unapply-patch".into(),
            Step::RevertPullRequestChanges => "revert-pull-request-changes".into(),
            Step::InstallDependencies { platform } => format!("{platform}-deps"),
            Step::Compile {
                with_change: true, ..
            } => "compile-webkit".into(),
            Step::Compile {
                with_change: false, ..
            } => "compile-webkit-without-change".into(),
            Step::KillOldProcesses => "kill-old-processes".into(),
            Step::RunTests { attempt } => attempt.as_str().into(),
            Step::Analyze {
                analysis: Analysis::Compile,
            } => "analyze-compile-webkit-results".into(),
            Step::Analyze {
                analysis: Analysis::Tests,
            } => "analyze-test-results".into(),
            Step::ArchiveTestResults => "archive-test-results".into(),
            Step::UploadTestResults { identifier } => suffixed("upload", identifier),
            Step::ExtractTestResults { identifier } => suffixed("extract-test-results", identifier),
            Step::ArchiveBuiltProduct => "archive-built-product".into(),
            Step::UploadBuiltProduct => "upload-built-product".into(),
            Step::TransferToS3 => "transfer-to-s3".into(),
            Step::Trigger { .. } => "trigger".into(),
        }
    }
}

fn suffixed(base: &str, identifier: &Option<String>) -> String {
    match identifier {
        Some(id) => format!("{base}-{id}"),
        None => base.to_string(),
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// What executing a step produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Tests(AttemptOutcome),
    Compile(CompileOutcome),
    Done { status: BuildStatus },
}

impl StepOutcome {
    pub fn done(status: BuildStatus) -> Self {
        StepOutcome::Done { status }
    }

    pub fn status(&self) -> BuildStatus {
        match self {
            StepOutcome::Tests(outcome) => outcome.status,
            StepOutcome::Compile(outcome) => outcome.status,
            StepOutcome::Done { status } => *status,
        }
    }
}

/// One planner action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NextStep {
    Run { step: Step },
    /// End the build with this verdict; pending steps are dropped.
    Finish { verdict: Verdict },
    /// Hand the ambiguity to the retry policy.
    Defer { reason: String },
}

impl From<Step> for NextStep {
    fn from(step: Step) -> Self {
        NextStep::Run { step }
    }
}
