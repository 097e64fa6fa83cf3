//! Test-run attempts and what each one produced.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::results::{ResultSet, TestId};
use super::status::BuildStatus;

/// The independent runs a build may perform. Later attempts are
/// parameterized by the results of earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunAttempt {
    FirstWithChange,
    SecondWithChange,
    WithoutChange,
    RepeatedFailuresWithChange,
    RepeatedFailuresWithoutChange,
}

impl RunAttempt {
    pub fn with_change(self) -> bool {
        !matches!(
            self,
            RunAttempt::WithoutChange | RunAttempt::RepeatedFailuresWithoutChange
        )
    }

    pub fn is_repeat(self) -> bool {
        matches!(
            self,
            RunAttempt::RepeatedFailuresWithChange | RunAttempt::RepeatedFailuresWithoutChange
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunAttempt::FirstWithChange => "first-with-change",
            RunAttempt::SecondWithChange => "second-with-change",
            RunAttempt::WithoutChange => "without-change",
            RunAttempt::RepeatedFailuresWithChange => "repeated-failures-with-change",
            RunAttempt::RepeatedFailuresWithoutChange => "repeated-failures-without-change",
        }
    }

    /// Layout-test step name, as shown in flaky-test reports.
    pub fn layout_step_name(self) -> &'static str {
        match self {
            RunAttempt::FirstWithChange => "layout-tests",
            RunAttempt::SecondWithChange => "re-run-layout-tests",
            RunAttempt::WithoutChange => "run-layout-tests-without-change",
            RunAttempt::RepeatedFailuresWithChange => "layout-tests-repeat-failures",
            RunAttempt::RepeatedFailuresWithoutChange => {
                "layout-tests-repeat-failures-without-change"
            }
        }
    }
}

impl fmt::Display for RunAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static NO_TESTS: BTreeSet<TestId> = BTreeSet::new();

/// Status plus (optionally) parsed results of one attempt.
///
/// `results` is `None` when the run produced no parseable output.
/// `timed_out` means the wall-clock budget was hit, so whatever failing
/// list exists is incomplete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptOutcome {
    pub attempt: RunAttempt,
    pub status: BuildStatus,
    pub results: Option<ResultSet>,
    #[serde(default)]
    pub timed_out: bool,
}

impl AttemptOutcome {
    pub fn new(attempt: RunAttempt, status: BuildStatus, results: Option<ResultSet>) -> Self {
        Self {
            attempt,
            status,
            results,
            timed_out: false,
        }
    }

    pub fn timed_out(mut self, timed_out: bool) -> Self {
        self.timed_out = timed_out;
        self
    }

    pub fn failing_tests(&self) -> &BTreeSet<TestId> {
        self.results
            .as_ref()
            .map(ResultSet::failing_tests)
            .unwrap_or(&NO_TESTS)
    }

    pub fn flaky_tests(&self) -> &BTreeSet<TestId> {
        self.results
            .as_ref()
            .map(ResultSet::flaky_tests)
            .unwrap_or(&NO_TESTS)
    }

    pub fn exceeded_failure_limit(&self) -> bool {
        self.results
            .as_ref()
            .is_some_and(ResultSet::exceeded_failure_limit)
    }

    /// Neither failing nor flaky tests were reported.
    pub fn has_no_results(&self) -> bool {
        self.failing_tests().is_empty() && self.flaky_tests().is_empty()
    }
}

/// Result of a compile step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOutcome {
    pub status: BuildStatus,
    /// Error lines pulled from the build log, for build-failure mail.
    #[serde(default)]
    pub error_lines: Vec<String>,
}

impl CompileOutcome {
    pub fn new(status: BuildStatus) -> Self {
        Self {
            status,
            error_lines: Vec::new(),
        }
    }
}

/// Whether the process headers contain the framework's kill notice, i.e.
/// `command timed out: <N> seconds elapsed running ... attempting to kill`.
pub fn did_command_time_out(headers: &str) -> bool {
    headers.lines().map(str::trim).any(|line| {
        line.strip_prefix("command timed out: ")
            .and_then(|rest| rest.split_once(" seconds elapsed running"))
            .is_some_and(|(secs, _)| !secs.is_empty() && secs.bytes().all(|b| b.is_ascii_digit()))
            && line.ends_with("attempting to kill")
    })
}
