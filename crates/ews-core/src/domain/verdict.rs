//! Classifier output: terminal verdicts, deferrals and operator notes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::results::TestId;

/// Terminal classification of a build. Produced once per build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    PassWithPreexisting {
        failing: BTreeSet<TestId>,
        flaky: BTreeSet<TestId>,
    },
    FailNew {
        failing: BTreeSet<TestId>,
        exceeded_limit: bool,
    },
    RetryBuild {
        reason: String,
    },
    InfrastructureWarning {
        reason: String,
    },
}

impl Verdict {
    pub fn kind(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::PassWithPreexisting { .. } => "PASS_WITH_PREEXISTING",
            Verdict::FailNew { .. } => "FAIL_NEW",
            Verdict::RetryBuild { .. } => "RETRY_BUILD",
            Verdict::InfrastructureWarning { .. } => "INFRASTRUCTURE_WARNING",
        }
    }

    pub fn fail_new<I>(failing: I, exceeded_limit: bool) -> Self
    where
        I: IntoIterator<Item = TestId>,
    {
        Verdict::FailNew {
            failing: failing.into_iter().collect(),
            exceeded_limit,
        }
    }

    pub fn pass_with_preexisting<F, K>(failing: F, flaky: K) -> Self
    where
        F: IntoIterator<Item = TestId>,
        K: IntoIterator<Item = TestId>,
    {
        Verdict::PassWithPreexisting {
            failing: failing.into_iter().collect(),
            flaky: flaky.into_iter().collect(),
        }
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, Verdict::RetryBuild { .. })
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// What a classifier decided. `Defer` means the evidence is ambiguous and
/// must go through the retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Verdict(Verdict),
    Defer { reason: String },
}

impl Decision {
    pub fn defer(reason: impl Into<String>) -> Self {
        Decision::Defer {
            reason: reason.into(),
        }
    }

    pub fn is_defer(&self) -> bool {
        matches!(self, Decision::Defer { .. })
    }
}

impl From<Verdict> for Decision {
    fn from(verdict: Verdict) -> Self {
        Decision::Verdict(verdict)
    }
}

/// Operator-facing facts a classifier wants surfaced regardless of the
/// verdict it reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "note", rename_all = "snake_case")]
pub enum OperatorNote {
    /// Flaky tests with the steps each one flaked on (may be empty).
    FlakyTests { tests: BTreeMap<TestId, Vec<String>> },
    PreexistingFailures { tests: BTreeSet<TestId> },
    InfrastructureIssue { reason: String },
    BuildFailureOnTrunk { error_lines: Vec<String> },
}

impl OperatorNote {
    /// A test-list note with no tests in it.
    pub fn is_empty(&self) -> bool {
        match self {
            OperatorNote::FlakyTests { tests } => tests.is_empty(),
            OperatorNote::PreexistingFailures { tests } => tests.is_empty(),
            _ => false,
        }
    }

    pub fn flaky<I>(tests: I) -> Self
    where
        I: IntoIterator<Item = TestId>,
    {
        OperatorNote::FlakyTests {
            tests: tests.into_iter().map(|t| (t, Vec::new())).collect(),
        }
    }
}

/// A decision plus the name of the rule that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub decision: Decision,
    pub notes: Vec<OperatorNote>,
    pub rule: &'static str,
}

impl Classification {
    pub fn new(rule: &'static str, decision: impl Into<Decision>) -> Self {
        Self {
            decision: decision.into(),
            notes: Vec::new(),
            rule,
        }
    }

    pub fn with_note(mut self, note: OperatorNote) -> Self {
        self.notes.push(note);
        self
    }
}
