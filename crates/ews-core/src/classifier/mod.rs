//! FailureClassifier: pure decision logic over already-collected results.
//!
//! Each suite family has an ordered rule table. Rules are tried in priority
//! order and the first one that returns a ruling wins. Every table ends in a
//! catch-all rule, so classification is total.

pub mod compile;
pub mod layout;
pub mod red_tree;
pub mod two_attempt;

use std::collections::BTreeSet;

use tracing::debug;

use crate::config::EwsConfig;
use crate::domain::results::TestId;
use crate::domain::verdict::{Classification, Decision, OperatorNote};
use crate::domain::{Analysis, BuildContext, Suite};
use crate::retry::RetryPolicy;

pub(crate) const UNABLE_TO_CONFIRM: &str =
    "Unable to confirm if test failures are introduced by change, retrying build";
pub(crate) const UNEXPECTED_INFRA: &str = "Unexpected infrastructure issue, retrying build";

/// Set algebra shared by every with-change comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureSets {
    /// Failed in every with-change run.
    pub consistent: BTreeSet<TestId>,
    /// Failed in some but not all with-change runs.
    pub flaky: BTreeSet<TestId>,
}

impl FailureSets {
    /// With a single run every failure counts as consistent.
    pub fn compute(first: &BTreeSet<TestId>, second: Option<&BTreeSet<TestId>>) -> Self {
        match second {
            Some(second) => Self {
                consistent: first.intersection(second).cloned().collect(),
                flaky: first.symmetric_difference(second).cloned().collect(),
            },
            None => Self {
                consistent: first.clone(),
                flaky: BTreeSet::new(),
            },
        }
    }

    /// Add runner-reported flaky tests, never reclassifying a consistent failure.
    pub fn with_reported_flaky<'a, I>(mut self, reported: I) -> Self
    where
        I: IntoIterator<Item = &'a TestId>,
    {
        for test in reported {
            if !self.consistent.contains(test) {
                self.flaky.insert(test.clone());
            }
        }
        self
    }

    /// Consistent failures not explained by the clean tree.
    pub fn new_failures(&self, clean: &BTreeSet<TestId>) -> BTreeSet<TestId> {
        self.consistent.difference(clean).cloned().collect()
    }
}

/// Decision plus notes returned by a single rule.
pub(crate) struct Ruling {
    decision: Decision,
    notes: Vec<OperatorNote>,
}

impl Ruling {
    pub(crate) fn new(decision: impl Into<Decision>) -> Self {
        Self {
            decision: decision.into(),
            notes: Vec::new(),
        }
    }

    pub(crate) fn defer(reason: impl Into<String>) -> Self {
        Self::new(Decision::defer(reason))
    }

    pub(crate) fn note(mut self, note: OperatorNote) -> Self {
        self.notes.push(note);
        self
    }

    /// Like [`Ruling::note`], but a test list with no tests is dropped.
    pub(crate) fn tests_note(self, note: OperatorNote) -> Self {
        if note.is_empty() {
            self
        } else {
            self.note(note)
        }
    }
}

pub(crate) struct Rule<I> {
    pub name: &'static str,
    pub apply: fn(&I) -> Option<Ruling>,
}

/// First matching rule wins.
pub(crate) fn evaluate<I>(rules: &[Rule<I>], inputs: &I) -> Classification {
    for rule in rules {
        if let Some(ruling) = (rule.apply)(inputs) {
            debug!(rule = rule.name, "classification rule matched");
            return Classification {
                decision: ruling.decision,
                notes: ruling.notes,
                rule: rule.name,
            };
        }
    }
    Classification::new("no-rule-matched", Decision::defer(UNABLE_TO_CONFIRM))
}

/// Dispatches an analysis step to the right rule table.
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    failure_limit_gap: i64,
    retry: RetryPolicy,
}

impl FailureClassifier {
    pub fn new(config: &EwsConfig) -> Self {
        Self {
            failure_limit_gap: config.failure_limit_gap,
            retry: RetryPolicy::from_config(config),
        }
    }

    pub fn classify(&self, analysis: Analysis, ctx: &BuildContext) -> Classification {
        match (analysis, ctx.suite) {
            (Analysis::Compile, _) | (_, Suite::Compile) => compile::classify(ctx),
            (Analysis::Tests, Suite::ApiTests | Suite::Jsc) => two_attempt::classify(ctx),
            (Analysis::Tests, Suite::LayoutTests) => {
                layout::classify(ctx, self.failure_limit_gap)
            }
            (Analysis::Tests, Suite::LayoutTestsRedTree) => {
                red_tree::classify(ctx, !self.retry.should_retry(ctx.retry_count))
            }
        }
    }
}
