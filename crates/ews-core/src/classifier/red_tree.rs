//! Layout-test analysis tolerant of a non-green baseline.
//!
//! Failures from the full with-change run are repeated several times with
//! and without the change. Only tests that always fail with the change and
//! never fail without it are reported as new.

use std::collections::{BTreeMap, BTreeSet};

use super::{evaluate, Rule, Ruling};
use crate::domain::results::TestId;
use crate::domain::verdict::{Classification, OperatorNote, Verdict};
use crate::domain::{AttemptOutcome, BuildContext, Decision, RunAttempt};

const INFRA_PREFIX: &str = "Unexpected infrastructure issue: ";

pub(crate) struct RedTreeInputs<'a> {
    first: &'a AttemptOutcome,
    repeat_with: Option<&'a AttemptOutcome>,
    repeat_without: Option<&'a AttemptOutcome>,
    clean: Option<&'a AttemptOutcome>,
    retries_exhausted: bool,
}

impl RedTreeInputs<'_> {
    fn repeats(&self) -> impl Iterator<Item = &AttemptOutcome> {
        [self.repeat_with, self.repeat_without].into_iter().flatten()
    }

    fn without_failing_or_flaky(&self) -> BTreeSet<TestId> {
        self.repeat_without
            .map(|run| run.failing_tests().union(run.flaky_tests()).cloned().collect())
            .unwrap_or_default()
    }

    fn first_exceeded(&self) -> bool {
        self.first.exceeded_failure_limit()
    }
}

fn infra(reason: &str) -> Ruling {
    Ruling::defer(format!("{INFRA_PREFIX}{reason}"))
}

/// The full run failed without listing any failing or flaky test.
fn no_results_with_change(inputs: &RedTreeInputs<'_>) -> Option<Ruling> {
    if !inputs.first.has_no_results() {
        return None;
    }
    if !inputs.retries_exhausted {
        return Some(infra(
            "The layout-test run with change generated no list of results and exited with \
             error, retrying with the hope it was a random infrastructure error.",
        ));
    }
    // Last retry: a clean tree that produced results points at the change
    // breaking the test harness itself.
    let clean_worked = inputs
        .clean
        .is_some_and(|clean| clean.status.is_success() || !clean.has_no_results());
    if clean_worked {
        return Some(Ruling::new(Verdict::fail_new(
            BTreeSet::new(),
            inputs.first_exceeded(),
        )));
    }
    Some(infra(
        "The layout-test run with change generated no list of results and exited with error, \
         and the clean_tree without change run did the same thing.",
    ))
}

/// Repeat steps run without a failure limit, so hitting one is abnormal.
fn repeat_exceeded_limit(inputs: &RedTreeInputs<'_>) -> Option<Ruling> {
    inputs
        .repeats()
        .any(AttemptOutcome::exceeded_failure_limit)
        .then(|| {
            infra(
                "One of the steps for retrying the failed tests has exited early, but this steps \
                 should run without \"--exit-after-n-failures\" switch, so they should not exit early.",
            )
        })
}

fn repeat_without_change_timed_out(inputs: &RedTreeInputs<'_>) -> Option<Ruling> {
    inputs
        .repeat_without
        .is_some_and(|run| run.timed_out)
        .then(|| {
            infra(
                "The step \"layout-tests-repeat-failures-without-change\" was interrumped \
                 because it reached the timeout.",
            )
        })
}

/// The change makes the repeat run time out. Repeating would only time out
/// again, so report the first run's failures that the baseline cannot explain.
fn repeat_with_change_timed_out(inputs: &RedTreeInputs<'_>) -> Option<Ruling> {
    if !inputs.repeat_with.is_some_and(|run| run.timed_out) {
        return None;
    }
    let explained = inputs.without_failing_or_flaky();
    let likely_new: BTreeSet<TestId> = inputs
        .first
        .failing_tests()
        .difference(&explained)
        .cloned()
        .collect();
    let reason = format!(
        "The step \"layout-tests-repeat-failures\" reached the timeout but the step \
         \"layout-tests-repeat-failures-without-change\" ended. Not trying to repeat this. \
         Reporting {} failures from the first run.",
        likely_new.len()
    );
    Some(
        Ruling::new(Verdict::fail_new(likely_new, inputs.first_exceeded()))
            .note(OperatorNote::InfrastructureIssue { reason }),
    )
}

/// A repeat step that ran but produced nothing usable.
fn repeat_produced_no_results(inputs: &RedTreeInputs<'_>) -> Option<Ruling> {
    let silent = |run: &&AttemptOutcome| run.has_no_results() && !run.status.is_success();
    if inputs.repeat_with.filter(silent).is_some() {
        return Some(infra(
            "The step \"layout-tests-repeat-failures\" failed to generate any list of \
             failures or flakies and returned an error code.",
        ));
    }
    if inputs.repeat_without.filter(silent).is_some() {
        return Some(infra(
            "The step \"layout-tests-repeat-failures-without-change\" failed to generate any \
             list of failures or flakies and returned an error code.",
        ));
    }
    None
}

fn compare_repeats(inputs: &RedTreeInputs<'_>) -> Option<Ruling> {
    let first_flaky = inputs.first.flaky_tests();
    let with_flaky = inputs
        .repeat_with
        .map(AttemptOutcome::flaky_tests)
        .cloned()
        .unwrap_or_default();
    let without_flaky = inputs
        .repeat_without
        .map(AttemptOutcome::flaky_tests)
        .cloned()
        .unwrap_or_default();

    let mut flaky_steps: BTreeMap<TestId, Vec<String>> = BTreeMap::new();
    for test in first_flaky.iter().chain(&with_flaky).chain(&without_flaky) {
        let mut steps = Vec::new();
        if without_flaky.contains(test) {
            steps.push(RunAttempt::RepeatedFailuresWithoutChange.layout_step_name().to_string());
        }
        if with_flaky.contains(test) {
            steps.push(format!(
                "{} (with change)",
                RunAttempt::RepeatedFailuresWithChange.layout_step_name()
            ));
        }
        if first_flaky.contains(test) {
            steps.push(format!(
                "{} (with change)",
                RunAttempt::FirstWithChange.layout_step_name()
            ));
        }
        flaky_steps.insert(test.clone(), steps);
    }

    let without_failing = inputs
        .repeat_without
        .map(AttemptOutcome::failing_tests)
        .cloned()
        .unwrap_or_default();
    let pre_existing: BTreeSet<TestId> = without_failing
        .iter()
        .filter(|test| !flaky_steps.contains_key(*test))
        .cloned()
        .collect();

    let explained = inputs.without_failing_or_flaky();
    let new: BTreeSet<TestId> = inputs
        .repeat_with
        .map(|run| run.failing_tests().difference(&explained).cloned().collect())
        .unwrap_or_default();

    let verdict = if new.is_empty() {
        Verdict::Pass
    } else {
        Verdict::fail_new(new, inputs.first_exceeded())
    };
    Some(
        Ruling::new(verdict)
            .tests_note(OperatorNote::FlakyTests { tests: flaky_steps })
            .tests_note(OperatorNote::PreexistingFailures {
                tests: pre_existing,
            }),
    )
}

fn rules<'a>() -> [Rule<RedTreeInputs<'a>>; 6] {
    [
        Rule {
            name: "no-results-with-change",
            apply: no_results_with_change,
        },
        Rule {
            name: "repeat-exceeded-limit",
            apply: repeat_exceeded_limit,
        },
        Rule {
            name: "repeat-without-change-timed-out",
            apply: repeat_without_change_timed_out,
        },
        Rule {
            name: "repeat-with-change-timed-out",
            apply: repeat_with_change_timed_out,
        },
        Rule {
            name: "repeat-produced-no-results",
            apply: repeat_produced_no_results,
        },
        Rule {
            name: "compare-repeats",
            apply: compare_repeats,
        },
    ]
}

/// `retries_exhausted` is true once the retry policy would no longer retry
/// this build.
pub fn classify(ctx: &BuildContext, retries_exhausted: bool) -> Classification {
    let Some(first) = ctx.attempt(RunAttempt::FirstWithChange) else {
        return Classification::new(
            "missing-first-run",
            Decision::defer(format!("{INFRA_PREFIX}The layout-test run with change did not run.")),
        );
    };
    let inputs = RedTreeInputs {
        first,
        repeat_with: ctx.attempt(RunAttempt::RepeatedFailuresWithChange),
        repeat_without: ctx.attempt(RunAttempt::RepeatedFailuresWithoutChange),
        clean: ctx.attempt(RunAttempt::WithoutChange),
        retries_exhausted,
    };
    evaluate(&rules(), &inputs)
}
