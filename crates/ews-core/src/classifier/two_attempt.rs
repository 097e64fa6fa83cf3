//! API-test and JSC analysis: with-change runs against a clean-tree run.
//!
//! API tests run twice with the change; JSC runs once. A single run means
//! every failure counts as consistent.

use super::{evaluate, FailureSets, Rule, Ruling, UNABLE_TO_CONFIRM, UNEXPECTED_INFRA};
use crate::domain::verdict::{Classification, OperatorNote, Verdict};
use crate::domain::{AttemptOutcome, BuildContext, RunAttempt, Suite};

pub(crate) struct TwoAttemptInputs<'a> {
    suite: Suite,
    first: Option<&'a AttemptOutcome>,
    second: Option<&'a AttemptOutcome>,
    clean: Option<&'a AttemptOutcome>,
}

impl TwoAttemptInputs<'_> {
    fn sets(&self) -> FailureSets {
        let first = self.first.map(AttemptOutcome::failing_tests);
        let second = self.second.map(AttemptOutcome::failing_tests);
        let empty = Default::default();
        let sets = FailureSets::compute(first.unwrap_or(&empty), second);
        let reported = [self.first, self.second, self.clean]
            .into_iter()
            .flatten()
            .flat_map(|attempt| attempt.flaky_tests().iter());
        sets.with_reported_flaky(reported)
    }

    fn unparsed_message(&self) -> String {
        match self.suite {
            Suite::Jsc => "Unable to parse JSC test results".to_string(),
            _ => "Unable to parse API test results".to_string(),
        }
    }
}

fn first_run_unparsed(inputs: &TwoAttemptInputs<'_>) -> Option<Ruling> {
    let parsed = inputs.first.is_some_and(|first| first.results.is_some());
    (!parsed).then(|| Ruling::defer(inputs.unparsed_message()))
}

fn second_run_unparsed(inputs: &TwoAttemptInputs<'_>) -> Option<Ruling> {
    if !inputs.suite.reruns_with_change() {
        return None;
    }
    let parsed = inputs.second.is_some_and(|second| second.results.is_some());
    (!parsed).then(|| Ruling::defer(inputs.unparsed_message()))
}

/// The with-change runs failed without naming a single failing test.
fn no_failures_with_change(inputs: &TwoAttemptInputs<'_>) -> Option<Ruling> {
    let quiet = [inputs.first, inputs.second]
        .into_iter()
        .flatten()
        .all(|attempt| attempt.failing_tests().is_empty());
    if !quiet {
        return None;
    }
    let clean_passed = inputs.clean.is_some_and(|clean| clean.status.is_success());
    Some(Ruling::defer(if clean_passed {
        UNEXPECTED_INFRA
    } else {
        UNABLE_TO_CONFIRM
    }))
}

/// Without a usable baseline nothing can be attributed to the change.
fn clean_tree_unavailable(inputs: &TwoAttemptInputs<'_>) -> Option<Ruling> {
    let usable = inputs
        .clean
        .is_some_and(|clean| clean.results.is_some() || clean.status.is_success());
    (!usable).then(|| Ruling::defer(UNABLE_TO_CONFIRM))
}

fn new_failures(inputs: &TwoAttemptInputs<'_>) -> Option<Ruling> {
    let clean = inputs.clean?;
    let new = inputs.sets().new_failures(clean.failing_tests());
    (!new.is_empty()).then(|| Ruling::new(Verdict::fail_new(new, false)))
}

fn pre_existing(inputs: &TwoAttemptInputs<'_>) -> Option<Ruling> {
    let clean = inputs.clean.map(AttemptOutcome::failing_tests).cloned().unwrap_or_default();
    let flaky = inputs.sets().flaky;
    Some(
        Ruling::new(Verdict::pass_with_preexisting(clean.clone(), flaky.clone()))
            .tests_note(OperatorNote::PreexistingFailures { tests: clean })
            .tests_note(OperatorNote::flaky(flaky)),
    )
}

fn rules<'a>() -> [Rule<TwoAttemptInputs<'a>>; 6] {
    [
        Rule {
            name: "first-run-unparsed",
            apply: first_run_unparsed,
        },
        Rule {
            name: "second-run-unparsed",
            apply: second_run_unparsed,
        },
        Rule {
            name: "no-failures-with-change",
            apply: no_failures_with_change,
        },
        Rule {
            name: "clean-tree-unavailable",
            apply: clean_tree_unavailable,
        },
        Rule {
            name: "new-failures",
            apply: new_failures,
        },
        Rule {
            name: "pre-existing",
            apply: pre_existing,
        },
    ]
}

pub fn classify(ctx: &BuildContext) -> Classification {
    let inputs = TwoAttemptInputs {
        suite: ctx.suite,
        first: ctx.attempt(RunAttempt::FirstWithChange),
        second: if ctx.suite.reruns_with_change() {
            ctx.attempt(RunAttempt::SecondWithChange)
        } else {
            None
        },
        clean: ctx.attempt(RunAttempt::WithoutChange),
    };
    evaluate(&rules(), &inputs)
}
