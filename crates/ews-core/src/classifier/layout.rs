//! Layout-test analysis over two with-change runs and a clean-tree run.
//!
//! A run that hit its failure limit only gives a lower bound on its failing
//! tests, so truncated runs are never compared as if they were complete.

use std::collections::BTreeSet;

use super::{evaluate, Rule, Ruling, UNABLE_TO_CONFIRM, UNEXPECTED_INFRA};
use crate::domain::results::TestId;
use crate::domain::verdict::{Classification, OperatorNote, Verdict};
use crate::domain::{AttemptOutcome, BuildContext, Decision, RunAttempt};

pub(crate) struct LayoutInputs<'a> {
    first: &'a AttemptOutcome,
    second: &'a AttemptOutcome,
    clean: Option<&'a AttemptOutcome>,
    failure_limit_gap: i64,
}

impl LayoutInputs<'_> {
    fn flaky(&self) -> BTreeSet<TestId> {
        self.first
            .failing_tests()
            .symmetric_difference(self.second.failing_tests())
            .cloned()
            .collect()
    }

    fn clean_failing(&self) -> BTreeSet<TestId> {
        self.clean
            .map(AttemptOutcome::failing_tests)
            .cloned()
            .unwrap_or_default()
    }

    fn clean_exceeded(&self) -> bool {
        self.clean.is_some_and(AttemptOutcome::exceeded_failure_limit)
    }

    fn minus_clean(&self, tests: &BTreeSet<TestId>) -> BTreeSet<TestId> {
        let clean = self.clean_failing();
        tests.difference(&clean).cloned().collect()
    }

    fn report_pre_existing(&self) -> Ruling {
        let clean = self.clean_failing();
        let flaky = self.flaky();
        Ruling::new(Verdict::pass_with_preexisting(clean.clone(), flaky.clone()))
            .tests_note(OperatorNote::PreexistingFailures { tests: clean })
            .tests_note(OperatorNote::flaky(flaky))
    }
}

fn fail_new(failing: BTreeSet<TestId>, exceeded_limit: bool) -> Ruling {
    Ruling::new(Verdict::fail_new(failing, exceeded_limit))
}

/// The re-run passed: the first run's failures did not reproduce.
fn rerun_passed(inputs: &LayoutInputs<'_>) -> Option<Ruling> {
    if !inputs.second.status.is_success() {
        return None;
    }
    let flaky = inputs.flaky();
    if inputs.first.exceeded_failure_limit() || flaky.is_empty() {
        return Some(Ruling::new(Verdict::Pass));
    }
    Some(
        Ruling::new(Verdict::pass_with_preexisting(BTreeSet::new(), flaky.clone()))
            .tests_note(OperatorNote::flaky(flaky)),
    )
}

/// Both with-change runs exited with an error but listed nothing.
fn no_failures_with_change(inputs: &LayoutInputs<'_>) -> Option<Ruling> {
    if !(inputs.first.has_no_results() && inputs.second.has_no_results()) {
        return None;
    }
    match inputs.clean {
        Some(clean) if clean.status.is_success() => Some(fail_new(BTreeSet::new(), false)),
        _ => Some(Ruling::defer(UNEXPECTED_INFRA)),
    }
}

fn clean_tree_unavailable(inputs: &LayoutInputs<'_>) -> Option<Ruling> {
    let usable = inputs
        .clean
        .is_some_and(|clean| clean.results.is_some() || clean.status.is_success());
    (!usable).then(|| Ruling::defer(UNABLE_TO_CONFIRM))
}

/// Both runs truncated: only a clear excess over the clean tree is blamed
/// on the change.
fn both_exceeded_limit(inputs: &LayoutInputs<'_>) -> Option<Ruling> {
    if !(inputs.first.exceeded_failure_limit() && inputs.second.exceeded_failure_limit()) {
        return None;
    }
    let with_change = inputs.first.failing_tests().len() as i64;
    let clean = inputs.clean_failing().len() as i64;
    if with_change - clean <= inputs.failure_limit_gap {
        return Some(Ruling::defer(UNABLE_TO_CONFIRM));
    }
    let new = inputs.minus_clean(inputs.first.failing_tests());
    if new.is_empty() {
        return Some(Ruling::defer(UNABLE_TO_CONFIRM));
    }
    Some(fail_new(new, true))
}

/// Exactly one run truncated: trust the complete one.
fn one_exceeded_limit(inputs: &LayoutInputs<'_>) -> Option<Ruling> {
    let complete = match (
        inputs.first.exceeded_failure_limit(),
        inputs.second.exceeded_failure_limit(),
    ) {
        (false, true) => inputs.first,
        (true, false) => inputs.second,
        _ => return None,
    };
    if inputs.clean_exceeded() {
        return Some(Ruling::defer(UNABLE_TO_CONFIRM));
    }
    let new = inputs.minus_clean(complete.failing_tests());
    if new.is_empty() {
        return Some(Ruling::defer(UNABLE_TO_CONFIRM));
    }
    Some(fail_new(new, false))
}

/// The runs failed different tests; only tests failing in both can be new.
fn runs_disagree(inputs: &LayoutInputs<'_>) -> Option<Ruling> {
    if inputs.first.failing_tests() == inputs.second.failing_tests() {
        return None;
    }
    let consistent: BTreeSet<TestId> = inputs
        .first
        .failing_tests()
        .intersection(inputs.second.failing_tests())
        .cloned()
        .collect();
    if !consistent.is_empty() {
        if inputs.clean_exceeded() {
            return Some(Ruling::defer(UNABLE_TO_CONFIRM));
        }
        let new = inputs.minus_clean(&consistent);
        if !new.is_empty() {
            return Some(fail_new(new, false));
        }
    }
    Some(inputs.report_pre_existing())
}

fn runs_agree(inputs: &LayoutInputs<'_>) -> Option<Ruling> {
    if inputs.clean_exceeded() {
        return Some(Ruling::defer(UNABLE_TO_CONFIRM));
    }
    let new = inputs.minus_clean(inputs.first.failing_tests());
    if !new.is_empty() {
        return Some(fail_new(new, false));
    }
    Some(inputs.report_pre_existing())
}

fn rules<'a>() -> [Rule<LayoutInputs<'a>>; 7] {
    [
        Rule {
            name: "rerun-passed",
            apply: rerun_passed,
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
            name: "both-exceeded-limit",
            apply: both_exceeded_limit,
        },
        Rule {
            name: "one-exceeded-limit",
            apply: one_exceeded_limit,
        },
        Rule {
            name: "runs-disagree",
            apply: runs_disagree,
        },
        Rule {
            name: "runs-agree",
            apply: runs_agree,
        },
    ]
}

pub fn classify(ctx: &BuildContext, failure_limit_gap: i64) -> Classification {
    let (Some(first), Some(second)) = (
        ctx.attempt(RunAttempt::FirstWithChange),
        ctx.attempt(RunAttempt::SecondWithChange),
    ) else {
        return Classification::new(
            "missing-with-change-runs",
            Decision::defer("Unable to parse layout test results"),
        );
    };
    let inputs = LayoutInputs {
        first,
        second,
        clean: ctx.attempt(RunAttempt::WithoutChange),
        failure_limit_gap,
    };
    evaluate(&rules(), &inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BuildStatus, ChangeMetadata, ResultSet, Suite};

    struct Run<'a> {
        status: BuildStatus,
        failing: &'a [&'a str],
        exceeded: bool,
    }

    fn failed<'a>(failing: &'a [&'a str]) -> Run<'a> {
        run(failing, false)
    }

    fn run<'a>(failing: &'a [&'a str], exceeded: bool) -> Run<'a> {
        Run {
            status: BuildStatus::Failure,
            failing,
            exceeded,
        }
    }

    fn truncated(count: usize, prefix: &str) -> Vec<String> {
        (0..count).map(|i| format!("{prefix}/t{i}.html")).collect()
    }

    fn outcome(attempt: RunAttempt, run: &Run<'_>) -> AttemptOutcome {
        AttemptOutcome::new(
            attempt,
            run.status,
            Some(ResultSet::new(
                run.failing.iter().copied(),
                Vec::<String>::new(),
                run.exceeded,
            )),
        )
    }

    fn ctx(first: Run<'_>, second: Run<'_>, clean: Option<Run<'_>>) -> BuildContext {
        let mut ctx = BuildContext::new(
            "b",
            "mac-wk2",
            Suite::LayoutTests,
            ChangeMetadata::pull_request(3, "abc123"),
        )
        .with_outcome(outcome(RunAttempt::FirstWithChange, &first))
        .with_outcome(outcome(RunAttempt::SecondWithChange, &second));
        if let Some(clean) = clean {
            ctx = ctx.with_outcome(outcome(RunAttempt::WithoutChange, &clean));
        }
        ctx
    }

    fn set(items: &[&str]) -> BTreeSet<TestId> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rerun_passed_reports_flakes() {
        let second = Run {
            status: BuildStatus::Success,
            failing: &[],
            exceeded: false,
        };
        let c = classify(&ctx(failed(&["a.html"]), second, None), 5);
        assert_eq!(c.rule, "rerun-passed");
        assert_eq!(
            c.decision,
            Decision::Verdict(Verdict::pass_with_preexisting(set(&[]), set(&["a.html"])))
        );
    }

    #[test]
    fn test_no_results_with_green_clean_tree_fails() {
        let clean = Run {
            status: BuildStatus::Success,
            failing: &[],
            exceeded: false,
        };
        let c = classify(&ctx(failed(&[]), failed(&[]), Some(clean)), 5);
        assert_eq!(
            c.decision,
            Decision::Verdict(Verdict::fail_new(BTreeSet::new(), false))
        );

        let c = classify(&ctx(failed(&[]), failed(&[]), Some(failed(&[]))), 5);
        assert_eq!(c.decision, Decision::defer(UNEXPECTED_INFRA));
    }

    #[test]
    fn test_small_gap_between_truncated_runs_defers() {
        let with_change = truncated(600, "fast");
        let clean_tree = truncated(598, "fast");
        let with_refs: Vec<&str> = with_change.iter().map(String::as_str).collect();
        let clean_refs: Vec<&str> = clean_tree.iter().map(String::as_str).collect();
        let c = classify(
            &ctx(
                run(&with_refs, true),
                run(&with_refs, true),
                Some(run(&clean_refs, true)),
            ),
            5,
        );
        assert_eq!(c.rule, "both-exceeded-limit");
        assert!(c.decision.is_defer());
    }

    #[test]
    fn test_large_gap_between_truncated_runs_fails_without_clean_failures() {
        let with_change = truncated(600, "fast");
        let with_refs: Vec<&str> = with_change.iter().map(String::as_str).collect();
        let clean_refs: Vec<&str> = with_refs[..10].to_vec();
        let c = classify(
            &ctx(
                run(&with_refs, true),
                run(&with_refs, true),
                Some(run(&clean_refs, false)),
            ),
            5,
        );
        match c.decision {
            Decision::Verdict(Verdict::FailNew {
                failing,
                exceeded_limit,
            }) => {
                assert!(exceeded_limit);
                assert_eq!(failing.len(), 590);
                assert!(!failing.contains("fast/t0.html"));
            }
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[test]
    fn test_one_truncated_run_trusts_the_other() {
        let first = run(&["a.html", "b.html", "c.html"], true);
        let c = classify(&ctx(first, failed(&["a.html", "b.html"]), Some(failed(&["a.html"]))), 5);
        assert_eq!(c.rule, "one-exceeded-limit");
        assert_eq!(
            c.decision,
            Decision::Verdict(Verdict::fail_new(set(&["b.html"]), false))
        );
    }

    #[test]
    fn test_disagreeing_runs_with_truncated_clean_tree_defer() {
        let c = classify(
            &ctx(
                failed(&["a.html", "b.html"]),
                failed(&["a.html"]),
                Some(run(&["x.html"], true)),
            ),
            5,
        );
        assert_eq!(c.rule, "runs-disagree");
        assert!(c.decision.is_defer());
    }

    #[test]
    fn test_disagreeing_runs_without_consistent_failures_pass() {
        let c = classify(
            &ctx(failed(&["a.html"]), failed(&["b.html"]), Some(failed(&["z.html"]))),
            5,
        );
        assert_eq!(
            c.decision,
            Decision::Verdict(Verdict::pass_with_preexisting(
                set(&["z.html"]),
                set(&["a.html", "b.html"])
            ))
        );
        assert_eq!(c.notes.len(), 2);
    }

    #[test]
    fn test_agreeing_runs_explained_by_clean_tree_pass() {
        let c = classify(
            &ctx(failed(&["a.html"]), failed(&["a.html"]), Some(failed(&["a.html"]))),
            5,
        );
        assert_eq!(c.rule, "runs-agree");
        assert_eq!(
            c.decision,
            Decision::Verdict(Verdict::pass_with_preexisting(set(&["a.html"]), set(&[])))
        );
    }

    #[test]
    fn test_missing_runs_defer() {
        let ctx = BuildContext::new("b", "q", Suite::LayoutTests, ChangeMetadata::patch(1, None));
        assert!(classify(&ctx, 5).decision.is_defer());
    }
}
