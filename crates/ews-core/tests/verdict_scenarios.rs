//! End-to-end verdicts over collected results: classifier, retry policy and
//! reporter together.

use std::collections::BTreeSet;

use ews_core::{
    Analysis, AttemptOutcome, BuildContext, BuildStatus, ChangeMetadata, ChangeRelevanceFilter,
    EwsConfig, FailureClassifier, ResultSet, RetryCounter, RetryPolicy, RunAttempt, Suite,
    Verdict, VerdictReporter,
};

fn run(attempt: RunAttempt, status: BuildStatus, failing: &[&str]) -> AttemptOutcome {
    AttemptOutcome::new(
        attempt,
        status,
        Some(ResultSet::failing(failing.iter().copied())),
    )
}

fn api_build(first: &[&str], second: &[&str], clean: (BuildStatus, &[&str])) -> BuildContext {
    BuildContext::new(
        "100",
        "api-tests-mac",
        Suite::ApiTests,
        ChangeMetadata::pull_request(55, "cafebabe00"),
    )
    .with_outcome(run(RunAttempt::FirstWithChange, BuildStatus::Failure, first))
    .with_outcome(run(RunAttempt::SecondWithChange, BuildStatus::Failure, second))
    .with_outcome(run(RunAttempt::WithoutChange, clean.0, clean.1))
}

fn verdict(ctx: &BuildContext) -> Verdict {
    let config = EwsConfig::default();
    let classification = FailureClassifier::new(&config).classify(Analysis::Tests, ctx);
    RetryPolicy::from_config(&config)
        .resolve(classification, ctx.retry_count)
        .verdict
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn consistent_failures_on_green_tree_are_new() {
    let ctx = api_build(&["A", "B"], &["A", "B"], (BuildStatus::Success, &[]));
    assert_eq!(verdict(&ctx), Verdict::fail_new(set(&["A", "B"]), false));
}

#[test]
fn clean_tree_failures_are_not_reported() {
    let ctx = api_build(&["A", "B"], &["A", "B"], (BuildStatus::Failure, &["A"]));
    assert_eq!(verdict(&ctx), Verdict::fail_new(set(&["B"]), false));
}

#[test]
fn disagreeing_runs_pass_with_flakes() {
    let ctx = api_build(&["A"], &["B"], (BuildStatus::Success, &[]));
    assert_eq!(
        verdict(&ctx),
        Verdict::pass_with_preexisting(set(&[]), set(&["A", "B"]))
    );
}

#[test]
fn silent_failures_retry_the_build() {
    let ctx = api_build(&[], &[], (BuildStatus::Success, &[]));
    match verdict(&ctx) {
        Verdict::RetryBuild { reason } => {
            assert!(reason.starts_with("Unexpected infrastructure issue"));
            assert!(reason.contains("[retry count is 0 of 3]"));
        }
        other => panic!("expected a retry, got {other:?}"),
    }
}

#[test]
fn truncated_runs_with_small_gap_retry_then_warn() {
    let with_change: Vec<String> = (0..600).map(|i| format!("fast/t{i}.html")).collect();
    let clean: Vec<String> = with_change[..598].to_vec();
    let truncated = |attempt, tests: &[String]| {
        AttemptOutcome::new(
            attempt,
            BuildStatus::Failure,
            Some(ResultSet::new(tests.iter().cloned(), Vec::<String>::new(), true)),
        )
    };
    let ctx = BuildContext::new(
        "101",
        "mac-wk2",
        Suite::LayoutTests,
        ChangeMetadata::patch(9000, Some(1)),
    )
    .with_outcome(truncated(RunAttempt::FirstWithChange, &with_change))
    .with_outcome(truncated(RunAttempt::SecondWithChange, &with_change))
    .with_outcome(truncated(RunAttempt::WithoutChange, &clean));

    assert!(verdict(&ctx).is_retry());

    let exhausted = ctx.with_retry_count(RetryCounter::new(3));
    assert!(matches!(
        verdict(&exhausted),
        Verdict::InfrastructureWarning { .. }
    ));
}

#[test]
fn retry_counter_never_passes_the_ceiling() {
    let policy = RetryPolicy::new(3);
    let ctx = api_build(&[], &[], (BuildStatus::Success, &[]));
    let classifier = FailureClassifier::new(&EwsConfig::default());
    let mut counter = RetryCounter::default();
    let mut retries = 0;
    for _ in 0..10 {
        let resolution = policy.resolve(classifier.classify(Analysis::Tests, &ctx), counter);
        assert!(resolution.retry_count.get() <= policy.max_retry());
        if resolution.verdict.is_retry() {
            retries += 1;
        }
        counter = resolution.retry_count;
    }
    assert_eq!(retries, 3);
}

#[test]
fn jsc_queue_ignores_webcore_only_diff() {
    let filter = ChangeRelevanceFilter::new(&EwsConfig::default().relevance).unwrap();
    let diff = b"diff --git a/Source/WebCore/foo.cpp b/Source/WebCore/foo.cpp\n\
                 --- a/Source/WebCore/foo.cpp\n\
                 +++ b/Source/WebCore/foo.cpp\n\
                 @@ -1 +1 @@\n-int a;\n+int b;\n";
    assert!(!filter.is_diff_relevant(diff, "jsc-builder"));
}

#[test]
fn reporter_summarises_new_failures() {
    let ctx = api_build(&["A", "B"], &["A", "B"], (BuildStatus::Success, &[]));
    let config = EwsConfig::default();
    let classification = FailureClassifier::new(&config).classify(Analysis::Tests, &ctx);
    let resolution = RetryPolicy::from_config(&config).resolve(classification, ctx.retry_count);
    let effects = VerdictReporter::new(config).report(&resolution, &ctx);
    assert_eq!(effects.status, BuildStatus::Failure);
    assert_eq!(effects.summary, "Found 2 new API test failures: A, B");
    assert_eq!(effects.revoke_commit_queue, None);
}

#[test]
fn red_clean_tree_mails_only_the_first_failures() {
    let clean: Vec<String> = (0..50).map(|i| format!("p{i:02}")).collect();
    let clean: Vec<&str> = clean.iter().map(String::as_str).collect();
    let ctx = api_build(&["p00"], &["p00"], (BuildStatus::Failure, &clean));
    let config = EwsConfig::default();
    let classification = FailureClassifier::new(&config).classify(Analysis::Tests, &ctx);
    let resolution = RetryPolicy::from_config(&config).resolve(classification, ctx.retry_count);
    assert!(matches!(resolution.verdict, Verdict::PassWithPreexisting { .. }));

    let effects = VerdictReporter::new(config).report(&resolution, &ctx);
    assert_eq!(effects.status, BuildStatus::Success);
    assert_eq!(effects.notifications.len(), 10);
    assert_eq!(effects.notifications[0].audience_key, "preexisting-p00");
    assert_eq!(effects.notifications[9].audience_key, "preexisting-p09");
}

#[test]
fn kill_notice_is_visible_from_the_crate_root() {
    let headers = "command timed out: 1200 seconds elapsed running [run-api-tests], attempting to kill";
    assert!(ews_core::did_command_time_out(headers));
    assert!(!ews_core::did_command_time_out("process killed by signal 9"));
}
