//! Delivery of reporter effects through the collaborator fakes.

use std::collections::BTreeSet;
use std::sync::Arc;

use ews_core::fakes::{
    CommitQueueCall, FailingSink, RecordingCommitQueue, RecordingSink, StaticValidator,
};
use ews_core::{
    BuildContext, BuildStatus, ChangeMetadata, ChangeStatus, Collaborators, OperatorNote,
    Resolution, RetryCounter, Suite, Verdict, VerdictReporter,
};

fn ctx(queue: &str) -> BuildContext {
    BuildContext::new(
        "77",
        queue,
        Suite::LayoutTests,
        ChangeMetadata::patch(3141, Some(59))
            .with_author("author@webkit.org")
            .with_title("Speed up layout"),
    )
    .with_worker("ews150")
}

fn fail_new_with_flake() -> Resolution {
    let failing: BTreeSet<String> = ["fast/new.html".to_string()].into_iter().collect();
    Resolution {
        verdict: Verdict::fail_new(failing, false),
        retry_count: RetryCounter::new(0),
        notes: vec![OperatorNote::flaky(["fast/flaky.html".to_string()])],
        rule: "runs-agree",
    }
}

#[tokio::test]
async fn stale_change_suppresses_author_mail_only() {
    let sink = Arc::new(RecordingSink::new());
    let queue = Arc::new(RecordingCommitQueue::new());
    let collaborators = Collaborators::new(
        sink.clone(),
        Arc::new(StaticValidator::new(ChangeStatus::Obsolete)),
        queue.clone(),
    );
    let reporter = VerdictReporter::default();
    let ctx = ctx("mac-wk2");
    let effects = reporter.report(&fail_new_with_flake(), &ctx);
    assert_eq!(effects.status, BuildStatus::Failure);

    let report = reporter.dispatch(&effects, &ctx, &collaborators).await;
    assert_eq!(report.sent, 1);
    assert_eq!(report.suppressed, 1);
    assert_eq!(sink.subjects(), vec!["Flaky test: fast/flaky.html".to_string()]);
    assert!(matches!(
        queue.calls().as_slice(),
        [CommitQueueCall::Revoke { patch_id: 3141, .. }]
    ));
}

#[tokio::test]
async fn unreachable_review_system_still_notifies_author() {
    let sink = Arc::new(RecordingSink::new());
    let collaborators = Collaborators::new(
        sink.clone(),
        Arc::new(StaticValidator::unreachable()),
        Arc::new(RecordingCommitQueue::new()),
    );
    let reporter = VerdictReporter::default();
    let ctx = ctx("mac-wk2");
    let effects = reporter.report(&fail_new_with_flake(), &ctx);

    let report = reporter.dispatch(&effects, &ctx, &collaborators).await;
    assert_eq!(report.sent, 2);
    assert!(sink
        .sent()
        .iter()
        .any(|n| n.subject == "Layout test failure for Patch 3141: Speed up layout"));
}

#[tokio::test]
async fn delivery_failures_are_counted_not_fatal() {
    let collaborators = Collaborators::new(
        Arc::new(FailingSink),
        Arc::new(StaticValidator::new(ChangeStatus::Open)),
        Arc::new(RecordingCommitQueue::new()),
    );
    let reporter = VerdictReporter::default();
    let ctx = ctx("mac-wk2");
    let effects = reporter.report(&fail_new_with_flake(), &ctx);

    let report = reporter.dispatch(&effects, &ctx, &collaborators).await;
    assert_eq!(report.sent, 0);
    assert_eq!(report.failed, 2);
}

#[tokio::test]
async fn commit_queue_comments_before_revoking() {
    let queue = Arc::new(RecordingCommitQueue::new());
    let collaborators = Collaborators::new(
        Arc::new(RecordingSink::new()),
        Arc::new(StaticValidator::new(ChangeStatus::Open)),
        queue.clone(),
    );
    let reporter = VerdictReporter::default();
    let ctx = ctx("commit-queue");
    let effects = reporter.report(&fail_new_with_flake(), &ctx);
    reporter.dispatch(&effects, &ctx, &collaborators).await;

    let calls = queue.calls();
    assert_eq!(calls.len(), 2);
    assert!(matches!(calls[0], CommitQueueCall::Comment { bug_id: 59, .. }));
    assert!(matches!(calls[1], CommitQueueCall::Revoke { patch_id: 3141, .. }));
}

#[tokio::test]
async fn infrastructure_warning_is_operator_only() {
    let sink = Arc::new(RecordingSink::new());
    let collaborators = Collaborators::new(
        sink.clone(),
        Arc::new(StaticValidator::new(ChangeStatus::Open)),
        Arc::new(RecordingCommitQueue::new()),
    );
    let reporter = VerdictReporter::default();
    let ctx = ctx("mac-wk2");
    let resolution = Resolution {
        verdict: Verdict::InfrastructureWarning {
            reason: "Reached the maximum number of retries (3).".to_string(),
        },
        retry_count: RetryCounter::new(3),
        notes: vec![OperatorNote::InfrastructureIssue {
            reason: "Reached the maximum number of retries (3).".to_string(),
        }],
        rule: "both-exceeded-limit",
    };
    let effects = reporter.report(&resolution, &ctx);
    assert_eq!(effects.status, BuildStatus::Warnings);

    reporter.dispatch(&effects, &ctx, &collaborators).await;
    let sent = sink.sent();
    assert_eq!(sent.len(), 1);
    assert!(!sent[0].is_for_author());
    assert_eq!(sent[0].audience_key, "infrastructure-mac-wk2");
}
