//! Integration tests for the build pipeline with a scripted executor and
//! the collaborator fakes.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use ews_ci::{BuildPipeline, StepExecutor};
use ews_core::fakes::{CommitQueueCall, RecordingCommitQueue, RecordingSink, StaticValidator};
use ews_core::{
    read_decision, AttemptOutcome, BuildContext, BuildStatus, ChangeMetadata, ChangeStatus,
    Collaborators, CompileOutcome, EwsConfig, ResultSet, RunAttempt, Step, StepOutcome, Suite,
    Verdict,
};

const RELEVANT_DIFF: &[u8] = b"diff --git a/Source/WebKit/UIProcess/Foo.cpp b/Source/WebKit/UIProcess/Foo.cpp\n\
--- a/Source/WebKit/UIProcess/Foo.cpp\n\
+++ b/Source/WebKit/UIProcess/Foo.cpp\n\
@@ -1 +1 @@\n-int a;\n+int b;\n";

/// Answers steps from a per-step script. The last scripted outcome of a
/// step is reused once the script runs out; unscripted steps succeed.
#[derive(Default)]
struct ScriptedExecutor {
    script: Mutex<HashMap<String, VecDeque<StepOutcome>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn new() -> Self {
        Self::default()
    }

    fn on(self, step: &str, outcome: StepOutcome) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(step.to_string())
            .or_default()
            .push_back(outcome);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn count(&self, step: &str) -> usize {
        self.calls().iter().filter(|name| *name == step).count()
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn execute(&self, step: &Step, _ctx: &BuildContext) -> anyhow::Result<StepOutcome> {
        let name = step.name();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(name.clone());
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        let outcome = match script.get_mut(&name) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        Ok(outcome.unwrap_or(StepOutcome::done(BuildStatus::Success)))
    }
}

/// Every step fails to start.
struct BrokenExecutor;

#[async_trait]
impl StepExecutor for BrokenExecutor {
    async fn execute(&self, step: &Step, _ctx: &BuildContext) -> anyhow::Result<StepOutcome> {
        anyhow::bail!("worker lost while running {step}")
    }
}

fn tests(attempt: RunAttempt, status: BuildStatus, failing: &[&str]) -> StepOutcome {
    StepOutcome::Tests(AttemptOutcome::new(
        attempt,
        status,
        Some(ResultSet::failing(failing.iter().copied())),
    ))
}

fn compile(status: BuildStatus) -> StepOutcome {
    StepOutcome::Compile(CompileOutcome::new(status))
}

fn api_ctx() -> BuildContext {
    BuildContext::new(
        "900",
        "api-tests-mac",
        Suite::ApiTests,
        ChangeMetadata::pull_request(55, "cafebabe00")
            .with_author("author@webkit.org")
            .with_title("Tidy up UIProcess"),
    )
    .with_worker("ews200")
}

fn patch_ctx(queue: &str, suite: Suite) -> BuildContext {
    BuildContext::new(
        "901",
        queue,
        suite,
        ChangeMetadata::patch(3141, Some(59)).with_author("author@webkit.org"),
    )
}

struct Harness {
    sink: Arc<RecordingSink>,
    commit_queue: Arc<RecordingCommitQueue>,
    collaborators: Collaborators,
}

fn harness(status: ChangeStatus) -> Harness {
    let sink = Arc::new(RecordingSink::new());
    let commit_queue = Arc::new(RecordingCommitQueue::new());
    let collaborators = Collaborators::new(
        sink.clone(),
        Arc::new(StaticValidator::new(status)),
        commit_queue.clone(),
    );
    Harness {
        sink,
        commit_queue,
        collaborators,
    }
}

/// Test: consistent API failures on a green tree are new failures
#[tokio::test]
async fn test_consistent_api_failures_fail_the_change() {
    let executor = Arc::new(
        ScriptedExecutor::new()
            .on(
                "first-with-change",
                tests(RunAttempt::FirstWithChange, BuildStatus::Failure, &["A", "B"]),
            )
            .on(
                "second-with-change",
                tests(RunAttempt::SecondWithChange, BuildStatus::Failure, &["A", "B"]),
            )
            .on(
                "without-change",
                tests(RunAttempt::WithoutChange, BuildStatus::Success, &[]),
            ),
    );
    let h = harness(ChangeStatus::Open);
    let pipeline =
        BuildPipeline::new(&EwsConfig::default(), executor.clone(), h.collaborators).unwrap();

    let result = pipeline.run(api_ctx(), RELEVANT_DIFF).await.unwrap();

    assert_eq!(result.status, BuildStatus::Failure);
    assert!(result.is_failure());
    assert_eq!(result.summary, "Found 2 new API test failures: A, B");
    assert!(matches!(result.verdict, Some(Verdict::FailNew { .. })));
    assert_eq!(
        executor.calls(),
        vec![
            "kill-old-processes",
            "first-with-change",
            "kill-old-processes",
            "second-with-change",
            "revert-pull-request-changes",
            "compile-webkit-without-change",
            "kill-old-processes",
            "without-change",
        ]
    );
    assert_eq!(
        h.sink.subjects(),
        vec!["API test failure for Hash cafebabe: Tidy up UIProcess".to_string()]
    );
    assert!(h.commit_queue.calls().is_empty());
}

/// Test: a green first run finishes without any clean-tree work
#[tokio::test]
async fn test_first_run_pass_finishes_early() {
    let executor = Arc::new(ScriptedExecutor::new().on(
        "first-with-change",
        tests(RunAttempt::FirstWithChange, BuildStatus::Success, &[]),
    ));
    let h = harness(ChangeStatus::Open);
    let pipeline =
        BuildPipeline::new(&EwsConfig::default(), executor.clone(), h.collaborators).unwrap();

    let result = pipeline
        .run(patch_ctx("mac-wk2", Suite::LayoutTests), RELEVANT_DIFF)
        .await
        .unwrap();

    assert_eq!(result.status, BuildStatus::Success);
    assert_eq!(result.verdict, Some(Verdict::Pass));
    assert_eq!(result.summary, "Passed layout tests");
    assert_eq!(
        result.steps,
        vec!["validate-change", "kill-old-processes", "first-with-change"]
    );
    assert!(h.sink.sent().is_empty());
}

/// Test: ambiguous evidence restarts the build until the ceiling, then warns
#[tokio::test]
async fn test_silent_failures_retry_then_warn() {
    let executor = Arc::new(
        ScriptedExecutor::new()
            .on(
                "first-with-change",
                tests(RunAttempt::FirstWithChange, BuildStatus::Failure, &[]),
            )
            .on(
                "second-with-change",
                tests(RunAttempt::SecondWithChange, BuildStatus::Failure, &[]),
            )
            .on(
                "without-change",
                tests(RunAttempt::WithoutChange, BuildStatus::Success, &[]),
            ),
    );
    let h = harness(ChangeStatus::Open);
    let config = EwsConfig {
        max_retry: 1,
        ..EwsConfig::default()
    };
    let pipeline = BuildPipeline::new(&config, executor.clone(), h.collaborators).unwrap();

    let result = pipeline.run(api_ctx(), RELEVANT_DIFF).await.unwrap();

    assert_eq!(result.status, BuildStatus::Warnings);
    assert!(!result.is_failure());
    assert!(matches!(
        result.verdict,
        Some(Verdict::InfrastructureWarning { .. })
    ));
    assert_eq!(result.retry_count.get(), 1);
    assert_eq!(executor.count("first-with-change"), 2);
    // one infrastructure mail per attempt, never the author
    let sent = h.sink.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|n| !n.is_for_author()));
}

/// Test: a build triggered by a parent hands its retry back to the parent
#[tokio::test]
async fn test_triggered_build_retries_through_parent() {
    let executor = Arc::new(
        ScriptedExecutor::new()
            .on(
                "first-with-change",
                tests(RunAttempt::FirstWithChange, BuildStatus::Failure, &[]),
            )
            .on(
                "second-with-change",
                tests(RunAttempt::SecondWithChange, BuildStatus::Failure, &[]),
            )
            .on(
                "without-change",
                tests(RunAttempt::WithoutChange, BuildStatus::Success, &[]),
            ),
    );
    let h = harness(ChangeStatus::Open);
    let pipeline =
        BuildPipeline::new(&EwsConfig::default(), executor.clone(), h.collaborators).unwrap();
    let ctx = api_ctx().with_triggered_by("mac-build-12", "api-tests-scheduler");

    let result = pipeline.run(ctx, RELEVANT_DIFF).await.unwrap();

    assert_eq!(result.status, BuildStatus::Success);
    assert!(matches!(result.verdict, Some(Verdict::RetryBuild { .. })));
    assert_eq!(executor.count("first-with-change"), 1);
    assert_eq!(executor.calls().last().map(String::as_str), Some("trigger"));
}

/// Test: a change that went stale mid-build stops the build
#[tokio::test]
async fn test_stale_change_is_skipped() {
    let executor = Arc::new(ScriptedExecutor::new());
    let h = harness(ChangeStatus::Obsolete);
    let pipeline =
        BuildPipeline::new(&EwsConfig::default(), executor.clone(), h.collaborators).unwrap();

    let result = pipeline
        .run(patch_ctx("mac-wk2", Suite::LayoutTests), RELEVANT_DIFF)
        .await
        .unwrap();

    assert_eq!(result.status, BuildStatus::Skipped);
    assert_eq!(result.summary, "Patch 3141 is obsolete");
    assert!(result.verdict.is_none());
    assert!(executor.calls().is_empty());
}

/// Test: queues skip changes that don't touch what they test
#[tokio::test]
async fn test_irrelevant_change_is_skipped() {
    let executor = Arc::new(ScriptedExecutor::new());
    let h = harness(ChangeStatus::Open);
    let pipeline =
        BuildPipeline::new(&EwsConfig::default(), executor.clone(), h.collaborators).unwrap();
    let ctx = BuildContext::new(
        "902",
        "jsc-tests",
        Suite::Jsc,
        ChangeMetadata::pull_request(55, "cafebabe00"),
    );
    let diff = b"diff --git a/Source/WebCore/foo.cpp b/Source/WebCore/foo.cpp\n\
                 +++ b/Source/WebCore/foo.cpp\n";

    let result = pipeline.run(ctx, diff).await.unwrap();

    assert_eq!(result.status, BuildStatus::Skipped);
    assert_eq!(result.summary, "Pull request 55 doesn't have relevant changes");
    assert!(result.steps.is_empty());
    assert!(executor.calls().is_empty());
}

/// Test: a forced build without a diff is never filtered out
#[tokio::test]
async fn test_forced_build_without_diff_runs() {
    let executor = Arc::new(ScriptedExecutor::new().on(
        "first-with-change",
        tests(RunAttempt::FirstWithChange, BuildStatus::Success, &[]),
    ));
    let h = harness(ChangeStatus::Open);
    let pipeline =
        BuildPipeline::new(&EwsConfig::default(), executor.clone(), h.collaborators).unwrap();
    let ctx = BuildContext::new(
        "903",
        "jsc-tests",
        Suite::Jsc,
        ChangeMetadata::pull_request(55, "cafebabe00"),
    );

    let result = pipeline.run(ctx, b"").await.unwrap();

    assert_eq!(result.status, BuildStatus::Success);
    assert_eq!(result.summary, "Passed JSC tests");
    assert_eq!(executor.count("first-with-change"), 1);
}

/// Test: a step that cannot run ends the build with an exception
#[tokio::test]
async fn test_executor_error_is_exception() {
    let h = harness(ChangeStatus::Open);
    let pipeline =
        BuildPipeline::new(&EwsConfig::default(), Arc::new(BrokenExecutor), h.collaborators)
            .unwrap();

    let result = pipeline.run(api_ctx(), RELEVANT_DIFF).await.unwrap();

    assert_eq!(result.status, BuildStatus::Exception);
    assert!(result.is_failure());
    assert!(result
        .summary
        .starts_with("kill-old-processes raised an exception"));
}

/// Test: a patch that breaks the build revokes its commit-queue flag
#[tokio::test]
async fn test_patch_that_does_not_build() {
    let executor = Arc::new(
        ScriptedExecutor::new()
            .on("compile-webkit", compile(BuildStatus::Failure))
            .on("compile-webkit-without-change", compile(BuildStatus::Success)),
    );
    let h = harness(ChangeStatus::Open);
    let pipeline =
        BuildPipeline::new(&EwsConfig::default(), executor.clone(), h.collaborators).unwrap();

    let result = pipeline
        .run(patch_ctx("commit-queue", Suite::Compile), RELEVANT_DIFF)
        .await
        .unwrap();

    assert_eq!(result.status, BuildStatus::Failure);
    assert_eq!(result.summary, "Patch 3141 does not build");
    assert_eq!(
        executor.calls(),
        vec!["compile-webkit", "unapply-patch", "compile-webkit-without-change"]
    );
    let calls = h.commit_queue.calls();
    assert!(matches!(calls[0], CommitQueueCall::Comment { bug_id: 59, .. }));
    assert!(matches!(calls[1], CommitQueueCall::Revoke { patch_id: 3141, .. }));
}

/// Test: the final decision is persisted and verifiable
#[tokio::test]
async fn test_decision_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let executor = Arc::new(ScriptedExecutor::new().on(
        "first-with-change",
        tests(RunAttempt::FirstWithChange, BuildStatus::Success, &[]),
    ));
    let h = harness(ChangeStatus::Open);
    let pipeline = BuildPipeline::new(&EwsConfig::default(), executor, h.collaborators)
        .unwrap()
        .with_decision_dir(dir.path());

    let result = pipeline.run(api_ctx(), RELEVANT_DIFF).await.unwrap();

    assert!(result.decision_path.is_some());
    let record = read_decision("900", dir.path()).unwrap();
    assert_eq!(record.verdict, Verdict::Pass);
    assert_eq!(record.status, BuildStatus::Success);
    assert_eq!(record.summary, "Passed API tests");
    assert_eq!(record.attempts.len(), 1);
}
