//! One build of one queue for one change.
//!
//! The pipeline interprets planned steps one at a time. After every step it
//! records the outcome in the [`BuildContext`] and asks the planner what to
//! do next; planned steps go to the front of the queue. The first terminal
//! decision goes through the retry policy and the reporter. A retry restarts
//! the with-change sequence from a fresh context.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use chrono::Utc;
use ews_core::{
    obs, write_decision, BuildContext, BuildStatus, ChangeId, ChangeMetadata,
    ChangeRelevanceFilter, ChangeStatus, Classification, Collaborators, Decision,
    DecisionRecord, DispatchReport, EwsConfig, ExternalEffects, FailureClassifier, NextStep,
    Resolution, RetryCounter, RetryPolicy, Step, StepOutcome, StepPlanner, Verdict,
    VerdictReporter,
};
use tracing::{error, info, Instrument};

use crate::executor::StepExecutor;

/// Result of a complete build.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub build_id: String,

    /// Final status reported to the build master.
    pub status: BuildStatus,

    pub summary: String,

    /// `None` when the build ended before a verdict (skipped or exception).
    pub verdict: Option<Verdict>,

    /// Rule that produced the verdict.
    pub rule: Option<String>,

    pub retry_count: RetryCounter,

    /// Names of the steps that ran, across every attempt.
    pub steps: Vec<String>,

    /// Notification delivery totals, across every attempt.
    pub dispatch: DispatchReport,

    pub decision_path: Option<PathBuf>,

    pub duration_ms: u64,
}

impl PipelineResult {
    /// The change (or the infrastructure) needs attention.
    pub fn is_failure(&self) -> bool {
        matches!(self.status, BuildStatus::Failure | BuildStatus::Exception)
    }
}

/// How one pass over the step queue ended.
enum AttemptEnd {
    Resolved(Resolution),
    Aborted { status: BuildStatus, summary: String },
}

/// Per-build accumulator.
struct BuildLog {
    start: Instant,
    steps: Vec<String>,
    dispatch: DispatchReport,
}

impl BuildLog {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            steps: Vec::new(),
            dispatch: DispatchReport::default(),
        }
    }

    fn add_dispatch(&mut self, report: DispatchReport) {
        self.dispatch.sent += report.sent;
        self.dispatch.suppressed += report.suppressed;
        self.dispatch.failed += report.failed;
    }

    fn finish(
        self,
        ctx: &BuildContext,
        status: BuildStatus,
        summary: String,
        resolution: Option<&Resolution>,
        decision_path: Option<PathBuf>,
    ) -> PipelineResult {
        PipelineResult {
            build_id: ctx.build_id.clone(),
            status,
            summary,
            verdict: resolution.map(|r| r.verdict.clone()),
            rule: resolution.map(|r| r.rule.to_string()),
            retry_count: resolution.map_or(ctx.retry_count, |r| r.retry_count),
            steps: self.steps,
            dispatch: self.dispatch,
            decision_path,
            duration_ms: self.start.elapsed().as_millis() as u64,
        }
    }
}

/// Drives one build through relevance, steps, classification, retries and
/// reporting.
pub struct BuildPipeline {
    relevance: ChangeRelevanceFilter,
    classifier: FailureClassifier,
    retry: RetryPolicy,
    planner: StepPlanner,
    reporter: VerdictReporter,
    executor: Arc<dyn StepExecutor>,
    collaborators: Collaborators,
    decision_dir: Option<PathBuf>,
}

impl BuildPipeline {
    pub fn new(
        config: &EwsConfig,
        executor: Arc<dyn StepExecutor>,
        collaborators: Collaborators,
    ) -> anyhow::Result<Self> {
        let relevance = ChangeRelevanceFilter::new(&config.relevance)
            .context("failed to compile relevance patterns")?;
        Ok(Self {
            relevance,
            classifier: FailureClassifier::new(config),
            retry: RetryPolicy::from_config(config),
            planner: StepPlanner::from_config(config),
            reporter: VerdictReporter::new(config.clone()),
            executor,
            collaborators,
            decision_dir: None,
        })
    }

    /// Persist the final decision of every build under `dir`.
    pub fn with_decision_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.decision_dir = Some(dir.into());
        self
    }

    /// Run the build for `ctx`, whose change is described by `diff`.
    pub async fn run(&self, ctx: BuildContext, diff: &[u8]) -> anyhow::Result<PipelineResult> {
        let span = obs::build_span(&ctx.build_id, &ctx.queue);
        self.run_build(ctx, diff).instrument(span).await
    }

    async fn run_build(
        &self,
        mut ctx: BuildContext,
        diff: &[u8],
    ) -> anyhow::Result<PipelineResult> {
        ctx.change
            .validate()
            .with_context(|| format!("build {} has unusable change metadata", ctx.build_id))?;

        let mut log = BuildLog::new();
        obs::emit_build_started(
            &ctx.build_id,
            &ctx.queue,
            &ctx.change.label(),
            ctx.retry_count.get(),
        );

        // No diff means a forced build of the change; it always runs.
        let forced = diff.iter().all(u8::is_ascii_whitespace);
        if !forced && !self.relevance.is_diff_relevant(diff, &ctx.queue) {
            let summary = format!(
                "{} doesn't have relevant changes",
                change_title(&ctx.change)
            );
            info!(build_id = %ctx.build_id, queue = %ctx.queue, "{summary}");
            return Ok(log.finish(&ctx, BuildStatus::Skipped, summary, None, None));
        }

        loop {
            let (attempt_ctx, end) = self.run_attempt(ctx, &mut log).await;
            ctx = attempt_ctx;

            let resolution = match end {
                AttemptEnd::Aborted { status, summary } => {
                    info!(
                        build_id = %ctx.build_id,
                        status = %status,
                        summary = %summary,
                        "Build ended without a verdict"
                    );
                    return Ok(log.finish(&ctx, status, summary, None, None));
                }
                AttemptEnd::Resolved(resolution) => resolution,
            };

            let effects = self.reporter.report(&resolution, &ctx);
            obs::emit_verdict(
                &ctx.build_id,
                resolution.verdict.kind(),
                effects.status.as_str(),
                resolution.rule,
            );
            let report = self
                .reporter
                .dispatch(&effects, &ctx, &self.collaborators)
                .await;
            log.add_dispatch(report);

            if let Some(trigger) = &effects.trigger {
                log.steps.push(trigger.name());
                if let Err(err) = self.executor.execute(trigger, &ctx).await {
                    error!(build_id = %ctx.build_id, error = %err, "Unable to trigger parent scheduler");
                    let summary = format!("{trigger} raised an exception: {err:#}");
                    return Ok(log.finish(&ctx, BuildStatus::Exception, summary, None, None));
                }
            }

            if resolution.verdict.is_retry() && effects.trigger.is_none() {
                obs::emit_retry_scheduled(
                    &ctx.build_id,
                    resolution.retry_count.get(),
                    self.retry.max_retry(),
                    &effects.summary,
                );
                ctx = ctx
                    .fresh_attempt()
                    .with_retry_count(resolution.retry_count);
                continue;
            }

            let decision_path = self.record_decision(&ctx, &resolution, &effects)?;
            info!(
                build_id = %ctx.build_id,
                status = %effects.status,
                summary = %effects.summary,
                "Build finished"
            );
            return Ok(log.finish(
                &ctx,
                effects.status,
                effects.summary.clone(),
                Some(&resolution),
                decision_path,
            ));
        }
    }

    /// Interpret planned steps until something decides the build.
    async fn run_attempt(
        &self,
        mut ctx: BuildContext,
        log: &mut BuildLog,
    ) -> (BuildContext, AttemptEnd) {
        let mut queue: VecDeque<NextStep> = self
            .planner
            .initial_steps(&ctx)
            .into_iter()
            .map(NextStep::from)
            .collect();

        while let Some(next) = queue.pop_front() {
            let step = match next {
                NextStep::Run { step } => step,
                NextStep::Finish { verdict } => {
                    let end = self.resolve(Classification::new("step-outcome", verdict), &ctx);
                    return (ctx, end);
                }
                NextStep::Defer { reason } => {
                    let end = self.resolve(
                        Classification::new("step-outcome", Decision::defer(reason)),
                        &ctx,
                    );
                    return (ctx, end);
                }
            };
            log.steps.push(step.name());

            match &step {
                Step::ValidateChange => {
                    if let Some(summary) = self.validate_change(&ctx).await {
                        let end = AttemptEnd::Aborted {
                            status: BuildStatus::Skipped,
                            summary,
                        };
                        return (ctx, end);
                    }
                    continue;
                }
                Step::Analyze { analysis } => {
                    let classification = self.classifier.classify(*analysis, &ctx);
                    let end = self.resolve(classification, &ctx);
                    return (ctx, end);
                }
                _ => {}
            }

            let outcome = match self.executor.execute(&step, &ctx).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(build_id = %ctx.build_id, step = %step, error = %err, "Step raised an exception");
                    let end = AttemptEnd::Aborted {
                        status: BuildStatus::Exception,
                        summary: format!("{step} raised an exception: {err:#}"),
                    };
                    return (ctx, end);
                }
            };
            obs::emit_step_finished(&ctx.build_id, &step.name(), outcome.status().as_str());

            ctx = record(ctx, &step, &outcome);
            let planned = self.planner.plan(&step, &outcome, &ctx);
            if !planned.is_empty() {
                let names: Vec<String> = planned.iter().map(next_step_name).collect();
                obs::emit_steps_planned(&ctx.build_id, &step.name(), &names);
            }
            for next in planned.into_iter().rev() {
                queue.push_front(next);
            }
        }

        let end = self.resolve(
            Classification::new(
                "steps-exhausted",
                Decision::defer("Build steps finished without a verdict"),
            ),
            &ctx,
        );
        (ctx, end)
    }

    fn resolve(&self, classification: Classification, ctx: &BuildContext) -> AttemptEnd {
        AttemptEnd::Resolved(self.retry.resolve(classification, ctx.retry_count))
    }

    /// `Some(summary)` when the change is no longer worth building. An
    /// unreachable review system lets the build continue.
    async fn validate_change(&self, ctx: &BuildContext) -> Option<String> {
        match self.collaborators.validator.status(&ctx.change).await {
            Ok(status) if status.is_stale() => {
                let summary = format!("{} {}", change_title(&ctx.change), stale_reason(status));
                info!(build_id = %ctx.build_id, "{summary}");
                Some(summary)
            }
            Ok(_) => None,
            Err(err) => {
                obs::emit_collaborator_error(&ctx.build_id, "change-validator", &err);
                None
            }
        }
    }

    fn record_decision(
        &self,
        ctx: &BuildContext,
        resolution: &Resolution,
        effects: &ExternalEffects,
    ) -> anyhow::Result<Option<PathBuf>> {
        let Some(dir) = &self.decision_dir else {
            return Ok(None);
        };
        let record = DecisionRecord {
            build_id: ctx.build_id.clone(),
            queue: ctx.queue.clone(),
            suite: ctx.suite,
            change: ctx.change.clone(),
            retry_count: resolution.retry_count,
            attempts: ctx.attempts().cloned().collect(),
            verdict: resolution.verdict.clone(),
            status: effects.status,
            summary: effects.summary.clone(),
            rule: resolution.rule.to_string(),
            recorded_at: Utc::now(),
        };
        let path = write_decision(&record, dir)
            .with_context(|| format!("failed to write decision log under {}", dir.display()))?;
        info!(build_id = %ctx.build_id, path = %path.display(), "Decision recorded");
        Ok(Some(path))
    }
}

/// Fold a step outcome into the build context.
fn record(ctx: BuildContext, step: &Step, outcome: &StepOutcome) -> BuildContext {
    match (step, outcome) {
        (Step::Compile { with_change, .. }, StepOutcome::Compile(compile)) => {
            ctx.with_compile(*with_change, compile.clone())
        }
        (Step::RunTests { .. }, StepOutcome::Tests(tests)) => ctx.with_outcome(tests.clone()),
        _ => ctx,
    }
}

fn next_step_name(next: &NextStep) -> String {
    match next {
        NextStep::Run { step } => step.name(),
        NextStep::Finish { verdict } => format!("finish:{verdict}"),
        NextStep::Defer { .. } => "defer".to_string(),
    }
}

/// "Patch 1234" or "Pull request 56".
fn change_title(change: &ChangeMetadata) -> String {
    match &change.change {
        ChangeId::Patch { patch_id, .. } => format!("Patch {patch_id}"),
        ChangeId::PullRequest { number, .. } => format!("Pull request {number}"),
    }
}

fn stale_reason(status: ChangeStatus) -> &'static str {
    match status {
        ChangeStatus::Open => "is open",
        ChangeStatus::Obsolete => "is obsolete",
        ChangeStatus::ReviewDenied => "has been marked r-",
        ChangeStatus::Closed => "is closed",
        ChangeStatus::Outdated => "has been updated since this build was queued",
    }
}
