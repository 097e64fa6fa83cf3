//! VerdictReporter: maps a resolved verdict to what the outside world sees.
//!
//! [`VerdictReporter::report`] is pure and builds an [`ExternalEffects`]
//! value. [`VerdictReporter::dispatch`] delivers it through the
//! collaborators, degrading on every collaborator error.

use std::collections::BTreeSet;

use chrono::{Local, NaiveDate};
use serde::Serialize;
use tracing::{info, warn};

use crate::collaborators::Collaborators;
use crate::config::EwsConfig;
use crate::domain::results::{is_jsc_binary, TestId};
use crate::domain::{BuildContext, BuildStatus, OperatorNote, Step, Suite, Verdict};
use crate::notify::{plural, Composer, Notification};
use crate::obs;
use crate::retry::Resolution;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BugComment {
    pub bug_id: u64,
    pub text: String,
}

/// Everything a verdict causes outside the build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalEffects {
    pub status: BuildStatus,
    pub summary: String,
    pub notifications: Vec<Notification>,
    /// Posted before the commit-queue flag is revoked.
    pub bug_comment: Option<BugComment>,
    /// Patch whose commit-queue approval is revoked.
    pub revoke_commit_queue: Option<u64>,
    /// Retry realised through the parent build's scheduler.
    pub trigger: Option<Step>,
}

/// What [`VerdictReporter::dispatch`] managed to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub suppressed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct VerdictReporter {
    config: EwsConfig,
}

impl VerdictReporter {
    pub fn new(config: EwsConfig) -> Self {
        Self { config }
    }

    pub fn report(&self, resolution: &Resolution, ctx: &BuildContext) -> ExternalEffects {
        self.report_on(resolution, ctx, Local::now().date_naive())
    }

    /// Like [`report`](Self::report) with an explicit date for date-keyed
    /// notifications.
    pub fn report_on(
        &self,
        resolution: &Resolution,
        ctx: &BuildContext,
        today: NaiveDate,
    ) -> ExternalEffects {
        let composer = Composer::new(ctx, &self.config);
        let summary = self.summary(&resolution.verdict, ctx);
        let mut effects = ExternalEffects {
            status: BuildStatus::Success,
            summary,
            notifications: self.note_notifications(&resolution.notes, ctx, &composer, today),
            bug_comment: None,
            revoke_commit_queue: None,
            trigger: None,
        };

        match &resolution.verdict {
            Verdict::Pass | Verdict::PassWithPreexisting { .. } => {}
            Verdict::FailNew {
                failing,
                exceeded_limit,
            } => {
                effects.status = BuildStatus::Failure;
                let author_mail = if broke_the_build(ctx) {
                    let error_lines = ctx
                        .compile_with_change()
                        .map(|compile| compile.error_lines.as_slice())
                        .unwrap_or_default();
                    composer.new_build_failure(error_lines)
                } else {
                    composer.new_test_failures(failing, *exceeded_limit)
                };
                effects.notifications.extend(author_mail);
                if let Some(patch_id) = ctx.change.patch_id() {
                    effects.revoke_commit_queue = Some(patch_id);
                    if ctx.is_commit_queue() {
                        effects.bug_comment = ctx.change.bug_id().map(|bug_id| BugComment {
                            bug_id,
                            text: effects.summary.clone(),
                        });
                    }
                }
            }
            Verdict::RetryBuild { .. } => match &ctx.triggered_by {
                Some(parent) => {
                    let scheduler = ctx.scheduler.clone().unwrap_or_else(|| parent.clone());
                    effects.trigger = Some(Step::Trigger {
                        schedulers: vec![scheduler],
                        retry_count: resolution.retry_count.get(),
                    });
                }
                None => effects.status = BuildStatus::Retry,
            },
            Verdict::InfrastructureWarning { .. } => effects.status = BuildStatus::Warnings,
        }
        effects
    }

    fn note_notifications(
        &self,
        notes: &[OperatorNote],
        ctx: &BuildContext,
        composer: &Composer<'_>,
        today: NaiveDate,
    ) -> Vec<Notification> {
        let aggregate = ctx.suite == Suite::LayoutTestsRedTree;
        let limit = self.config.num_failures_to_display;
        let mut out = Vec::new();
        for note in notes {
            match note {
                OperatorNote::FlakyTests { tests } if aggregate => {
                    out.push(composer.flaky_failures_with_steps(tests));
                }
                OperatorNote::FlakyTests { tests } => {
                    out.extend(tests.keys().take(limit).map(|test| composer.flaky_test(test)));
                }
                OperatorNote::PreexistingFailures { tests } if aggregate => {
                    out.push(composer.preexistent_failures(tests));
                }
                OperatorNote::PreexistingFailures { tests } => {
                    out.extend(
                        tests
                            .iter()
                            .take(limit)
                            .map(|test| composer.preexisting_failure(test)),
                    );
                }
                OperatorNote::InfrastructureIssue { reason } => {
                    out.push(composer.infrastructure_issue(reason));
                }
                OperatorNote::BuildFailureOnTrunk { error_lines } => {
                    out.push(composer.build_failure_on_trunk(error_lines, today));
                }
            }
        }
        out
    }

    /// Human-readable build summary.
    pub fn summary(&self, verdict: &Verdict, ctx: &BuildContext) -> String {
        let noun = ctx.suite.failure_noun();
        match verdict {
            Verdict::Pass => ctx.suite.pass_message().to_string(),
            Verdict::PassWithPreexisting { failing, flaky } => {
                let mut parts = Vec::new();
                if !failing.is_empty() {
                    parts.push(format!(
                        "Found {} pre-existing {noun} failure{}: {}",
                        failing.len(),
                        plural(failing.len()),
                        self.list(failing.iter())
                    ));
                }
                if !flaky.is_empty() {
                    parts.push(format!(
                        "Found flaky {noun}{}: {}",
                        plural(flaky.len()),
                        self.list(flaky.iter())
                    ));
                }
                if parts.is_empty() {
                    ctx.suite.pass_message().to_string()
                } else {
                    parts.join(" ")
                }
            }
            Verdict::FailNew { .. } if broke_the_build(ctx) => match ctx.change.pr_number() {
                Some(number) => format!(
                    "Hash {} for PR {number} does not build",
                    ctx.change.short_hash().unwrap_or_default()
                ),
                None => format!("{} does not build", ctx.change.label()),
            },
            Verdict::FailNew { failing, .. } if failing.is_empty() => {
                "Found unexpected failure with change".to_string()
            }
            Verdict::FailNew { failing, .. } if ctx.suite == Suite::Jsc => self.jsc_summary(failing),
            Verdict::FailNew {
                failing,
                exceeded_limit,
            } => {
                let found = format!(
                    "{} new {noun} failure{}: {}",
                    failing.len(),
                    plural(failing.len()),
                    self.list(failing.iter())
                );
                if *exceeded_limit {
                    format!("Failure limit exceed. At least found {found}")
                } else {
                    format!("Found {found}")
                }
            }
            Verdict::RetryBuild { reason } | Verdict::InfrastructureWarning { reason } => {
                reason.clone()
            }
        }
    }

    fn jsc_summary(&self, failing: &BTreeSet<TestId>) -> String {
        let (binaries, stress): (Vec<&TestId>, Vec<&TestId>) =
            failing.iter().partition(|test| is_jsc_binary(test));
        let mut parts = Vec::new();
        if !binaries.is_empty() {
            parts.push(format!(
                "Found {} new JSC binary failure{}: {}",
                binaries.len(),
                plural(binaries.len()),
                self.list(binaries.iter().copied())
            ));
        }
        if !stress.is_empty() {
            parts.push(format!(
                "Found {} new JSC stress test failure{}: {}",
                stress.len(),
                plural(stress.len()),
                self.list(stress.iter().copied())
            ));
        }
        parts.join(", ")
    }

    /// Sorted input, truncated to the display limit with a trailing ` ...`.
    fn list<'a>(&self, tests: impl ExactSizeIterator<Item = &'a TestId>) -> String {
        let limit = self.config.num_failures_to_display;
        let truncated = tests.len() > limit;
        let mut shown = tests
            .take(limit)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        if truncated {
            shown.push_str(" ...");
        }
        shown
    }

    /// Deliver effects. Never fails: every collaborator error is logged and
    /// counted.
    pub async fn dispatch(
        &self,
        effects: &ExternalEffects,
        ctx: &BuildContext,
        collaborators: &Collaborators,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        if let Some(comment) = &effects.bug_comment {
            if let Err(err) = collaborators
                .commit_queue
                .comment_on_bug(comment.bug_id, &comment.text)
                .await
            {
                obs::emit_collaborator_error(&ctx.build_id, "bug-comment", &err);
            }
        }
        if let Some(patch_id) = effects.revoke_commit_queue {
            if let Err(err) = collaborators
                .commit_queue
                .revoke(patch_id, &effects.summary)
                .await
            {
                obs::emit_collaborator_error(&ctx.build_id, "commit-queue", &err);
            }
        }

        let mut stale: Option<bool> = None;
        for notification in &effects.notifications {
            if notification.is_for_author() {
                let is_stale = match stale {
                    Some(known) => known,
                    None => {
                        let known = self.change_is_stale(ctx, collaborators).await;
                        stale = Some(known);
                        known
                    }
                };
                if is_stale {
                    info!(
                        build_id = %ctx.build_id,
                        subject = %notification.subject,
                        "change is no longer current, not notifying author"
                    );
                    report.suppressed += 1;
                    continue;
                }
            }
            match collaborators.sink.send(notification).await {
                Ok(()) => report.sent += 1,
                Err(err) => {
                    obs::emit_collaborator_error(&ctx.build_id, "notification", &err);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// A failed lookup counts as current.
    async fn change_is_stale(&self, ctx: &BuildContext, collaborators: &Collaborators) -> bool {
        match collaborators.validator.status(&ctx.change).await {
            Ok(status) => status.is_stale(),
            Err(err) => {
                warn!(
                    build_id = %ctx.build_id,
                    error = %err,
                    "unable to check change status, notifying anyway"
                );
                false
            }
        }
    }
}

/// The with-change compile is on record and failed.
fn broke_the_build(ctx: &BuildContext) -> bool {
    ctx.compile_with_change()
        .is_some_and(|compile| !compile.status.is_success())
}

impl Default for VerdictReporter {
    fn default() -> Self {
        Self::new(EwsConfig::default())
    }
}
