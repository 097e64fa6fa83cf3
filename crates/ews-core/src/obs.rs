//! Structured observability hooks for the build lifecycle.
//!
//! This module provides:
//! - Build-scoped tracing spans via the `BuildSpan` RAII guard
//! - Emission functions for key events: build start, step finish, planning,
//!   retry scheduling and the final verdict
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`).

use tracing::info;

/// RAII guard that enters a build-scoped tracing span.
///
/// # Example
///
/// ```ignore
/// let _span = BuildSpan::enter("build-123", "mac-wk2");
/// // every event below carries build_id and queue
/// ```
pub struct BuildSpan {
    _span: tracing::span::EnteredSpan,
}

impl BuildSpan {
    pub fn enter(build_id: &str, queue: &str) -> Self {
        Self {
            _span: build_span(build_id, queue).entered(),
        }
    }
}

/// The build span itself, for `tracing::Instrument` in async code where an
/// entered guard cannot be held across awaits.
pub fn build_span(build_id: &str, queue: &str) -> tracing::Span {
    tracing::info_span!("ews.build", build_id = %build_id, queue = %queue)
}

pub fn emit_build_started(build_id: &str, queue: &str, change: &str, retry_count: u32) {
    info!(
        event = "build.started",
        build_id = %build_id,
        queue = %queue,
        change = %change,
        retry_count = retry_count,
    );
}

/// Emit event: a step finished with the given status.
pub fn emit_step_finished(build_id: &str, step: &str, status: &str) {
    info!(event = "step.finished", build_id = %build_id, step = %step, status = %status);
}

/// Emit event: the planner queued `count` steps after `step`.
pub fn emit_steps_planned(build_id: &str, step: &str, planned: &[String]) {
    info!(
        event = "steps.planned",
        build_id = %build_id,
        step = %step,
        count = planned.len(),
        planned = %planned.join(","),
    );
}

pub fn emit_retry_scheduled(build_id: &str, retry_count: u32, max_retry: u32, reason: &str) {
    info!(
        event = "retry.scheduled",
        build_id = %build_id,
        retry_count = retry_count,
        max_retry = max_retry,
        reason = %reason,
    );
}

/// Emit event: terminal verdict with the rule that produced it.
pub fn emit_verdict(build_id: &str, verdict: &str, status: &str, rule: &str) {
    info!(
        event = "build.verdict",
        build_id = %build_id,
        verdict = %verdict,
        status = %status,
        rule = %rule,
    );
}

/// Emit event: a collaborator call failed and the feature degraded (warning level).
pub fn emit_collaborator_error(build_id: &str, collaborator: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(
        event = "collaborator.error",
        build_id = %build_id,
        collaborator = %collaborator,
        error = %error,
    );
}
