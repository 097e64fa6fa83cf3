//! Immutable per-build state threaded through the pipeline.
//!
//! Nothing mutates a `BuildContext` in place: every update consumes the
//! value and returns a new one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::attempt::{AttemptOutcome, CompileOutcome, RunAttempt};
use super::change::ChangeMetadata;
use super::suite::Suite;
use crate::retry::RetryCounter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContext {
    pub build_id: String,
    /// Builder (queue) name.
    pub queue: String,
    #[serde(default)]
    pub worker: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    pub suite: Suite,
    pub change: ChangeMetadata,
    #[serde(default)]
    pub retry_count: RetryCounter,
    /// Parent scheduler that triggered this build, if any.
    #[serde(default)]
    pub triggered_by: Option<String>,
    /// Scheduler of this queue, passed back to the parent on retry.
    #[serde(default)]
    pub scheduler: Option<String>,
    /// Downstream schedulers to trigger after a successful build.
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default)]
    pub skip_upload: bool,
    #[serde(default)]
    attempts: BTreeMap<RunAttempt, AttemptOutcome>,
    #[serde(default)]
    compile_with_change: Option<CompileOutcome>,
    #[serde(default)]
    compile_without_change: Option<CompileOutcome>,
}

impl BuildContext {
    pub fn new(
        build_id: impl Into<String>,
        queue: impl Into<String>,
        suite: Suite,
        change: ChangeMetadata,
    ) -> Self {
        Self {
            build_id: build_id.into(),
            queue: queue.into(),
            worker: None,
            platform: None,
            suite,
            change,
            retry_count: RetryCounter::default(),
            triggered_by: None,
            scheduler: None,
            triggers: Vec::new(),
            skip_upload: true,
            attempts: BTreeMap::new(),
            compile_with_change: None,
            compile_without_change: None,
        }
    }

    pub fn with_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_triggered_by(mut self, parent: impl Into<String>, scheduler: impl Into<String>) -> Self {
        self.triggered_by = Some(parent.into());
        self.scheduler = Some(scheduler.into());
        self
    }

    pub fn with_triggers(mut self, triggers: Vec<String>) -> Self {
        self.triggers = triggers;
        self
    }

    pub fn with_skip_upload(mut self, skip_upload: bool) -> Self {
        self.skip_upload = skip_upload;
        self
    }

    pub fn with_retry_count(mut self, retry_count: RetryCounter) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Record an attempt's outcome. A later outcome for the same attempt
    /// replaces the earlier one.
    pub fn with_outcome(mut self, outcome: AttemptOutcome) -> Self {
        self.attempts.insert(outcome.attempt, outcome);
        self
    }

    pub fn with_compile(mut self, with_change: bool, outcome: CompileOutcome) -> Self {
        if with_change {
            self.compile_with_change = Some(outcome);
        } else {
            self.compile_without_change = Some(outcome);
        }
        self
    }

    /// State for restarting the with-change sequence: recorded outcomes are
    /// dropped, identity and retry count are kept.
    pub fn fresh_attempt(mut self) -> Self {
        self.attempts.clear();
        self.compile_with_change = None;
        self.compile_without_change = None;
        self
    }

    pub fn attempt(&self, attempt: RunAttempt) -> Option<&AttemptOutcome> {
        self.attempts.get(&attempt)
    }

    pub fn attempts(&self) -> impl Iterator<Item = &AttemptOutcome> {
        self.attempts.values()
    }

    pub fn compile_with_change(&self) -> Option<&CompileOutcome> {
        self.compile_with_change.as_ref()
    }

    pub fn compile_without_change(&self) -> Option<&CompileOutcome> {
        self.compile_without_change.as_ref()
    }

    /// Builder names are compared case-insensitively.
    pub fn is_commit_queue(&self) -> bool {
        self.queue.eq_ignore_ascii_case("commit-queue")
    }
}
