//! EWS Core Library
//!
//! Decides whether a change broke the build or its tests, from noisy
//! with-change and clean-tree runs:
//! - ChangeRelevanceFilter: does a diff touch what a queue tests?
//! - FailureClassifier: ordered rule tables over collected results
//! - RetryPolicy: bounded retries for ambiguous evidence
//! - StepPlanner: what to run after each step
//! - VerdictReporter: status, summary, notifications, commit-queue effects
//!
//! Nothing in this crate executes processes or talks to the network.

pub mod artifact;
pub mod classifier;
pub mod collaborators;
pub mod config;
pub mod domain;
pub mod error;
pub mod fakes;
pub mod notify;
pub mod obs;
pub mod planner;
pub mod relevance;
pub mod reporter;
pub mod retry;
pub mod telemetry;

pub use artifact::{read_decision, write_decision, DecisionRecord};
pub use classifier::{FailureClassifier, FailureSets};
pub use collaborators::{
    ChangeStatus, ChangeValidator, Collaborators, CommitQueueApi, NotificationSink,
};
pub use config::EwsConfig;
pub use domain::{
    did_command_time_out, Analysis, AttemptOutcome, BuildContext, BuildStatus, ChangeId,
    ChangeMetadata, Classification, CompileOutcome, Decision, NextStep, OperatorNote, ResultSet,
    ResultsFormat, RunAttempt, Step, StepOutcome, Suite, TestId, Verdict,
};
pub use error::{EwsError, Result};
pub use notify::{Audience, Notification};
pub use planner::StepPlanner;
pub use relevance::ChangeRelevanceFilter;
pub use reporter::{DispatchReport, ExternalEffects, VerdictReporter};
pub use retry::{Resolution, RetryCounter, RetryPolicy};

/// EWS core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
