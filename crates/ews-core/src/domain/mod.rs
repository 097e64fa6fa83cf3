//! Domain types shared by the classifier, planner and reporter.

pub mod attempt;
pub mod change;
pub mod context;
pub mod results;
pub mod status;
pub mod step;
pub mod suite;
pub mod verdict;

pub use attempt::{did_command_time_out, AttemptOutcome, CompileOutcome, RunAttempt};
pub use change::{ChangeId, ChangeMetadata};
pub use context::BuildContext;
pub use results::{ResultSet, ResultsFormat, TestId};
pub use status::BuildStatus;
pub use step::{Analysis, NextStep, Step, StepOutcome};
pub use suite::Suite;
pub use verdict::{Classification, Decision, OperatorNote, Verdict};
