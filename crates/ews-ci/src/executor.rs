//! The seam between the pipeline and whatever actually runs a step.

use async_trait::async_trait;
use ews_core::{BuildContext, Step, StepOutcome};

/// Runs one planned step.
///
/// A failing step is an `Ok` outcome with a failing status. `Err` is for
/// steps that could not be run at all (spawn failure, unreadable workdir)
/// and ends the build with an exception.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, step: &Step, ctx: &BuildContext) -> anyhow::Result<StepOutcome>;
}
