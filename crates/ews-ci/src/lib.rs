//! EWS CI - running a queue's build for one change
//!
//! Provides the step interpreter around `ews-core`:
//! - Turns planned steps into WebKit tool invocations
//! - Runs them under a wall-clock budget and parses their results
//! - Drives relevance, planning, classification, retries and reporting
//!   for one build

pub mod command;
pub mod executor;
pub mod pipeline;
pub mod shell;

// Re-export key types
pub use command::{CommandBuilder, StepCommand};
pub use executor::StepExecutor;
pub use pipeline::{BuildPipeline, PipelineResult};
pub use shell::ShellExecutor;
