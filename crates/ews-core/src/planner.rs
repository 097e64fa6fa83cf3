//! StepPlanner: what to run next, given the step that just finished.
//!
//! The planner never executes anything. It returns an ordered list of
//! [`NextStep`]s that the pipeline pushes to the front of its queue. Clean-tree
//! runs are only planned after a with-change run failed, and every remedial
//! rebuild is preceded by a change validation.

use crate::config::EwsConfig;
use crate::domain::{
    Analysis, BuildContext, NextStep, RunAttempt, Step, StepOutcome, Suite, Verdict,
};
use crate::retry::RetryPolicy;

/// Platforms that install their own dependencies before compiling.
const DEPENDENCY_PLATFORMS: [&str; 2] = ["gtk", "wpe"];

#[derive(Debug, Clone, Copy)]
pub struct StepPlanner {
    retry: RetryPolicy,
}

impl StepPlanner {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    pub fn from_config(config: &EwsConfig) -> Self {
        Self::new(RetryPolicy::from_config(config))
    }

    /// Steps every build of this suite starts with.
    pub fn initial_steps(&self, ctx: &BuildContext) -> Vec<Step> {
        let mut steps = vec![Step::ValidateChange];
        match ctx.suite {
            Suite::Compile => {
                steps.extend(install_dependencies(ctx));
                steps.push(Step::compile_with_change());
            }
            _ => {
                steps.push(Step::KillOldProcesses);
                steps.push(Step::run(RunAttempt::FirstWithChange));
            }
        }
        steps
    }

    pub fn plan(&self, step: &Step, outcome: &StepOutcome, ctx: &BuildContext) -> Vec<NextStep> {
        match (step, outcome) {
            (
                Step::Compile {
                    with_change: true, ..
                },
                _,
            ) => self.after_compile(outcome, ctx),
            (
                Step::Compile {
                    with_change: false,
                    retry_build_on_failure: true,
                },
                _,
            ) if !outcome.status().is_success() => vec![NextStep::Defer {
                reason: format!(
                    "Unable to build WebKit without {}, retrying build",
                    ctx.change.kind_noun()
                ),
            }],
            (Step::KillOldProcesses, _) if !outcome.status().is_success() => vec![NextStep::Defer {
                reason: "Failed to kill old processes, retrying build".to_string(),
            }],
            (Step::RunTests { attempt }, StepOutcome::Tests(_)) => match ctx.suite {
                Suite::LayoutTests => self.after_layout(*attempt, outcome, ctx),
                Suite::LayoutTestsRedTree => self.after_red_tree(*attempt, outcome, ctx),
                Suite::ApiTests => self.after_api_tests(*attempt, outcome, ctx),
                Suite::Jsc => self.after_jsc(*attempt, outcome, ctx),
                Suite::Compile => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    fn after_compile(&self, outcome: &StepOutcome, ctx: &BuildContext) -> Vec<NextStep> {
        if outcome.status().is_success() {
            let mut next: Vec<NextStep> = Vec::new();
            if ctx.suite == Suite::Compile && (!ctx.triggers.is_empty() || !ctx.skip_upload) {
                next.extend(
                    [
                        Step::ArchiveBuiltProduct,
                        Step::UploadBuiltProduct,
                        Step::TransferToS3,
                    ]
                    .map(NextStep::from),
                );
                if !ctx.triggers.is_empty() {
                    next.push(
                        Step::Trigger {
                            schedulers: ctx.triggers.clone(),
                            retry_count: ctx.retry_count.get(),
                        }
                        .into(),
                    );
                }
            }
            next.push(NextStep::Finish {
                verdict: Verdict::Pass,
            });
            return next;
        }
        let mut steps = vec![Step::ValidateChange, revert(ctx)];
        steps.extend(install_dependencies(ctx));
        steps.push(Step::compile_without_change(false));
        steps.push(Step::analyze(Analysis::Compile));
        into_next(steps)
    }

    fn after_layout(
        &self,
        attempt: RunAttempt,
        outcome: &StepOutcome,
        ctx: &BuildContext,
    ) -> Vec<NextStep> {
        let passed = outcome.status().is_success();
        match attempt {
            RunAttempt::FirstWithChange if passed => pass(),
            RunAttempt::FirstWithChange => {
                let mut steps = results_steps(None);
                steps.extend([
                    Step::ValidateChange,
                    Step::KillOldProcesses,
                    Step::run(RunAttempt::SecondWithChange),
                ]);
                into_next(steps)
            }
            RunAttempt::SecondWithChange if passed => into_next(vec![Step::analyze(Analysis::Tests)]),
            RunAttempt::SecondWithChange => {
                let mut steps = results_steps(Some("rerun"));
                steps.extend(clean_tree_rebuild(ctx));
                steps.push(Step::KillOldProcesses);
                steps.push(Step::run(RunAttempt::WithoutChange));
                into_next(steps)
            }
            RunAttempt::WithoutChange => analyze_after(results_steps(Some("clean-tree"))),
            _ => Vec::new(),
        }
    }

    fn after_red_tree(
        &self,
        attempt: RunAttempt,
        outcome: &StepOutcome,
        ctx: &BuildContext,
    ) -> Vec<NextStep> {
        let StepOutcome::Tests(tests) = outcome else {
            return Vec::new();
        };
        match attempt {
            RunAttempt::FirstWithChange if tests.status.is_success() => pass(),
            RunAttempt::FirstWithChange if !tests.failing_tests().is_empty() => {
                let mut steps = results_steps(None);
                steps.extend([
                    Step::ValidateChange,
                    Step::KillOldProcesses,
                    Step::run(RunAttempt::RepeatedFailuresWithChange),
                ]);
                into_next(steps)
            }
            RunAttempt::FirstWithChange
                if !tests.flaky_tests().is_empty() || self.retry.should_retry(ctx.retry_count) =>
            {
                analyze_after(results_steps(None))
            }
            // Last retry with nothing listed: run the clean tree to tell a
            // broken harness from a broken change.
            RunAttempt::FirstWithChange => {
                let mut steps = results_steps(None);
                steps.extend(clean_tree_rebuild(ctx));
                steps.push(Step::KillOldProcesses);
                steps.push(Step::run(RunAttempt::WithoutChange));
                into_next(steps)
            }
            RunAttempt::RepeatedFailuresWithChange
                if !tests.failing_tests().is_empty() || tests.timed_out =>
            {
                let mut steps = results_steps(Some("repeat-failures"));
                steps.extend(clean_tree_rebuild(ctx));
                steps.push(Step::KillOldProcesses);
                steps.push(Step::run(RunAttempt::RepeatedFailuresWithoutChange));
                into_next(steps)
            }
            RunAttempt::RepeatedFailuresWithChange => {
                analyze_after(results_steps(Some("repeat-failures")))
            }
            RunAttempt::RepeatedFailuresWithoutChange => {
                analyze_after(results_steps(Some("repeat-failures-without-change")))
            }
            RunAttempt::WithoutChange => analyze_after(results_steps(Some("clean-tree"))),
            RunAttempt::SecondWithChange => Vec::new(),
        }
    }

    fn after_api_tests(
        &self,
        attempt: RunAttempt,
        outcome: &StepOutcome,
        ctx: &BuildContext,
    ) -> Vec<NextStep> {
        let passed = outcome.status().is_success();
        match attempt {
            RunAttempt::FirstWithChange | RunAttempt::SecondWithChange if passed => pass(),
            RunAttempt::FirstWithChange => into_next(vec![
                Step::ValidateChange,
                Step::KillOldProcesses,
                Step::run(RunAttempt::SecondWithChange),
            ]),
            RunAttempt::SecondWithChange => {
                let mut steps = clean_tree_rebuild(ctx);
                steps.push(Step::KillOldProcesses);
                steps.push(Step::run(RunAttempt::WithoutChange));
                into_next(steps)
            }
            RunAttempt::WithoutChange => into_next(vec![Step::analyze(Analysis::Tests)]),
            _ => Vec::new(),
        }
    }

    fn after_jsc(
        &self,
        attempt: RunAttempt,
        outcome: &StepOutcome,
        ctx: &BuildContext,
    ) -> Vec<NextStep> {
        match attempt {
            RunAttempt::FirstWithChange if outcome.status().is_success() => pass(),
            RunAttempt::FirstWithChange => {
                let mut steps = clean_tree_rebuild(ctx);
                steps.push(Step::KillOldProcesses);
                steps.push(Step::run(RunAttempt::WithoutChange));
                into_next(steps)
            }
            RunAttempt::WithoutChange => into_next(vec![Step::analyze(Analysis::Tests)]),
            _ => Vec::new(),
        }
    }
}

impl Default for StepPlanner {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

fn pass() -> Vec<NextStep> {
    vec![NextStep::Finish {
        verdict: Verdict::Pass,
    }]
}

fn into_next(steps: Vec<Step>) -> Vec<NextStep> {
    steps.into_iter().map(NextStep::from).collect()
}

fn analyze_after(mut steps: Vec<Step>) -> Vec<NextStep> {
    steps.push(Step::analyze(Analysis::Tests));
    into_next(steps)
}

fn results_steps(identifier: Option<&str>) -> Vec<Step> {
    vec![
        Step::ArchiveTestResults,
        Step::upload_results(identifier),
        Step::extract_results(identifier),
    ]
}

fn revert(ctx: &BuildContext) -> Step {
    if ctx.change.is_patch() {
        Step::UnApplyPatch
    } else {
        Step::RevertPullRequestChanges
    }
}

fn install_dependencies(ctx: &BuildContext) -> Option<Step> {
    let platform = ctx.platform.as_deref()?;
    DEPENDENCY_PLATFORMS
        .contains(&platform)
        .then(|| Step::InstallDependencies {
            platform: platform.to_string(),
        })
}

/// Validate, revert the change, rebuild trunk and validate again before the
/// expensive clean-tree run.
fn clean_tree_rebuild(ctx: &BuildContext) -> Vec<Step> {
    let mut steps = vec![Step::ValidateChange, revert(ctx)];
    steps.extend(install_dependencies(ctx));
    steps.push(Step::compile_without_change(true));
    steps.push(Step::ValidateChange);
    steps
}
