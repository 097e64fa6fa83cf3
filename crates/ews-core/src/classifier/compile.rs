//! Compile analysis: did the change break the build, or is trunk broken?

use std::collections::BTreeSet;

use super::{evaluate, Rule, Ruling};
use crate::domain::verdict::{Classification, OperatorNote, Verdict};
use crate::domain::{BuildContext, ChangeMetadata, CompileOutcome};

pub(crate) struct CompileInputs<'a> {
    change: &'a ChangeMetadata,
    with_change: Option<&'a CompileOutcome>,
    without_change: Option<&'a CompileOutcome>,
}

fn built_with_change(inputs: &CompileInputs<'_>) -> Option<Ruling> {
    inputs
        .with_change
        .is_some_and(|compile| compile.status.is_success())
        .then(|| Ruling::new(Verdict::Pass))
}

/// Trunk does not build either, so the change cannot be judged.
fn trunk_broken(inputs: &CompileInputs<'_>) -> Option<Ruling> {
    let clean = inputs.without_change?;
    if clean.status.is_success() {
        return None;
    }
    Some(
        Ruling::defer(format!(
            "Unable to build WebKit without {}, retrying build",
            inputs.change.kind_noun()
        ))
        .note(OperatorNote::BuildFailureOnTrunk {
            error_lines: clean.error_lines.clone(),
        }),
    )
}

fn change_breaks_build(inputs: &CompileInputs<'_>) -> Option<Ruling> {
    inputs
        .without_change
        .is_some_and(|compile| compile.status.is_success())
        .then(|| Ruling::new(Verdict::fail_new(BTreeSet::new(), false)))
}

fn rules<'a>() -> [Rule<CompileInputs<'a>>; 3] {
    [
        Rule {
            name: "built-with-change",
            apply: built_with_change,
        },
        Rule {
            name: "trunk-broken",
            apply: trunk_broken,
        },
        Rule {
            name: "change-breaks-build",
            apply: change_breaks_build,
        },
    ]
}

/// Without both compiles on record the table falls through to a deferral.
pub fn classify(ctx: &BuildContext) -> Classification {
    let inputs = CompileInputs {
        change: &ctx.change,
        with_change: ctx.compile_with_change(),
        without_change: ctx.compile_without_change(),
    };
    evaluate(&rules(), &inputs)
}
