//! Outcome of a single test run, parsed from the runner's structured output.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::{EwsError, Result};

/// Opaque test identifier (a path for layout tests, a name otherwise).
pub type TestId = String;

/// Binaries reported by the JSC runner as pass/fail booleans.
pub const JSC_BINARIES: &[(&str, &str)] = &[
    ("allMasmTestsPassed", "testmasm"),
    ("allAirTestsPassed", "testair"),
    ("allB3TestsPassed", "testb3"),
    ("allDFGTestsPassed", "testdfg"),
    ("allApiTestsPassed", "testapi"),
];

/// One attempt's failing and flaky tests.
///
/// `failing_tests` and `flaky_tests` are always disjoint. When
/// `exceeded_failure_limit` is set the runner stopped early and the failing
/// set is only a lower bound.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "GenericPayload")]
pub struct ResultSet {
    failing_tests: BTreeSet<TestId>,
    flaky_tests: BTreeSet<TestId>,
    exceeded_failure_limit: bool,
}

/// Payload shapes understood by [`ResultSet::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultsFormat {
    /// `{failing_tests, flaky_tests, exceeded_failure_limit}`
    Generic,
    /// run-webkit-tests `full_results.json`, optionally JSONP wrapped.
    Layout,
    /// run-api-tests JSON: `Failed` / `Timedout` / `Crashed`.
    ApiTests,
    /// run-javascriptcore-tests JSON.
    Jsc,
}

#[derive(Deserialize)]
struct GenericPayload {
    #[serde(default)]
    failing_tests: Vec<TestId>,
    #[serde(default)]
    flaky_tests: Vec<TestId>,
    #[serde(default)]
    exceeded_failure_limit: bool,
}

impl From<GenericPayload> for ResultSet {
    fn from(raw: GenericPayload) -> Self {
        ResultSet::new(raw.failing_tests, raw.flaky_tests, raw.exceeded_failure_limit)
    }
}

impl ResultSet {
    /// Build a result set. A test listed as both failing and flaky is kept
    /// as failing.
    pub fn new<F, K>(failing: F, flaky: K, exceeded_failure_limit: bool) -> Self
    where
        F: IntoIterator,
        F::Item: Into<TestId>,
        K: IntoIterator,
        K::Item: Into<TestId>,
    {
        let failing_tests: BTreeSet<TestId> = failing.into_iter().map(Into::into).collect();
        let flaky_tests = flaky
            .into_iter()
            .map(Into::into)
            .filter(|t| !failing_tests.contains(t))
            .collect();
        Self {
            failing_tests,
            flaky_tests,
            exceeded_failure_limit,
        }
    }

    pub fn failing<F>(failing: F) -> Self
    where
        F: IntoIterator,
        F::Item: Into<TestId>,
    {
        Self::new(failing, Vec::<TestId>::new(), false)
    }

    pub fn failing_tests(&self) -> &BTreeSet<TestId> {
        &self.failing_tests
    }

    pub fn flaky_tests(&self) -> &BTreeSet<TestId> {
        &self.flaky_tests
    }

    pub fn exceeded_failure_limit(&self) -> bool {
        self.exceeded_failure_limit
    }

    /// No failing and no flaky tests.
    pub fn is_empty(&self) -> bool {
        self.failing_tests.is_empty() && self.flaky_tests.is_empty()
    }

    /// Parse a runner payload. Errors are [`EwsError::MalformedResults`].
    pub fn parse(format: ResultsFormat, raw: &str) -> Result<Self> {
        match format {
            ResultsFormat::Generic => serde_json::from_str(raw.trim()).map_err(malformed),
            ResultsFormat::Layout => parse_layout(raw),
            ResultsFormat::ApiTests => parse_api_tests(raw),
            ResultsFormat::Jsc => parse_jsc(raw),
        }
    }

    /// Like [`ResultSet::parse`], but a malformed payload is logged and
    /// reported as "no results".
    pub fn parse_lenient(format: ResultsFormat, raw: &str) -> Option<Self> {
        match Self::parse(format, raw) {
            Ok(results) => Some(results),
            Err(err) => {
                warn!(format = ?format, error = %err, "unable to parse test results");
                None
            }
        }
    }
}

fn malformed(err: impl std::fmt::Display) -> EwsError {
    EwsError::MalformedResults(err.to_string())
}

fn parse_object(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw.trim()).map_err(malformed)? {
        Value::Object(map) => Ok(map),
        other => Err(malformed(format!("expected a JSON object, got {other}"))),
    }
}

fn parse_layout(raw: &str) -> Result<ResultSet> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("ADD_RESULTS(")
        .and_then(|rest| rest.strip_suffix(");"))
        .unwrap_or(trimmed);
    let root = parse_object(body)?;
    let tests = match root.get("tests") {
        Some(Value::Object(tests)) => tests,
        Some(_) => return Err(malformed("'tests' is not an object")),
        None => return Err(malformed("missing 'tests'")),
    };

    let mut failing = Vec::new();
    let mut flaky = Vec::new();
    collect_layout_leaves("", tests, &mut failing, &mut flaky);
    let interrupted = root
        .get("interrupted")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Ok(ResultSet::new(failing, flaky, interrupted))
}

fn collect_layout_leaves(
    prefix: &str,
    node: &Map<String, Value>,
    failing: &mut Vec<TestId>,
    flaky: &mut Vec<TestId>,
) {
    for (name, child) in node {
        let Value::Object(child) = child else {
            continue;
        };
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        if child.contains_key("actual") {
            match child.get("report").and_then(Value::as_str) {
                Some("REGRESSION") => failing.push(path),
                Some("FLAKY") => flaky.push(path),
                _ => {}
            }
        } else {
            collect_layout_leaves(&path, child, failing, flaky);
        }
    }
}

fn parse_api_tests(raw: &str) -> Result<ResultSet> {
    let root = parse_object(raw)?;
    let mut failing = Vec::new();
    for key in ["Timedout", "Crashed", "Failed"] {
        let Some(entries) = root.get(key) else {
            continue;
        };
        let entries = entries
            .as_array()
            .ok_or_else(|| malformed(format!("'{key}' is not a list")))?;
        for entry in entries {
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| malformed(format!("entry in '{key}' has no name")))?;
            failing.push(name.to_string());
        }
    }
    Ok(ResultSet::new(failing, Vec::<TestId>::new(), false))
}

fn parse_jsc(raw: &str) -> Result<ResultSet> {
    let root = parse_object(raw)?;
    let mut failing: Vec<TestId> = JSC_BINARIES
        .iter()
        .filter(|(key, _)| root.get(*key).and_then(Value::as_bool) == Some(false))
        .map(|(_, binary)| binary.to_string())
        .collect();
    failing.extend(names_of(root.get("stressTestFailures"))?);
    let flaky = names_of(root.get("flakyAndPassed"))?;
    Ok(ResultSet::new(failing, flaky, false))
}

/// Test names from either a list of strings or the keys of an object.
fn names_of(value: Option<&Value>) -> Result<Vec<TestId>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Object(map)) => Ok(map.keys().cloned().collect()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| malformed(format!("non-string test name {item}")))
            })
            .collect(),
        Some(other) => Err(malformed(format!("unexpected test list {other}"))),
    }
}

/// Whether `test` names one of the JSC test binaries rather than a stress test.
pub fn is_jsc_binary(test: &str) -> bool {
    JSC_BINARIES.iter().any(|(_, binary)| *binary == test)
}
