use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::results::ResultsFormat;

/// The kind of work a queue does for a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Suite {
    /// Build only.
    Compile,
    /// JavaScriptCore stress tests plus the test binaries.
    Jsc,
    /// Layout tests, expecting a green baseline.
    LayoutTests,
    /// Layout tests tolerant of a non-green baseline.
    LayoutTestsRedTree,
    ApiTests,
}

impl Suite {
    pub fn as_str(self) -> &'static str {
        match self {
            Suite::Compile => "compile",
            Suite::Jsc => "jsc",
            Suite::LayoutTests => "layout",
            Suite::LayoutTestsRedTree => "red-tree",
            Suite::ApiTests => "api",
        }
    }

    /// Suite name used by the results database for history links.
    pub fn history_suite(self) -> Option<&'static str> {
        match self {
            Suite::Compile => None,
            Suite::Jsc => Some("javascriptcore-tests"),
            Suite::LayoutTests | Suite::LayoutTestsRedTree => Some("layout-tests"),
            Suite::ApiTests => Some("api-tests"),
        }
    }

    pub fn pass_message(self) -> &'static str {
        match self {
            Suite::Compile => "Compiled WebKit",
            Suite::Jsc => "Passed JSC tests",
            Suite::LayoutTests | Suite::LayoutTestsRedTree => "Passed layout tests",
            Suite::ApiTests => "Passed API tests",
        }
    }

    /// Noun used in "Found N new ... failure(s)".
    pub fn failure_noun(self) -> &'static str {
        match self {
            Suite::ApiTests => "API test",
            Suite::Jsc => "JSC test",
            _ => "test",
        }
    }

    pub fn results_format(self) -> Option<ResultsFormat> {
        match self {
            Suite::Compile => None,
            Suite::Jsc => Some(ResultsFormat::Jsc),
            Suite::LayoutTests | Suite::LayoutTestsRedTree => Some(ResultsFormat::Layout),
            Suite::ApiTests => Some(ResultsFormat::ApiTests),
        }
    }

    pub fn is_layout(self) -> bool {
        matches!(self, Suite::LayoutTests | Suite::LayoutTestsRedTree)
    }

    /// Whether a second with-change run is part of the sequence.
    pub fn reruns_with_change(self) -> bool {
        matches!(self, Suite::LayoutTests | Suite::ApiTests)
    }
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Suite {
    type Err = crate::EwsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compile" => Ok(Suite::Compile),
            "jsc" => Ok(Suite::Jsc),
            "layout" => Ok(Suite::LayoutTests),
            "red-tree" => Ok(Suite::LayoutTestsRedTree),
            "api" => Ok(Suite::ApiTests),
            other => Err(crate::EwsError::InvalidConfig(format!(
                "unknown suite '{other}'"
            ))),
        }
    }
}
