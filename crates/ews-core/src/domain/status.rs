use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Build/step status reported to the hosting CI framework.
///
/// `Retry` asks the framework to re-attempt the whole build and is never
/// a synonym for `Failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BuildStatus {
    Success,
    Warnings,
    Failure,
    Skipped,
    Exception,
    Retry,
}

impl BuildStatus {
    /// `Success` and `Warnings` both count as a passing run.
    pub fn is_success(self) -> bool {
        matches!(self, BuildStatus::Success | BuildStatus::Warnings)
    }

    /// Numeric result code used by the build master.
    pub fn code(self) -> i32 {
        match self {
            BuildStatus::Success => 0,
            BuildStatus::Warnings => 1,
            BuildStatus::Failure => 2,
            BuildStatus::Skipped => 3,
            BuildStatus::Exception => 4,
            BuildStatus::Retry => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildStatus::Success => "SUCCESS",
            BuildStatus::Warnings => "WARNINGS",
            BuildStatus::Failure => "FAILURE",
            BuildStatus::Skipped => "SKIPPED",
            BuildStatus::Exception => "EXCEPTION",
            BuildStatus::Retry => "RETRY",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = crate::EwsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SUCCESS" => Ok(BuildStatus::Success),
            "WARNINGS" => Ok(BuildStatus::Warnings),
            "FAILURE" => Ok(BuildStatus::Failure),
            "SKIPPED" => Ok(BuildStatus::Skipped),
            "EXCEPTION" => Ok(BuildStatus::Exception),
            "RETRY" => Ok(BuildStatus::Retry),
            other => Err(crate::EwsError::InvalidConfig(format!(
                "unknown build status '{other}'"
            ))),
        }
    }
}
