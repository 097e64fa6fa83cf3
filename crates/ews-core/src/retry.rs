//! Bounded retries for ambiguous classifications.
//!
//! Every deferral goes through [`RetryPolicy::resolve`]. Below the ceiling it
//! becomes a `RETRY_BUILD` with an incremented counter; at the ceiling it is
//! downgraded to an `INFRASTRUCTURE_WARNING`, never a failure.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::EwsConfig;
use crate::domain::verdict::{Classification, Decision, OperatorNote, Verdict};

/// Per-build-attempt retry counter. Starts at 0 for a fresh top-level build.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RetryCounter(u32);

impl RetryCounter {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RetryCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retry: u32,
}

/// A classification after the retry policy has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub verdict: Verdict,
    pub retry_count: RetryCounter,
    pub notes: Vec<OperatorNote>,
    pub rule: &'static str,
}

impl RetryPolicy {
    pub fn new(max_retry: u32) -> Self {
        Self { max_retry }
    }

    pub fn from_config(config: &EwsConfig) -> Self {
        Self::new(config.max_retry)
    }

    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }

    pub fn should_retry(&self, counter: RetryCounter) -> bool {
        counter.0 < self.max_retry
    }

    /// Counter after one more retry, saturating at the ceiling.
    pub fn next(&self, counter: RetryCounter) -> RetryCounter {
        RetryCounter(counter.0.saturating_add(1).min(self.max_retry))
    }

    /// Turn a classification into a terminal verdict for this attempt.
    pub fn resolve(&self, classification: Classification, counter: RetryCounter) -> Resolution {
        let Classification {
            decision,
            mut notes,
            rule,
        } = classification;

        match decision {
            Decision::Verdict(verdict) => Resolution {
                verdict,
                retry_count: counter,
                notes,
                rule,
            },
            Decision::Defer { reason } if self.should_retry(counter) => {
                let reason = format!(
                    "{reason}\nRetrying build [retry count is {} of {}]",
                    counter.0, self.max_retry
                );
                notes.push(OperatorNote::InfrastructureIssue {
                    reason: reason.clone(),
                });
                Resolution {
                    verdict: Verdict::RetryBuild { reason },
                    retry_count: self.next(counter),
                    notes,
                    rule,
                }
            }
            Decision::Defer { reason } => {
                let reason = format!(
                    "{reason}\nReached the maximum number of retries ({}). Unable to determine \
                     if change is bad or there is a pre-existent infrastructure issue.",
                    self.max_retry
                );
                notes.push(OperatorNote::InfrastructureIssue {
                    reason: reason.clone(),
                });
                Resolution {
                    verdict: Verdict::InfrastructureWarning { reason },
                    retry_count: counter,
                    notes,
                    rule,
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(EwsConfig::default().max_retry)
    }
}
