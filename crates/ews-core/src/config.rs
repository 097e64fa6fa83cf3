//! Tunables for the verdict engine.
//!
//! Loaded from an optional TOML file, then overridden from `EWS_*`
//! environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{EwsError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EwsConfig {
    /// RetryPolicy ceiling. `0` means never retry.
    pub max_retry: u32,
    /// Largest with-change vs clean-tree failure-count gap that is still
    /// considered ambiguous when both runs hit the failure limit.
    pub failure_limit_gap: i64,
    /// How many test names appear in summaries before `...`.
    pub num_failures_to_display: usize,
    pub buildbot_url: String,
    pub results_db_url: String,
    pub relevance: RelevanceConfig,
    pub layout: LayoutConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceConfig {
    pub max_line_size: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub exit_after_failures: u32,
    pub red_tree_exit_after_failures: u32,
    pub repeat_each: u32,
    pub repeat_failures_timeout_secs: u64,
    pub repeat_failures_without_change_timeout_secs: u64,
}

impl Default for EwsConfig {
    fn default() -> Self {
        Self {
            max_retry: 3,
            failure_limit_gap: 5,
            num_failures_to_display: 10,
            buildbot_url: "https://ews-build.webkit.org/".to_string(),
            results_db_url: "https://results.webkit.org/".to_string(),
            relevance: RelevanceConfig::default(),
            layout: LayoutConfig::default(),
        }
    }
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            max_line_size: 250,
            timeout_secs: 30,
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            exit_after_failures: 30,
            red_tree_exit_after_failures: 500,
            repeat_each: 10,
            repeat_failures_timeout_secs: 18_000,
            repeat_failures_without_change_timeout_secs: 10_800,
        }
    }
}

impl RelevanceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl EwsConfig {
    /// Read a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: EwsConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `EWS_MAX_RETRY`, `EWS_FAILURE_LIMIT_GAP` and `EWS_BUILDBOT_URL`.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = var("EWS_MAX_RETRY") {
            self.max_retry = value
                .trim()
                .parse()
                .map_err(|_| EwsError::InvalidConfig(format!("EWS_MAX_RETRY='{value}'")))?;
        }
        if let Some(value) = var("EWS_FAILURE_LIMIT_GAP") {
            self.failure_limit_gap = value.trim().parse().map_err(|_| {
                EwsError::InvalidConfig(format!("EWS_FAILURE_LIMIT_GAP='{value}'"))
            })?;
        }
        if let Some(value) = var("EWS_BUILDBOT_URL") {
            self.buildbot_url = value;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_failures_to_display == 0 {
            return Err(EwsError::InvalidConfig(
                "num_failures_to_display must be at least 1".into(),
            ));
        }
        if self.relevance.max_line_size == 0 {
            return Err(EwsError::InvalidConfig(
                "relevance.max_line_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
