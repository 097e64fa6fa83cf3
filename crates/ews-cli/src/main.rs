//! EWS - Early Warning System verdict engine CLI
//!
//! The `ews` command runs the verdict engine outside the build master.
//!
//! ## Commands
//!
//! - `relevance`: does a diff touch what a queue tests?
//! - `modified-tests`: layout tests added or changed by a diff
//! - `classify`: verdict for a set of collected results
//! - `report`: status, summary and notifications for a verdict (dry run)
//! - `run`: one full build in a local WebKit checkout

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing::{info, Level};

use ews_ci::{BuildPipeline, CommandBuilder, ShellExecutor};
use ews_core::obs::BuildSpan;
use ews_core::relevance::find_modified_layout_tests;
use ews_core::{
    AttemptOutcome, BuildContext, BuildStatus, ChangeMetadata, ChangeRelevanceFilter,
    Collaborators, EwsConfig, FailureClassifier, Resolution, ResultSet, RetryCounter,
    RetryPolicy, RunAttempt, Suite, Verdict, VerdictReporter,
};

#[derive(Parser)]
#[command(name = "ews")]
#[command(author = "EWS Maintainers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Early Warning System change verdict engine", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file (defaults apply when omitted)
    #[arg(long, global = true, env = "EWS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a diff is relevant to a queue (exit code 1 if not)
    Relevance {
        /// Queue (builder) name
        #[arg(short, long)]
        queue: String,

        /// Unified diff of the change
        #[arg(short, long)]
        diff: PathBuf,
    },

    /// List layout tests added or modified by a diff
    ModifiedTests {
        #[arg(short, long)]
        diff: PathBuf,
    },

    /// Classify collected results and print the verdict as JSON
    Classify {
        /// layout, red-tree, api, jsc or compile
        #[arg(short, long)]
        suite: Suite,

        /// Results of the first with-change run
        #[arg(long)]
        first: PathBuf,

        /// Results of the second with-change run
        #[arg(long)]
        second: Option<PathBuf>,

        /// Results of the clean-tree run
        #[arg(long)]
        clean: Option<PathBuf>,

        /// Status of the clean-tree run (derived from its results if omitted)
        #[arg(long)]
        clean_status: Option<BuildStatus>,

        /// Results of the targeted repeat with the change (red-tree)
        #[arg(long)]
        repeat: Option<PathBuf>,

        /// Results of the targeted repeat without the change (red-tree)
        #[arg(long)]
        repeat_clean: Option<PathBuf>,

        /// Retries already spent on this change
        #[arg(long, default_value = "0")]
        retry_count: u32,
    },

    /// Print the effects of a verdict as JSON without delivering anything
    Report {
        /// Verdict JSON, as printed by `classify`
        #[arg(long)]
        verdict: PathBuf,

        /// Change metadata JSON
        #[arg(long)]
        change: PathBuf,

        #[arg(short, long, default_value = "cli")]
        queue: String,

        #[arg(short, long, default_value = "layout")]
        suite: Suite,

        #[arg(long, default_value = "0")]
        retry_count: u32,
    },

    /// Run one build of a queue for a change in a local checkout
    Run {
        #[arg(short, long)]
        queue: String,

        #[arg(short, long)]
        suite: Suite,

        /// Change metadata JSON
        #[arg(long)]
        change: PathBuf,

        /// Unified diff of the change
        #[arg(short, long)]
        diff: PathBuf,

        /// WebKit checkout to build in
        #[arg(short, long, default_value = ".")]
        workdir: PathBuf,

        /// Write the final decision under this directory
        #[arg(long)]
        decision_dir: Option<PathBuf>,

        /// Build identifier (random when omitted)
        #[arg(long)]
        build_id: Option<String>,

        /// Platform, e.g. mac, gtk or wpe
        #[arg(long)]
        platform: Option<String>,

        /// Build configuration passed to the WebKit scripts
        #[arg(long, default_value = "release")]
        configuration: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    ews_core::telemetry::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Relevance { queue, diff } => cmd_relevance(&config, &queue, &diff),
        Commands::ModifiedTests { diff } => cmd_modified_tests(&diff),
        Commands::Classify {
            suite,
            first,
            second,
            clean,
            clean_status,
            repeat,
            repeat_clean,
            retry_count,
        } => {
            let runs = ClassifyRuns {
                first,
                second,
                clean,
                clean_status,
                repeat,
                repeat_clean,
            };
            cmd_classify(&config, suite, &runs, retry_count)
        }
        Commands::Report {
            verdict,
            change,
            queue,
            suite,
            retry_count,
        } => cmd_report(&config, &verdict, &change, &queue, suite, retry_count),
        Commands::Run {
            queue,
            suite,
            change,
            diff,
            workdir,
            decision_dir,
            build_id,
            platform,
            configuration,
        } => {
            let change: ChangeMetadata = read_json(&change)?;
            let build_id = build_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let mut ctx = BuildContext::new(build_id, queue, suite, change);
            if let Some(platform) = platform {
                ctx = ctx.with_platform(platform);
            }
            cmd_run(
                &config,
                ctx,
                &diff,
                &workdir,
                decision_dir.as_deref(),
                &configuration,
            )
            .await
        }
    }
}

/// File, then `EWS_*` environment overrides.
fn load_config(path: Option<&Path>) -> Result<EwsConfig> {
    let config = match path {
        Some(path) => EwsConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EwsConfig::default(),
    };
    config
        .apply_env()
        .context("Invalid EWS_* environment override")
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_relevance(config: &EwsConfig, queue: &str, diff: &Path) -> Result<ExitCode> {
    let diff = std::fs::read(diff).with_context(|| format!("Failed to read {}", diff.display()))?;
    let filter = ChangeRelevanceFilter::new(&config.relevance)?;
    if filter.is_diff_relevant(&diff, queue) {
        println!("relevant");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("not relevant");
        Ok(ExitCode::FAILURE)
    }
}

fn cmd_modified_tests(diff: &Path) -> Result<ExitCode> {
    let diff = std::fs::read(diff).with_context(|| format!("Failed to read {}", diff.display()))?;
    for test in find_modified_layout_tests(&diff)? {
        println!("{test}");
    }
    Ok(ExitCode::SUCCESS)
}

/// Result files handed to `classify`.
struct ClassifyRuns {
    first: PathBuf,
    second: Option<PathBuf>,
    clean: Option<PathBuf>,
    clean_status: Option<BuildStatus>,
    repeat: Option<PathBuf>,
    repeat_clean: Option<PathBuf>,
}

impl ClassifyRuns {
    /// Build context holding every supplied run. With-change runs only get
    /// classified after failing, so they are recorded as failures.
    fn context(&self, suite: Suite, retry_count: u32) -> Result<BuildContext> {
        let mut ctx = BuildContext::new(
            "cli",
            suite.as_str(),
            suite,
            ChangeMetadata::patch(1, None),
        )
        .with_retry_count(RetryCounter::new(retry_count));

        let runs = [
            (RunAttempt::FirstWithChange, Some(&self.first), None),
            (RunAttempt::SecondWithChange, self.second.as_ref(), None),
            (RunAttempt::WithoutChange, self.clean.as_ref(), self.clean_status),
            (RunAttempt::RepeatedFailuresWithChange, self.repeat.as_ref(), None),
            (
                RunAttempt::RepeatedFailuresWithoutChange,
                self.repeat_clean.as_ref(),
                None,
            ),
        ];
        for (attempt, path, status) in runs {
            let Some(path) = path else { continue };
            ctx = ctx.with_outcome(load_attempt(suite, attempt, path, status)?);
        }
        Ok(ctx)
    }
}

fn load_attempt(
    suite: Suite,
    attempt: RunAttempt,
    path: &Path,
    status: Option<BuildStatus>,
) -> Result<AttemptOutcome> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let format = suite
        .results_format()
        .with_context(|| format!("{suite} builds have no test results to classify"))?;
    let results = ResultSet::parse_lenient(format, &raw);
    let status = status.unwrap_or_else(|| {
        let clean = results.as_ref().is_some_and(|r| r.failing_tests().is_empty());
        if attempt.with_change() || !clean {
            BuildStatus::Failure
        } else {
            BuildStatus::Success
        }
    });
    Ok(AttemptOutcome::new(attempt, status, results))
}

fn cmd_classify(
    config: &EwsConfig,
    suite: Suite,
    runs: &ClassifyRuns,
    retry_count: u32,
) -> Result<ExitCode> {
    let ctx = runs.context(suite, retry_count)?;
    let _span = BuildSpan::enter(&ctx.build_id, &ctx.queue);

    let analysis = if suite == Suite::Compile {
        ews_core::Analysis::Compile
    } else {
        ews_core::Analysis::Tests
    };
    let classification = FailureClassifier::new(config).classify(analysis, &ctx);
    let resolution = RetryPolicy::from_config(config).resolve(classification, ctx.retry_count);
    info!(
        rule = resolution.rule,
        retry_count = resolution.retry_count.get(),
        notes = resolution.notes.len(),
        "Classified"
    );
    print_json(&resolution.verdict)?;
    Ok(ExitCode::SUCCESS)
}

fn cmd_report(
    config: &EwsConfig,
    verdict: &Path,
    change: &Path,
    queue: &str,
    suite: Suite,
    retry_count: u32,
) -> Result<ExitCode> {
    let verdict: Verdict = read_json(verdict)?;
    let change: ChangeMetadata = read_json(change)?;
    change.validate()?;
    let ctx = BuildContext::new("cli", queue, suite, change)
        .with_retry_count(RetryCounter::new(retry_count));
    let _span = BuildSpan::enter(&ctx.build_id, &ctx.queue);

    let resolution = Resolution {
        verdict,
        retry_count: ctx.retry_count,
        notes: Vec::new(),
        rule: "cli",
    };
    let effects = VerdictReporter::new(config.clone()).report(&resolution, &ctx);
    print_json(&effects)?;
    Ok(ExitCode::SUCCESS)
}

async fn cmd_run(
    config: &EwsConfig,
    ctx: BuildContext,
    diff: &Path,
    workdir: &Path,
    decision_dir: Option<&Path>,
    configuration: &str,
) -> Result<ExitCode> {
    let diff = std::fs::read(diff).with_context(|| format!("Failed to read {}", diff.display()))?;
    let commands = CommandBuilder::new(config.layout.clone()).with_configuration(configuration);
    let executor = Arc::new(ShellExecutor::new(workdir, commands));

    let mut pipeline = BuildPipeline::new(config, executor, Collaborators::log_only())?;
    if let Some(dir) = decision_dir {
        pipeline = pipeline.with_decision_dir(dir);
    }

    println!("Running {} build {} for {}", ctx.queue, ctx.build_id, ctx.change.label());
    let result = pipeline
        .run(ctx, &diff)
        .await
        .context("Build pipeline failed to run")?;

    println!("Status: {}", result.status);
    println!("Summary: {}", result.summary);
    if let Some(verdict) = &result.verdict {
        println!(
            "Verdict: {verdict} (rule {}, retry {})",
            result.rule.as_deref().unwrap_or("-"),
            result.retry_count
        );
    }
    println!("Steps: {}", result.steps.join(", "));
    println!(
        "Notifications: {} sent, {} suppressed, {} failed",
        result.dispatch.sent, result.dispatch.suppressed, result.dispatch.failed
    );
    if let Some(path) = &result.decision_path {
        println!("Decision: {}", path.display());
    }
    println!("Duration: {}ms", result.duration_ms);

    Ok(if result.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    fn generic(failing: &[&str]) -> String {
        serde_json::json!({ "failing_tests": failing }).to_string()
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_classify_arguments() {
        let cli = Cli::try_parse_from([
            "ews",
            "--json",
            "classify",
            "--suite",
            "api",
            "--first",
            "first.json",
            "--clean-status",
            "success",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Classify {
                suite,
                clean_status,
                retry_count,
                ..
            } => {
                assert_eq!(suite, Suite::ApiTests);
                assert_eq!(clean_status, Some(BuildStatus::Success));
                assert_eq!(retry_count, 0);
            }
            _ => panic!("expected classify"),
        }
        assert!(Cli::try_parse_from(["ews", "classify", "--suite", "nope", "--first", "f"]).is_err());
    }

    #[test]
    fn test_classify_context_records_supplied_runs() {
        let dir = tempfile::tempdir().unwrap();
        let runs = ClassifyRuns {
            first: write(dir.path(), "first.json", r#"{"Failed": [{"name": "A"}]}"#),
            second: Some(write(dir.path(), "second.json", r#"{"Failed": [{"name": "A"}]}"#)),
            clean: Some(write(dir.path(), "clean.json", "{}")),
            clean_status: None,
            repeat: None,
            repeat_clean: None,
        };
        let ctx = runs.context(Suite::ApiTests, 2).unwrap();
        assert_eq!(ctx.retry_count.get(), 2);
        assert_eq!(ctx.attempts().count(), 3);
        let clean = ctx.attempt(RunAttempt::WithoutChange).unwrap();
        assert_eq!(clean.status, BuildStatus::Success);
        let first = ctx.attempt(RunAttempt::FirstWithChange).unwrap();
        assert_eq!(first.status, BuildStatus::Failure);
        assert!(first.failing_tests().contains("A"));
    }

    #[test]
    fn test_malformed_results_become_no_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "bad.json", "not json");
        let outcome =
            load_attempt(Suite::LayoutTests, RunAttempt::WithoutChange, &path, None).unwrap();
        assert!(outcome.results.is_none());
        assert_eq!(outcome.status, BuildStatus::Failure);
    }

    #[test]
    fn test_compile_builds_have_no_results_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "first.json", &generic(&["a"]));
        assert!(load_attempt(Suite::Compile, RunAttempt::FirstWithChange, &path, None).is_err());
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.num_failures_to_display, 10);
    }

    #[test]
    fn test_read_json_reports_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "change.json", "{");
        let err = read_json::<ChangeMetadata>(&path).unwrap_err();
        assert!(format!("{err:#}").contains("change.json"));
    }

    #[tokio::test]
    async fn test_run_skips_irrelevant_change() {
        let dir = tempfile::tempdir().unwrap();
        let diff = write(
            dir.path(),
            "change.diff",
            "+++ b/Source/WebCore/page/Frame.cpp\n",
        );
        let ctx = BuildContext::new(
            "cli-run",
            "jsc-tests",
            Suite::Jsc,
            ChangeMetadata::pull_request(7, "0123abcd"),
        );
        let decisions = dir.path().join("decisions");
        let code = cmd_run(
            &EwsConfig::default(),
            ctx,
            &diff,
            dir.path(),
            Some(&decisions),
            "release",
        )
        .await;
        assert!(code.is_ok());
        // skipped builds carry no verdict to record
        assert!(!decisions.exists());
    }
}
