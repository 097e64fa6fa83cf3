//! Notification content. Delivery is a collaborator concern
//! (see [`crate::collaborators::NotificationSink`]).

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::EwsConfig;
use crate::domain::results::TestId;
use crate::domain::{BuildContext, ChangeId, Suite};

const UNSUBSCRIBE: &str =
    "To unsubscribe from these notifications or to provide any feedback please contact the EWS maintainers";

/// Who a notification is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "audience", rename_all = "snake_case")]
pub enum Audience {
    /// The change author. Suppressed when the change went stale.
    Author { to: String },
    /// Operators watching the builder.
    BotWatchers { builder: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub audience: Audience,
    pub subject: String,
    pub body: String,
    /// Deduplication key, e.g. `flaky-<test>`.
    pub audience_key: String,
}

impl Notification {
    pub fn is_for_author(&self) -> bool {
        matches!(self.audience, Audience::Author { .. })
    }
}

/// Escape a log excerpt for inclusion in an HTML mail body.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

pub(crate) fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

/// Builds notifications for one build.
pub struct Composer<'a> {
    ctx: &'a BuildContext,
    config: &'a EwsConfig,
}

impl<'a> Composer<'a> {
    pub fn new(ctx: &'a BuildContext, config: &'a EwsConfig) -> Self {
        Self { ctx, config }
    }

    fn builder(&self) -> &str {
        &self.ctx.queue
    }

    fn worker(&self) -> &str {
        self.ctx.worker.as_deref().unwrap_or("unknown")
    }

    pub fn build_url(&self) -> String {
        format!(
            "{}#/builders/{}/builds/{}",
            self.config.buildbot_url,
            self.ctx.queue,
            self.ctx.build_id
        )
    }

    pub fn history_url(&self, test: &str) -> String {
        let suite = self.ctx.suite.history_suite().unwrap_or("layout-tests");
        format!("{}?suite={suite}&test={test}", self.config.results_db_url)
    }

    fn watchers(&self, subject: String, body: String, audience_key: String) -> Notification {
        Notification {
            audience: Audience::BotWatchers {
                builder: self.builder().to_string(),
            },
            subject,
            body,
            audience_key,
        }
    }

    fn where_line(&self) -> String {
        format!(
            "Build: {}\n\nBuilder: {}\n\nWorker: {}",
            self.build_url(),
            self.builder(),
            self.worker()
        )
    }

    pub fn flaky_test(&self, test: &str) -> Notification {
        self.watchers(
            format!("Flaky test: {test}"),
            format!(
                "Flaky test: {test}\n\n{}\n\nHistory: {}",
                self.where_line(),
                self.history_url(test)
            ),
            format!("flaky-{test}"),
        )
    }

    pub fn preexisting_failure(&self, test: &str) -> Notification {
        self.watchers(
            format!("Pre-existing test failure: {test}"),
            format!(
                "Test {test} failed on clean tree run in {}.\n\nBuilder: {}\n\nWorker: {}\n\nHistory: {}",
                self.build_url(),
                self.builder(),
                self.worker(),
                self.history_url(test)
            ),
            format!("preexisting-{test}"),
        )
    }

    fn summary_header(&self, title: String) -> String {
        format!(
            "{title}\n  - Build : {}\n  - Builder : {}\n  - Worker : {}\n",
            self.build_url(),
            self.builder(),
            self.worker()
        )
    }

    /// One mail listing every flaky test and the steps it flaked on.
    pub fn flaky_failures_with_steps(&self, tests: &BTreeMap<TestId, Vec<String>>) -> Notification {
        let count = tests.len();
        let mut body = self.summary_header(format!(
            "Info about {count} flaky test failure{} at EWS:",
            plural(count)
        ));
        for (number, (test, steps)) in tests.iter().enumerate() {
            let steps_list = steps
                .iter()
                .map(|step| format!("\"{step}\""))
                .collect::<Vec<_>>()
                .join(", ");
            body.push_str(&format!(
                "\nFlaky #{}\n  - Test name: {test}\n  - Flaky on step{}: {steps_list}\n  - History: {}\n",
                number + 1,
                plural(steps.len()),
                self.history_url(test)
            ));
        }
        self.watchers(
            format!(
                "Info about {count} flaky failure{} at {}",
                plural(count),
                self.builder()
            ),
            body,
            format!("flaky-{}", self.worker()),
        )
    }

    /// One mail listing the non-flaky failures seen without the change.
    pub fn preexistent_failures(&self, tests: &BTreeSet<TestId>) -> Notification {
        let count = tests.len();
        let mut body = self.summary_header(format!(
            "Info about pre-existent (non-flaky) test failure{} at EWS:",
            plural(count)
        ));
        for test in tests {
            body.push_str(&format!(
                "\n- {test} (<a href=\"{}\">test history</a>)",
                self.history_url(test)
            ));
        }
        self.watchers(
            format!(
                "Info about {count} pre-existent failure{} at {}",
                plural(count),
                self.builder()
            ),
            body,
            format!("preexisting-{}", self.worker()),
        )
    }

    pub fn infrastructure_issue(&self, reason: &str) -> Notification {
        let url = self.build_url();
        let body = format!(
            "The following infrastructure issue happened at:\n\n    - Build : <a href=\"{url}\">{url}</a>\n    - Builder : {}\n    - Worker : {}\n    - Issue: {}\n",
            self.builder(),
            self.worker(),
            escape_html(reason)
        );
        self.watchers(
            format!("Infrastructure issue at {}", self.builder()),
            body,
            format!("infrastructure-{}", self.builder()),
        )
    }

    pub fn build_failure_on_trunk(&self, error_lines: &[String], today: NaiveDate) -> Notification {
        let mut body = format!(
            "Failed to build WebKit without {} in {}\n\nBuilder: {}\n\nWorker: {}",
            self.ctx.change.kind_noun(),
            self.build_url(),
            self.builder(),
            self.worker()
        );
        push_error_lines(&mut body, error_lines);
        self.watchers(
            format!("Build failure on trunk on {}", self.builder()),
            body,
            format!(
                "preexisting-build-failure-{}-{}",
                self.builder(),
                today.format("%Y-%d-%m")
            ),
        )
    }

    /// "while testing <link> for <link>." fragment of author mail.
    fn change_links(&self) -> String {
        let change = &self.ctx.change;
        let label = change.label();
        match &change.change {
            ChangeId::Patch { patch_id, bug_id } => {
                let mut text = format!(
                    " while testing <a href=\"{}\">{label}</a>",
                    change.patch_url().unwrap_or_default()
                );
                if let Some(bug_id) = bug_id {
                    text.push_str(&format!(
                        " for <a href=\"{}\">Bug {bug_id}</a>.",
                        change.bug_url().unwrap_or_default()
                    ));
                } else {
                    text.push_str(&format!(" ({patch_id})."));
                }
                text
            }
            ChangeId::PullRequest { number, .. } => format!(
                " while testing <a href=\"{}\">{label}</a> for <a href=\"{}\">PR #{number}</a>.",
                change.commit_url().unwrap_or_default(),
                change.pr_url().unwrap_or_default()
            ),
        }
    }

    fn author(&self, subject: String, body: String) -> Option<Notification> {
        let to = self.ctx.change.author.clone()?;
        let key = match &self.ctx.change.change {
            ChangeId::Patch { patch_id, .. } => patch_id.to_string(),
            ChangeId::PullRequest { head_sha, .. } => head_sha.clone(),
        };
        Some(Notification {
            audience: Audience::Author { to },
            subject,
            body,
            audience_key: key,
        })
    }

    fn change_title(&self) -> &str {
        self.ctx.change.title.as_deref().unwrap_or_default()
    }

    /// Mail to the change author about a build the change broke. `None`
    /// when the author is unknown.
    pub fn new_build_failure(&self, error_lines: &[String]) -> Option<Notification> {
        let mut body = format!(
            "EWS has detected build failure on {}{}",
            self.builder(),
            self.change_links()
        );
        body.push_str(&format!(
            "\n\nFull details are available at: {}",
            self.build_url()
        ));
        push_error_lines(&mut body, error_lines);
        body.push_str(&format!("\n\n{UNSUBSCRIBE}"));
        self.author(
            format!(
                "Build failure for {}: {}",
                self.ctx.change.label(),
                self.change_title()
            ),
            body,
        )
    }

    /// Mail to the change author about new test failures.
    pub fn new_test_failures(
        &self,
        tests: &BTreeSet<TestId>,
        exceeded_limit: bool,
    ) -> Option<Notification> {
        let kind = match self.ctx.suite {
            Suite::ApiTests => "API test",
            Suite::Jsc => "JSC test",
            _ => "Layout test",
        };
        let suffix = plural(tests.len());
        let mut body = format!(
            "EWS has detected {} failure{suffix} on {}{}",
            kind.to_lowercase(),
            self.builder(),
            self.change_links()
        );
        body.push_str(&format!(
            "\n\nFull details are available at: {}",
            self.build_url()
        ));
        if exceeded_limit {
            body.push_str(
                "\n\nAdditionally the failure limit has been exceeded, so the test suite has been \
                 terminated early. It is likely that there would be more failures than the ones \
                 listed below.",
            );
        }
        body.push_str(&format!("\n\n{kind} failure{suffix}:\n"));
        for test in tests {
            body.push_str(&format!(
                "\n- {test} (<a href=\"{}\">test history</a>)",
                self.history_url(test)
            ));
        }
        body.push_str(&format!("\n\n{UNSUBSCRIBE}"));
        self.author(
            format!(
                "{kind} failure for {}: {}",
                self.ctx.change.label(),
                self.change_title()
            ),
            body,
        )
    }
}

fn push_error_lines(body: &mut String, error_lines: &[String]) {
    if error_lines.is_empty() {
        return;
    }
    body.push_str(&format!(
        "\n\nError lines:\n\n<code>{}</code>",
        escape_html(&error_lines.join("\n"))
    ));
}
