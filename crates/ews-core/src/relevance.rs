//! Change relevance gate and modified-test discovery.
//!
//! Both scan the raw diff line by line as bytes; diffs are not required to
//! be valid UTF-8.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use regex::bytes::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::config::RelevanceConfig;
use crate::Result;

const BINDINGS_PATHS: &[&str] = &["Source/WebCore", "Tools"];

const SERVICES_PATHS: &[&str] = &[
    "Tools/CISupport/build-webkit-org",
    "Tools/CISupport/ews-build",
    "Tools/CISupport/Shared",
    "Tools/Scripts/libraries/resultsdbpy",
    "Tools/Scripts/libraries/webkitcorepy",
    "Tools/Scripts/libraries/webkitscmpy",
];

const JSC_PATHS: &[&str] = &[
    ".*jsc.*",
    ".*javascriptcore.*",
    "JSTests/",
    "Source/WTF/",
    "Source/bmalloc/",
    "Source/cmake/",
    ".*Makefile.*",
    "Tools/Scripts/build-webkit",
    "Tools/Scripts/webkitdirs.pm",
];

const WK1_PATHS: &[&str] = &[
    "Source/WebKitLegacy",
    "Source/WebCore",
    "Source/WebInspectorUI",
    "Source/WebDriver",
    "Source/WTF",
    "Source/bmalloc",
    "Source/JavaScriptCore",
    "Source/ThirdParty",
    "LayoutTests",
    "Tools",
];

const BIG_SUR_PATHS: &[&str] = &["Source/", "Tools/"];

const WEBKITPY_PATHS: &[&str] = &[
    "Tools/Scripts/webkitpy",
    "Tools/Scripts/libraries",
    "Tools/Scripts/commit-log-editor",
    "Source/WebKit/Scripts",
];

/// Queue families in lookup order. The first family whose name is a
/// case-insensitive substring of the queue name wins.
const QUEUE_GROUPS: &[(&str, &[&str])] = &[
    ("bindings", BINDINGS_PATHS),
    ("bigsur-release-build", BIG_SUR_PATHS),
    ("services-ews", SERVICES_PATHS),
    ("jsc", JSC_PATHS),
    ("webkitpy", WEBKITPY_PATHS),
    ("wk1-tests", WK1_PATHS),
    ("windows", WK1_PATHS),
];

const LAYOUT_TEST_PATTERN: &str = r"^(\+\+\+).*(LayoutTests.*\.html)";
const SUFFIXES_TO_IGNORE: &[&str] = &["-expected", "-expected-mismatch", "-ref", "-notref"];
const DIRECTORIES_TO_IGNORE: &[&str] = &[
    "reference",
    "reftest",
    "resources",
    "support",
    "script-tests",
    "tools",
];

fn compile(pattern: &str) -> Result<Regex> {
    Ok(RegexBuilder::new(pattern)
        .case_insensitive(true)
        .unicode(false)
        .build()?)
}

struct QueueGroup {
    name: &'static str,
    patterns: Vec<Regex>,
}

/// Decides whether a change touches paths a queue cares about.
pub struct ChangeRelevanceFilter {
    groups: Vec<QueueGroup>,
    max_line_size: usize,
    timeout: Duration,
}

impl ChangeRelevanceFilter {
    pub fn new(config: &RelevanceConfig) -> Result<Self> {
        let groups = QUEUE_GROUPS
            .iter()
            .map(|&(name, paths)| -> Result<QueueGroup> {
                let patterns = paths.iter().map(|p| compile(p)).collect::<Result<_>>()?;
                Ok(QueueGroup { name, patterns })
            })
            .collect::<Result<_>>()?;
        Ok(Self {
            groups,
            max_line_size: config.max_line_size,
            timeout: config.timeout(),
        })
    }

    /// Name of the queue family `queue` belongs to, if any.
    pub fn group_for(&self, queue: &str) -> Option<&'static str> {
        self.find_group(queue).map(|group| group.name)
    }

    fn find_group(&self, queue: &str) -> Option<&QueueGroup> {
        let queue = queue.to_ascii_lowercase();
        self.groups.iter().find(|group| queue.contains(group.name))
    }

    /// Whether any diff line matches the queue's path patterns.
    ///
    /// Queues without a pattern set accept every change. Only the first
    /// `max_line_size` bytes of each line are examined. If the scan runs
    /// past the time budget the change is reported as not relevant.
    pub fn is_relevant<I, L>(&self, diff_lines: I, queue: &str) -> bool
    where
        I: IntoIterator<Item = L>,
        L: AsRef<[u8]>,
    {
        let Some(group) = self.find_group(queue) else {
            debug!(queue = %queue, "queue has no path patterns, every change is relevant");
            return true;
        };

        let start = Instant::now();
        for line in diff_lines {
            let line = line.as_ref();
            let line = &line[..line.len().min(self.max_line_size)];
            if group.patterns.iter().any(|re| re.is_match(line)) {
                return true;
            }
            if start.elapsed() >= self.timeout {
                warn!(
                    queue = %queue,
                    timeout_secs = self.timeout.as_secs(),
                    "relevance scan exceeded its time budget, treating change as not relevant"
                );
                return false;
            }
        }
        false
    }

    /// Convenience wrapper splitting a whole diff into lines.
    pub fn is_diff_relevant(&self, diff: &[u8], queue: &str) -> bool {
        self.is_relevant(diff.split(|b| *b == b'\n'), queue)
    }
}

/// Layout tests added or modified by a diff, sorted and deduplicated.
///
/// Expectation and reference files are ignored, as are files under
/// helper directories such as `resources`.
pub fn find_modified_layout_tests(diff: &[u8]) -> Result<Vec<String>> {
    let re = compile(LAYOUT_TEST_PATTERN)?;
    let mut tests = BTreeSet::new();
    for line in diff.split(|b| *b == b'\n') {
        let Some(captures) = re.captures(line) else {
            continue;
        };
        let text = String::from_utf8_lossy(line);
        if SUFFIXES_TO_IGNORE
            .iter()
            .any(|suffix| text.contains(&format!("{suffix}.html")))
        {
            continue;
        }
        let Some(name) = captures.get(2) else {
            continue;
        };
        let name = String::from_utf8_lossy(name.as_bytes()).into_owned();
        if name
            .split('/')
            .any(|component| DIRECTORIES_TO_IGNORE.contains(&component))
        {
            continue;
        }
        tests.insert(name);
    }
    Ok(tests.into_iter().collect())
}
