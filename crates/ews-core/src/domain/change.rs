//! Identity of the change under test.

use serde::{Deserialize, Serialize};

use crate::{EwsError, Result};

pub const BUG_SERVER_URL: &str = "https://bugs.webkit.org/";
pub const GITHUB_URL: &str = "https://github.com/";
pub const GITHUB_PROJECTS: &[&str] = &["WebKit/WebKit"];
pub const HASH_LENGTH_TO_DISPLAY: usize = 8;

/// A legacy attachment-based patch or a pull request at a given head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeId {
    Patch {
        patch_id: u64,
        #[serde(default)]
        bug_id: Option<u64>,
    },
    PullRequest {
        number: u64,
        head_sha: String,
    },
}

/// Metadata established once, during change validation, and never
/// mutated for the rest of the build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMetadata {
    pub change: ChangeId,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub owners: Vec<String>,
    #[serde(default)]
    pub repository_url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub sensitive: bool,
}

impl ChangeMetadata {
    pub fn patch(patch_id: u64, bug_id: Option<u64>) -> Self {
        Self::new(ChangeId::Patch { patch_id, bug_id })
    }

    pub fn pull_request(number: u64, head_sha: impl Into<String>) -> Self {
        Self::new(ChangeId::PullRequest {
            number,
            head_sha: head_sha.into(),
        })
    }

    fn new(change: ChangeId) -> Self {
        Self {
            change,
            author: None,
            owners: Vec::new(),
            repository_url: None,
            title: None,
            sensitive: false,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_repository(mut self, url: impl Into<String>) -> Self {
        self.repository_url = Some(url.into());
        self
    }

    pub fn with_owners(mut self, owners: Vec<String>) -> Self {
        self.owners = owners;
        self
    }

    pub fn sensitive(mut self, sensitive: bool) -> Self {
        self.sensitive = sensitive;
        self
    }

    /// Reject metadata that cannot identify a change.
    pub fn validate(&self) -> Result<()> {
        match &self.change {
            ChangeId::Patch { patch_id: 0, .. } => {
                Err(EwsError::InvalidChange("patch id must be non-zero".into()))
            }
            ChangeId::PullRequest { number: 0, .. } => Err(EwsError::InvalidChange(
                "pull request number must be non-zero".into(),
            )),
            ChangeId::PullRequest { head_sha, .. }
                if head_sha.is_empty() || !head_sha.chars().all(|c| c.is_ascii_hexdigit()) =>
            {
                Err(EwsError::InvalidChange(format!(
                    "head sha '{head_sha}' is not a hex digest"
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn is_patch(&self) -> bool {
        matches!(self.change, ChangeId::Patch { .. })
    }

    pub fn patch_id(&self) -> Option<u64> {
        match self.change {
            ChangeId::Patch { patch_id, .. } => Some(patch_id),
            ChangeId::PullRequest { .. } => None,
        }
    }

    pub fn bug_id(&self) -> Option<u64> {
        match self.change {
            ChangeId::Patch { bug_id, .. } => bug_id,
            ChangeId::PullRequest { .. } => None,
        }
    }

    pub fn pr_number(&self) -> Option<u64> {
        match self.change {
            ChangeId::PullRequest { number, .. } => Some(number),
            ChangeId::Patch { .. } => None,
        }
    }

    pub fn head_sha(&self) -> Option<&str> {
        match &self.change {
            ChangeId::PullRequest { head_sha, .. } => Some(head_sha),
            ChangeId::Patch { .. } => None,
        }
    }

    /// First 8 characters of the head commit, for display.
    pub fn short_hash(&self) -> Option<&str> {
        self.head_sha()
            .map(|sha| &sha[..sha.len().min(HASH_LENGTH_TO_DISPLAY)])
    }

    /// "Patch 1234" or "Hash abcdef12".
    pub fn label(&self) -> String {
        match &self.change {
            ChangeId::Patch { patch_id, .. } => format!("Patch {patch_id}"),
            ChangeId::PullRequest { .. } => {
                format!("Hash {}", self.short_hash().unwrap_or_default())
            }
        }
    }

    /// "patch" or "PR", as used in build-failure messages.
    pub fn kind_noun(&self) -> &'static str {
        if self.is_patch() {
            "patch"
        } else {
            "PR"
        }
    }

    fn github_repository(&self) -> Option<String> {
        let url = self
            .repository_url
            .clone()
            .unwrap_or_else(|| format!("{GITHUB_URL}{}", GITHUB_PROJECTS[0]));
        let known = GITHUB_PROJECTS
            .iter()
            .any(|project| url == format!("{GITHUB_URL}{project}"));
        known.then_some(url)
    }

    pub fn bug_url(&self) -> Option<String> {
        self.bug_id()
            .map(|id| format!("{BUG_SERVER_URL}show_bug.cgi?id={id}"))
    }

    pub fn patch_url(&self) -> Option<String> {
        self.patch_id()
            .map(|id| format!("{BUG_SERVER_URL}attachment.cgi?id={id}&action=prettypatch"))
    }

    /// Pull request link; only produced for known GitHub projects.
    pub fn pr_url(&self) -> Option<String> {
        let number = self.pr_number()?;
        Some(format!("{}/pull/{number}", self.github_repository()?))
    }

    pub fn commit_url(&self) -> Option<String> {
        let sha = self.head_sha().filter(|sha| !sha.is_empty())?;
        Some(format!("{}/commit/{sha}", self.github_repository()?))
    }

    /// Link to the change itself: the PR for pull requests, the patch otherwise.
    pub fn change_url(&self) -> Option<String> {
        match self.change {
            ChangeId::Patch { .. } => self.patch_url(),
            ChangeId::PullRequest { .. } => self.pr_url(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_links() {
        let meta = ChangeMetadata::patch(1234, Some(99));
        assert_eq!(meta.label(), "Patch 1234");
        assert_eq!(
            meta.bug_url().unwrap(),
            "https://bugs.webkit.org/show_bug.cgi?id=99"
        );
        assert_eq!(
            meta.patch_url().unwrap(),
            "https://bugs.webkit.org/attachment.cgi?id=1234&action=prettypatch"
        );
        assert!(meta.pr_url().is_none());
        assert_eq!(meta.kind_noun(), "patch");
    }

    #[test]
    fn test_pull_request_links() {
        let meta = ChangeMetadata::pull_request(17, "abcdef0123456789");
        assert_eq!(meta.label(), "Hash abcdef01");
        assert_eq!(meta.short_hash(), Some("abcdef01"));
        assert_eq!(
            meta.pr_url().unwrap(),
            "https://github.com/WebKit/WebKit/pull/17"
        );
        assert_eq!(
            meta.commit_url().unwrap(),
            "https://github.com/WebKit/WebKit/commit/abcdef0123456789"
        );
        assert_eq!(meta.kind_noun(), "PR");
    }

    #[test]
    fn test_unknown_repository_has_no_github_links() {
        let meta = ChangeMetadata::pull_request(17, "abcdef01")
            .with_repository("https://github.com/someone/fork");
        assert!(meta.pr_url().is_none());
        assert!(meta.commit_url().is_none());
    }

    #[test]
    fn test_validate_rejects_bad_identity() {
        assert!(ChangeMetadata::patch(0, None).validate().is_err());
        assert!(ChangeMetadata::pull_request(1, "not-hex").validate().is_err());
        assert!(ChangeMetadata::pull_request(1, "").validate().is_err());
        assert!(ChangeMetadata::pull_request(1, "abc123").validate().is_ok());
    }

    #[test]
    fn test_metadata_json_shape() {
        let json = r#"{
            "change": {"kind": "pull_request", "number": 5, "head_sha": "deadbeef"},
            "author": "dev@example.com",
            "sensitive": true
        }"#;
        let meta: ChangeMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.pr_number(), Some(5));
        assert!(meta.sensitive);
        assert!(meta.owners.is_empty());
    }
}
