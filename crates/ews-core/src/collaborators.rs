//! Narrow interfaces to the systems around the verdict engine.
//!
//! Implementations talk to the review systems and the mail relay. The core
//! only needs the traits; `LogOnly*` implementations record intent in the
//! log and are used by the CLI when no real backend is wired in.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::ChangeMetadata;
use crate::notify::Notification;
use crate::Result;

/// Review-system state of a change, as seen right before a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Open,
    /// Patch superseded by a newer attachment.
    Obsolete,
    /// Patch has review-.
    ReviewDenied,
    /// Pull request closed or merged.
    Closed,
    /// Pull request head moved past the tested hash.
    Outdated,
}

impl ChangeStatus {
    pub fn is_stale(self) -> bool {
        !matches!(self, ChangeStatus::Open)
    }
}

/// Delivers notifications. Delivery failures are reported, never fatal.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Looks up whether a change is still current.
#[async_trait]
pub trait ChangeValidator: Send + Sync {
    async fn status(&self, change: &ChangeMetadata) -> Result<ChangeStatus>;
}

/// Legacy patch review flags and bug comments.
#[async_trait]
pub trait CommitQueueApi: Send + Sync {
    /// Clear the commit-queue approval flag of a patch.
    async fn revoke(&self, patch_id: u64, reason: &str) -> Result<()>;

    async fn comment_on_bug(&self, bug_id: u64, text: &str) -> Result<()>;
}

/// The collaborator set one pipeline works with.
#[derive(Clone)]
pub struct Collaborators {
    pub sink: Arc<dyn NotificationSink>,
    pub validator: Arc<dyn ChangeValidator>,
    pub commit_queue: Arc<dyn CommitQueueApi>,
}

impl Collaborators {
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        validator: Arc<dyn ChangeValidator>,
        commit_queue: Arc<dyn CommitQueueApi>,
    ) -> Self {
        Self {
            sink,
            validator,
            commit_queue,
        }
    }

    /// Deliver nothing, treat every change as open.
    pub fn log_only() -> Self {
        Self::new(
            Arc::new(LogOnlySink),
            Arc::new(AssumeOpen),
            Arc::new(LogOnlyCommitQueue),
        )
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlySink;

#[async_trait]
impl NotificationSink for LogOnlySink {
    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(
            subject = %notification.subject,
            audience_key = %notification.audience_key,
            "notification (not delivered)"
        );
        Ok(())
    }
}

/// Treats every change as open.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeOpen;

#[async_trait]
impl ChangeValidator for AssumeOpen {
    async fn status(&self, _change: &ChangeMetadata) -> Result<ChangeStatus> {
        Ok(ChangeStatus::Open)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyCommitQueue;

#[async_trait]
impl CommitQueueApi for LogOnlyCommitQueue {
    async fn revoke(&self, patch_id: u64, reason: &str) -> Result<()> {
        info!(patch_id, reason, "commit-queue flag revoked (dry run)");
        Ok(())
    }

    async fn comment_on_bug(&self, bug_id: u64, text: &str) -> Result<()> {
        info!(bug_id, text, "bug comment (dry run)");
        Ok(())
    }
}
