//! In-memory fakes for the collaborator traits.
//!
//! Not test-gated: downstream crates use them in their own tests.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::collaborators::{ChangeStatus, ChangeValidator, CommitQueueApi, NotificationSink};
use crate::domain::ChangeMetadata;
use crate::error::EwsError;
use crate::notify::Notification;
use crate::Result;

/// Keeps every notification it is asked to send.
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent().into_iter().map(|n| n.subject).collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, notification: &Notification) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification.clone());
        Ok(())
    }
}

/// Fails every delivery.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingSink;

#[async_trait]
impl NotificationSink for FailingSink {
    async fn send(&self, notification: &Notification) -> Result<()> {
        Err(EwsError::Collaborator(format!(
            "mail relay rejected {}",
            notification.audience_key
        )))
    }
}

/// Answers every lookup with the same status, or with an error.
#[derive(Debug, Clone, Copy)]
pub struct StaticValidator {
    status: Option<ChangeStatus>,
}

impl StaticValidator {
    pub fn new(status: ChangeStatus) -> Self {
        Self {
            status: Some(status),
        }
    }

    /// Every lookup fails, as when the review system is unreachable.
    pub fn unreachable() -> Self {
        Self { status: None }
    }
}

#[async_trait]
impl ChangeValidator for StaticValidator {
    async fn status(&self, change: &ChangeMetadata) -> Result<ChangeStatus> {
        self.status.ok_or_else(|| {
            EwsError::Collaborator(format!("unable to fetch status of {}", change.label()))
        })
    }
}

/// Records revocations and bug comments in call order.
#[derive(Debug, Default)]
pub struct RecordingCommitQueue {
    calls: Mutex<Vec<CommitQueueCall>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitQueueCall {
    Revoke { patch_id: u64, reason: String },
    Comment { bug_id: u64, text: String },
}

impl RecordingCommitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<CommitQueueCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, call: CommitQueueCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

#[async_trait]
impl CommitQueueApi for RecordingCommitQueue {
    async fn revoke(&self, patch_id: u64, reason: &str) -> Result<()> {
        self.record(CommitQueueCall::Revoke {
            patch_id,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn comment_on_bug(&self, bug_id: u64, text: &str) -> Result<()> {
        self.record(CommitQueueCall::Comment {
            bug_id,
            text: text.to_string(),
        });
        Ok(())
    }
}
