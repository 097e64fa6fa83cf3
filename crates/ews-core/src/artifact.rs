//! Decision log persistence.
//!
//! Each finished build is written to `<dir>/<build_id>/decision.json` with a
//! companion `<dir>/<build_id>/decision.digest` holding the SHA-256 of the
//! JSON bytes. Reading verifies the digest.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{AttemptOutcome, BuildStatus, ChangeMetadata, Suite, Verdict};
use crate::error::EwsError;
use crate::retry::RetryCounter;
use crate::Result;

/// The final record of one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub build_id: String,
    pub queue: String,
    pub suite: Suite,
    pub change: ChangeMetadata,
    pub retry_count: RetryCounter,
    pub attempts: Vec<AttemptOutcome>,
    pub verdict: Verdict,
    pub status: BuildStatus,
    pub summary: String,
    /// Classifier rule that produced the verdict.
    pub rule: String,
    pub recorded_at: DateTime<Utc>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Returns the path to `decision.json`.
pub fn write_decision(record: &DecisionRecord, dir: &Path) -> Result<PathBuf> {
    let build_dir = dir.join(&record.build_id);
    std::fs::create_dir_all(&build_dir)?;

    let record_path = build_dir.join("decision.json");
    let digest_path = build_dir.join("decision.digest");
    let json = serde_json::to_vec_pretty(record)?;

    std::fs::write(&record_path, &json)?;
    std::fs::write(&digest_path, sha256_hex(&json).as_bytes())?;

    Ok(record_path)
}

pub fn read_decision(build_id: &str, dir: &Path) -> Result<DecisionRecord> {
    let build_dir = dir.join(build_id);
    let json = std::fs::read(build_dir.join("decision.json"))?;
    let expected = std::fs::read_to_string(build_dir.join("decision.digest"))?;
    let actual = sha256_hex(&json);
    if expected.trim() != actual {
        return Err(EwsError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual,
        });
    }
    Ok(serde_json::from_slice(&json)?)
}
