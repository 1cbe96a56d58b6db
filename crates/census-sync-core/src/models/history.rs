//! Write-once history snapshots for the audit trail.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::namespace::Namespace;

/// Why a snapshot was captured.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotReason {
    /// Before a whole-document replace
    FullWrite,
    /// Before a field-path patch
    PartialWrite,
    /// Before the remote document is deleted
    Delete,
}

/// Immutable copy of a record's complete prior state.
///
/// Keyed by `(record_id, snapshot_at)`. Snapshots are never updated or
/// deleted, and outlive the record they were taken from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistorySnapshot {
    /// Date key of the record
    pub record_id: String,
    pub namespace: Namespace,
    pub snapshot_at: DateTime<Utc>,
    pub reason: SnapshotReason,
    /// The document exactly as it was stored before the write
    pub payload: Value,
    /// SHA-256 of the serialized payload
    pub digest: String,
}

impl HistorySnapshot {
    /// Capture a snapshot of `payload` now.
    pub fn capture(
        namespace: Namespace,
        record_id: impl Into<String>,
        payload: Value,
        reason: SnapshotReason,
    ) -> Self {
        let digest = hash_payload(&payload);
        Self {
            record_id: record_id.into(),
            namespace,
            snapshot_at: Utc::now(),
            reason,
            payload,
            digest,
        }
    }

    /// Storage key: `<record_id>/<snapshot timestamp>`.
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.record_id,
            self.snapshot_at.to_rfc3339_opts(SecondsFormat::Nanos, true)
        )
    }

    /// Check the payload against its digest.
    pub fn verify(&self) -> bool {
        hash_payload(&self.payload) == self.digest
    }
}

fn hash_payload(payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
