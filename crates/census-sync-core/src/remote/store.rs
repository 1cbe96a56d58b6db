//! Guarded access to the remote backend.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::Value;

use super::{Document, RemoteBackend, RemoteError, RemoteResult, Subscription, WatchCallback, WatchEvent};
use crate::guard::{decode_or_repair, parse_timestamp, ABSENT_WHEN_NULL};
use crate::models::{DailyRecord, HistorySnapshot, Namespace, SnapshotReason};
use crate::patch::FieldPatch;
use crate::retry::RetryPolicy;

/// A decoded change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEvent {
    /// Current record, `None` once deleted
    pub record: Option<DailyRecord>,
    pub has_pending_writes: bool,
}

pub type RecordCallback = Arc<dyn Fn(RecordEvent) + Send + Sync>;

/// Serialize a record for the remote store.
///
/// Cleared optional fields that the store cannot delete by omission are
/// written as explicit `null`.
pub fn encode_document(record: &DailyRecord) -> RemoteResult<Document> {
    let value = serde_json::to_value(record).map_err(|e| RemoteError::Encoding(e.to_string()))?;
    let Value::Object(mut doc) = value else {
        return Err(RemoteError::Encoding("record did not serialize to an object".into()));
    };
    for key in ABSENT_WHEN_NULL {
        doc.entry(key.to_string()).or_insert(Value::Null);
    }
    Ok(doc)
}

/// Remote synchronized store.
///
/// Every destructive write is preceded by a [`HistorySnapshot`] of the
/// document as it stood. Snapshot failures never block the write.
pub struct RemoteSyncStore {
    backend: Arc<dyn RemoteBackend>,
    retry: RetryPolicy,
}

impl RemoteSyncStore {
    pub fn new(backend: Arc<dyn RemoteBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    /// Fetch and decode a record.
    pub async fn fetch(&self, namespace: Namespace, date: &str) -> RemoteResult<Option<DailyRecord>> {
        let backend = &self.backend;
        let doc = self.retry.run(|| backend.get(namespace, date)).await?;
        Ok(doc.map(|d| decode_or_repair(&Value::Object(d), date)))
    }

    /// Replace the whole remote document.
    ///
    /// With `base`, the remote `lastUpdated` is read first and the write is
    /// aborted with [`RemoteError::Conflict`] if it is strictly newer. If that
    /// read fails the write proceeds, after another attempt to snapshot the
    /// current document. Returns the server-assigned timestamp.
    pub async fn save_full_document(
        &self,
        namespace: Namespace,
        record: &DailyRecord,
        base: Option<DateTime<Utc>>,
    ) -> RemoteResult<DateTime<Utc>> {
        let date = record.date.as_str();
        let doc = encode_document(record)?;

        let current = match self.backend.get(namespace, date).await {
            Ok(current) => Some(current),
            Err(e) => {
                warn!(
                    "event=remote_base_read module=remote status=error namespace={} date={} error=\"{}\"",
                    namespace, date, e
                );
                None
            }
        };

        if let (Some(base), Some(Some(current))) = (base, current.as_ref()) {
            let remote_updated = current.get("lastUpdated").and_then(parse_timestamp);
            if let Some(remote_updated) = remote_updated.filter(|ts| *ts > base) {
                warn!(
                    "event=remote_conflict module=remote namespace={} date={} remote={} base={}",
                    namespace, date, remote_updated, base
                );
                return Err(RemoteError::Conflict {
                    date: date.to_string(),
                    remote_updated,
                    base,
                });
            }
        }

        match current {
            Some(Some(current)) => self.snapshot(namespace, date, current, SnapshotReason::FullWrite).await,
            Some(None) => {}
            None => self.snapshot_current(namespace, date, SnapshotReason::FullWrite).await,
        }

        let backend = &self.backend;
        let stamped = self
            .retry
            .run(|| backend.set_full(namespace, date, doc.clone()))
            .await?;

        debug!(
            "event=remote_set_full module=remote status=ok namespace={} date={} last_updated={}",
            namespace, date, stamped
        );
        Ok(stamped)
    }

    /// Apply field-path updates without a staleness check.
    ///
    /// The server still stamps `lastUpdated`, so a later guarded full write
    /// from an older base is detected as a conflict. Returns that stamp.
    pub async fn update_paths(
        &self,
        namespace: Namespace,
        date: &str,
        patch: &FieldPatch,
    ) -> RemoteResult<DateTime<Utc>> {
        self.snapshot_current(namespace, date, SnapshotReason::PartialWrite).await;

        let backend = &self.backend;
        let stamped = self
            .retry
            .run(|| backend.update_paths(namespace, date, patch))
            .await?;

        debug!(
            "event=remote_update_paths module=remote status=ok namespace={} date={} paths={} last_updated={}",
            namespace,
            date,
            patch.len(),
            stamped
        );
        Ok(stamped)
    }

    /// Delete the remote document. Its history is kept.
    pub async fn delete_document(&self, namespace: Namespace, date: &str) -> RemoteResult<()> {
        self.snapshot_current(namespace, date, SnapshotReason::Delete).await;

        let backend = &self.backend;
        self.retry.run(|| backend.delete(namespace, date)).await?;

        info!(
            "event=remote_delete module=remote status=ok namespace={} date={}",
            namespace, date
        );
        Ok(())
    }

    /// Subscribe to decoded changes of one record.
    pub fn watch(&self, namespace: Namespace, date: &str, callback: RecordCallback) -> Subscription {
        let fallback_date = date.to_string();
        let on_change: WatchCallback = Arc::new(move |event: WatchEvent| {
            let record = event
                .document
                .map(|doc| decode_or_repair(&Value::Object(doc), &fallback_date));
            callback(RecordEvent {
                record,
                has_pending_writes: event.has_pending_writes,
            });
        });
        self.backend.watch(namespace, date, on_change)
    }

    /// Decoded records with `start <= date <= end`.
    pub async fn list_range(&self, namespace: Namespace, start: &str, end: &str) -> RemoteResult<Vec<DailyRecord>> {
        let backend = &self.backend;
        let docs = self
            .retry
            .run(|| backend.list_in_range(namespace, start, end))
            .await?;

        Ok(docs
            .into_iter()
            .filter_map(|doc| {
                let date = doc.get("date").and_then(Value::as_str)?.to_string();
                Some(decode_or_repair(&Value::Object(doc), &date))
            })
            .collect())
    }

    /// Audit trail of one record, oldest first.
    pub async fn history(&self, namespace: Namespace, date: &str) -> RemoteResult<Vec<HistorySnapshot>> {
        let backend = &self.backend;
        self.retry
            .run(|| backend.list_snapshots(namespace, date))
            .await
    }

    async fn snapshot_current(&self, namespace: Namespace, date: &str, reason: SnapshotReason) {
        let backend = &self.backend;
        match self.retry.run(|| backend.get(namespace, date)).await {
            Ok(Some(current)) => self.snapshot(namespace, date, current, reason).await,
            Ok(None) => {}
            Err(e) => warn!(
                "event=history_snapshot module=remote status=skipped namespace={} date={} error=\"{}\"",
                namespace, date, e
            ),
        }
    }

    async fn snapshot(&self, namespace: Namespace, date: &str, current: Document, reason: SnapshotReason) {
        let snapshot = HistorySnapshot::capture(namespace, date, Value::Object(current), reason);
        let backend = &self.backend;
        let snapshot_ref = &snapshot;

        if let Err(e) = self
            .retry
            .run(|| backend.append_snapshot(snapshot_ref))
            .await
        {
            warn!(
                "event=history_snapshot module=remote status=error namespace={} date={} error=\"{}\"",
                namespace, date, e
            );
        }
    }
}
