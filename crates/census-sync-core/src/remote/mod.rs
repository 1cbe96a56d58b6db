//! Remote synchronized store.
//!
//! [`RemoteBackend`] is the transport contract (a document store with server
//! timestamps and change subscriptions). [`RemoteSyncStore`] layers the
//! write discipline on top: staleness check, snapshot before every
//! destructive write, retries, absence encoding and guarded reads.

mod memory;
mod store;

pub use memory::{InMemoryRemote, RemoteOp};
pub use store::{encode_document, RecordCallback, RecordEvent, RemoteSyncStore};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{HistorySnapshot, Namespace};
use crate::patch::FieldPatch;
use crate::retry::Retryable;

/// A raw remote document.
pub type Document = Map<String, Value>;

/// Remote store errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    #[error("Remote timed out: {0}")]
    Timeout(String),

    #[error("Remote rejected the request: {0}")]
    Rejected(String),

    #[error("Document encoding error: {0}")]
    Encoding(String),

    #[error("Record {date} changed remotely at {remote_updated}, after base {base}")]
    Conflict {
        date: String,
        remote_updated: DateTime<Utc>,
        base: DateTime<Utc>,
    },
}

impl RemoteError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_) | RemoteError::Timeout(_))
    }
}

impl Retryable for RemoteError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// A change notification for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    /// Current document, `None` once deleted
    pub document: Option<Document>,
    /// True for the subscriber's own write before the server confirmed it
    pub has_pending_writes: bool,
}

pub type WatchCallback = Arc<dyn Fn(WatchEvent) + Send + Sync>;

/// Live change subscription. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Stop receiving notifications.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Network-backed document store.
///
/// Documents are addressed by `(namespace, date)`. The backend owns
/// `lastUpdated`: every write, whole-document or by path, stamps it with a
/// server time that never decreases for a given document.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    async fn get(&self, namespace: Namespace, date: &str) -> RemoteResult<Option<Document>>;

    /// Replace the whole document. Returns the server-assigned `lastUpdated`.
    async fn set_full(&self, namespace: Namespace, date: &str, document: Document) -> RemoteResult<DateTime<Utc>>;

    /// Set individual field paths, creating the document if needed.
    /// Returns the server-assigned `lastUpdated`.
    async fn update_paths(&self, namespace: Namespace, date: &str, patch: &FieldPatch) -> RemoteResult<DateTime<Utc>>;

    async fn delete(&self, namespace: Namespace, date: &str) -> RemoteResult<()>;

    /// Subscribe to changes of one document. The current state is delivered
    /// first.
    fn watch(&self, namespace: Namespace, date: &str, callback: WatchCallback) -> Subscription;

    /// Documents with `start <= date <= end`, in date order.
    async fn list_in_range(&self, namespace: Namespace, start: &str, end: &str) -> RemoteResult<Vec<Document>>;

    /// Append a write-once history snapshot.
    async fn append_snapshot(&self, snapshot: &HistorySnapshot) -> RemoteResult<()>;

    /// Snapshots of one record, oldest first.
    async fn list_snapshots(&self, namespace: Namespace, date: &str) -> RemoteResult<Vec<HistorySnapshot>>;
}
