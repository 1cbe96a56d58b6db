//! Background delivery of partial updates to the remote store.
//!
//! One worker drains a bounded FIFO, so patches for a record reach the remote
//! in the order they were applied locally. Each patch gets the remote store's
//! retry budget; when the queue is full the new patch is dropped and counted.
//! A delivered patch's server timestamp is copied into the local record.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::cache::LocalCache;
use crate::models::Namespace;
use crate::patch::FieldPatch;
use crate::remote::RemoteSyncStore;
use crate::{SyncError, SyncResult};

/// A queued partial update.
#[derive(Debug, Clone)]
pub struct PatchJob {
    pub namespace: Namespace,
    pub date: String,
    pub patch: FieldPatch,
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchQueueStats {
    pub enqueued: u64,
    pub delivered: u64,
    /// Patches whose retries were exhausted
    pub failed: u64,
    /// Patches rejected because the queue was full or closed
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Bounded FIFO of remote patches with a single delivery worker.
pub struct PatchQueue {
    sender: mpsc::Sender<PatchJob>,
    pending: Arc<watch::Sender<usize>>,
    counters: Arc<Counters>,
    worker: JoinHandle<()>,
}

impl PatchQueue {
    /// Start the worker on the current tokio runtime.
    pub fn spawn(remote: Arc<RemoteSyncStore>, local: Arc<dyn LocalCache>, capacity: usize) -> SyncResult<Self> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| SyncError::InvalidInput(format!("patch queue needs a tokio runtime: {}", e)))?;

        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (pending, _) = watch::channel(0usize);
        let pending = Arc::new(pending);
        let counters = Arc::new(Counters::default());

        let worker = handle.spawn(deliver(
            receiver,
            remote,
            local,
            Arc::clone(&pending),
            Arc::clone(&counters),
        ));

        Ok(Self {
            sender,
            pending,
            counters,
            worker,
        })
    }

    /// Queue a patch without waiting. Returns false if it was dropped.
    pub fn enqueue(&self, job: PatchJob) -> bool {
        self.pending.send_modify(|n| *n += 1);

        match self.sender.try_send(job) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.pending.send_modify(|n| *n = n.saturating_sub(1));
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                let (reason, job) = match e {
                    mpsc::error::TrySendError::Full(job) => ("full", job),
                    mpsc::error::TrySendError::Closed(job) => ("closed", job),
                };
                warn!(
                    "event=patch_dropped module=store reason={} namespace={} date={} paths={}",
                    reason,
                    job.namespace,
                    job.date,
                    job.patch.len()
                );
                false
            }
        }
    }

    /// Patches queued or in flight.
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    pub fn stats(&self) -> PatchQueueStats {
        PatchQueueStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Wait until every accepted patch has been delivered or given up on.
    pub async fn idle(&self) {
        let mut rx = self.pending.subscribe();
        // The sender lives in self, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Stop accepting patches, deliver what is queued, and stop the worker.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(e) = self.worker.await {
            warn!("event=patch_queue_shutdown module=store status=error error=\"{}\"", e);
        }
    }
}

async fn deliver(
    mut receiver: mpsc::Receiver<PatchJob>,
    remote: Arc<RemoteSyncStore>,
    local: Arc<dyn LocalCache>,
    pending: Arc<watch::Sender<usize>>,
    counters: Arc<Counters>,
) {
    while let Some(job) = receiver.recv().await {
        match remote.update_paths(job.namespace, &job.date, &job.patch).await {
            Ok(stamp) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "event=patch_delivered module=store namespace={} date={} last_updated={}",
                    job.namespace,
                    job.date,
                    stamp.to_rfc3339()
                );
                if let Err(e) = local.advance_last_updated(job.namespace, &job.date, stamp).await {
                    warn!(
                        "event=patch_rebase module=store status=error namespace={} date={} error=\"{}\"",
                        job.namespace, job.date, e
                    );
                }
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "event=patch_failed module=store namespace={} date={} error=\"{}\"",
                    job.namespace, job.date, e
                );
            }
        }
        pending.send_modify(|n| *n = n.saturating_sub(1));
    }
}
