//! Record store facade.
//!
//! Callers only talk to [`RecordStore`]. Every write lands in the local cache
//! first; the remote store is reached opportunistically and its failures
//! degrade to an offline state. Only a detected lost update
//! ([`SyncError::Concurrency`]) reaches the caller.

mod queue;

pub use queue::{PatchJob, PatchQueue, PatchQueueStats};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{error, info, warn};

use crate::cache::{LocalCache, SqliteCache};
use crate::config::SyncConfig;
use crate::guard::decode_or_repair;
use crate::models::{parse_record_date, DailyRecord, HistorySnapshot, Namespace};
use crate::patch::{apply_patch, validate_patch, ArrayPolicy, FieldPatch};
use crate::remote::{RecordCallback, RemoteBackend, RemoteError, RemoteSyncStore, Subscription};
use crate::retry::RetryPolicy;
use crate::{SyncError, SyncResult};

/// Result of a successful [`RecordStore::save`].
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// Written locally and remotely; the record now carries the server's
    /// `lastUpdated`
    Synced { last_updated: DateTime<Utc> },
    /// Written locally; remote sync is off for the active mode
    LocalOnly,
    /// Written locally; the remote write failed and was logged
    RemoteFailed(String),
}

impl SaveOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, SaveOutcome::Synced { .. })
    }
}

/// The offline-first record store.
pub struct RecordStore {
    local: Arc<dyn LocalCache>,
    remote: Option<Arc<RemoteSyncStore>>,
    patches: Option<PatchQueue>,
    bed_ids: Vec<String>,
    remote_enabled: AtomicBool,
    demo_mode: AtomicBool,
}

impl RecordStore {
    /// Build a store over the given backends.
    ///
    /// With a remote backend this starts the patch queue worker, so it must be
    /// called from within a tokio runtime.
    pub fn new(
        config: &SyncConfig,
        local: Arc<dyn LocalCache>,
        remote: Option<Arc<dyn RemoteBackend>>,
    ) -> SyncResult<Self> {
        config.validate()?;

        let retry = RetryPolicy::from(&config.retry);
        let remote = remote.map(|backend| Arc::new(RemoteSyncStore::new(backend, retry)));
        let patches = remote
            .as_ref()
            .map(|r| PatchQueue::spawn(Arc::clone(r), Arc::clone(&local), config.patch_queue_capacity))
            .transpose()?;

        Ok(Self {
            local,
            remote,
            patches,
            bed_ids: config.bed_ids.clone(),
            remote_enabled: AtomicBool::new(config.remote_enabled),
            demo_mode: AtomicBool::new(config.demo_mode),
        })
    }

    /// Build a store with a SQLite cache at `config.database_path`
    /// (in memory when unset).
    pub fn open(config: &SyncConfig, remote: Option<Arc<dyn RemoteBackend>>) -> SyncResult<Self> {
        let cache = match &config.database_path {
            Some(path) => SqliteCache::open(path)?,
            None => SqliteCache::open_in_memory()?,
        };
        Self::new(config, Arc::new(cache), remote)
    }

    /// Namespace of the active mode.
    pub fn namespace(&self) -> Namespace {
        if self.demo_mode.load(Ordering::SeqCst) {
            Namespace::Demo
        } else {
            Namespace::Production
        }
    }

    pub fn is_remote_enabled(&self) -> bool {
        self.remote_enabled.load(Ordering::SeqCst)
    }

    pub fn is_demo_mode(&self) -> bool {
        self.demo_mode.load(Ordering::SeqCst)
    }

    /// Configured bed identifiers.
    pub fn bed_ids(&self) -> &[String] {
        &self.bed_ids
    }

    pub(crate) fn local(&self) -> &Arc<dyn LocalCache> {
        &self.local
    }

    /// The remote store, if writes in the active mode should reach it.
    ///
    /// Demo data never leaves the device.
    pub(crate) fn remote_route(&self) -> Option<&Arc<RemoteSyncStore>> {
        if self.is_remote_enabled() && !self.is_demo_mode() {
            self.remote.as_ref()
        } else {
            None
        }
    }

    /// Turn remote sync on or off.
    pub fn set_remote_enabled(&self, enabled: bool) {
        self.remote_enabled.store(enabled, Ordering::SeqCst);
        info!("event=routing module=store remote_enabled={}", enabled);
    }

    /// Switch between the production and demo namespaces.
    pub fn set_demo_mode_active(&self, active: bool) {
        self.demo_mode.store(active, Ordering::SeqCst);
        info!("event=routing module=store demo_mode={}", active);
    }

    /// Read the local record for a date.
    pub async fn get_for_date(&self, date: &str) -> SyncResult<Option<DailyRecord>> {
        check_date(date)?;
        Ok(self.local.get(self.namespace(), date).await?)
    }

    /// Save a whole record.
    ///
    /// The local write happens first and is never rolled back. With
    /// `expected_base`, a remote copy changed after that timestamp fails the
    /// call with [`SyncError::Concurrency`]; any other remote failure is
    /// logged and reported as [`SaveOutcome::RemoteFailed`].
    pub async fn save(&self, mut record: DailyRecord, expected_base: Option<DateTime<Utc>>) -> SyncResult<SaveOutcome> {
        check_date(&record.date)?;
        let namespace = self.namespace();

        record.ensure_beds(&self.bed_ids);
        record.last_updated = Utc::now();
        self.put_local(namespace, &record).await?;

        let Some(remote) = self.remote_route() else {
            info!(
                "event=record_save module=store status=local_only namespace={} date={}",
                namespace, record.date
            );
            return Ok(SaveOutcome::LocalOnly);
        };

        match remote.save_full_document(namespace, &record, expected_base).await {
            Ok(stamped) => {
                record.last_updated = stamped;
                self.put_local(namespace, &record).await?;
                info!(
                    "event=record_save module=store status=ok namespace={} date={} last_updated={}",
                    namespace, record.date, stamped
                );
                Ok(SaveOutcome::Synced { last_updated: stamped })
            }
            Err(e @ RemoteError::Conflict { .. }) => Err(e.into()),
            Err(e) => {
                warn!(
                    "event=record_save module=store status=remote_failed namespace={} date={} error=\"{}\"",
                    namespace, record.date, e
                );
                Ok(SaveOutcome::RemoteFailed(e.to_string()))
            }
        }
    }

    /// Merge field paths into the local record and queue the same patch for
    /// the remote store.
    ///
    /// A missing local record starts from a blank one. `lastUpdated` is left
    /// unchanged until the remote accepts the patch, then takes the server's
    /// stamp; take a save base after [`RecordStore::flush_remote`]. Returns
    /// the updated record.
    pub async fn update_partial(&self, date: &str, patch: FieldPatch) -> SyncResult<DailyRecord> {
        check_date(date)?;
        validate_patch(&patch)?;
        let namespace = self.namespace();

        let current = match self.local.get(namespace, date).await? {
            Some(record) => record,
            None => DailyRecord::blank(date, &self.bed_ids),
        };

        let mut doc = serde_json::to_value(&current)?;
        apply_patch(&mut doc, &patch, ArrayPolicy::Index)?;
        let mut updated = decode_or_repair(&doc, date);
        updated.ensure_beds(&self.bed_ids);

        self.put_local(namespace, &updated).await?;

        if let (Some(_), Some(queue)) = (self.remote_route(), &self.patches) {
            queue.enqueue(PatchJob {
                namespace,
                date: date.to_string(),
                patch,
            });
        }

        Ok(updated)
    }

    /// Delete a day from both stores. Remote history is kept.
    pub async fn delete_day(&self, date: &str) -> SyncResult<()> {
        check_date(date)?;
        let namespace = self.namespace();

        self.local.delete(namespace, date).await?;

        if let Some(remote) = self.remote_route() {
            if let Err(e) = remote.delete_document(namespace, date).await {
                warn!(
                    "event=record_delete module=store status=remote_failed namespace={} date={} error=\"{}\"",
                    namespace, date, e
                );
            }
        }

        info!(
            "event=record_delete module=store status=ok namespace={} date={}",
            namespace, date
        );
        Ok(())
    }

    /// Replace the local copy with the remote one.
    ///
    /// Returns `None`, leaving the local copy alone, if the remote has no
    /// record for the date.
    pub async fn resync_from_remote(&self, date: &str) -> SyncResult<Option<DailyRecord>> {
        check_date(date)?;
        let namespace = self.namespace();
        let remote = self.remote_route().ok_or(SyncError::RemoteDisabled)?;

        let Some(mut record) = remote.fetch(namespace, date).await? else {
            return Ok(None);
        };
        record.ensure_beds(&self.bed_ids);
        self.put_local(namespace, &record).await?;

        info!(
            "event=record_resync module=store status=ok namespace={} date={} last_updated={}",
            namespace, date, record.last_updated
        );
        Ok(Some(record))
    }

    /// Subscribe to remote changes of a date.
    pub fn watch(&self, date: &str, callback: RecordCallback) -> SyncResult<Subscription> {
        check_date(date)?;
        let remote = self.remote_route().ok_or(SyncError::RemoteDisabled)?;
        Ok(remote.watch(self.namespace(), date, callback))
    }

    /// Local records of one month, in date order.
    pub async fn month_records(&self, year: i32, month: u32) -> SyncResult<Vec<DailyRecord>> {
        if !(1..=12).contains(&month) {
            return Err(SyncError::InvalidInput(format!("invalid month {}", month)));
        }
        let prefix = format!("{:04}-{:02}-", year, month);
        Ok(self.local.scan_by_prefix(self.namespace(), &prefix).await?)
    }

    /// Copy remote records with `start <= date <= end` that are missing
    /// locally. Returns the dates pulled.
    pub async fn pull_range_from_remote(&self, start: &str, end: &str) -> SyncResult<Vec<String>> {
        check_date(start)?;
        check_date(end)?;
        let namespace = self.namespace();
        let remote = self.remote_route().ok_or(SyncError::RemoteDisabled)?;

        let mut pulled = Vec::new();
        for mut record in remote.list_range(namespace, start, end).await? {
            if self.local.get(namespace, &record.date).await?.is_some() {
                continue;
            }
            record.ensure_beds(&self.bed_ids);
            self.put_local(namespace, &record).await?;
            pulled.push(record.date);
        }

        info!(
            "event=remote_backfill module=store namespace={} start={} end={} pulled={}",
            namespace,
            start,
            end,
            pulled.len()
        );
        Ok(pulled)
    }

    /// Run the one-time legacy store migration.
    pub async fn migrate_legacy(&self) -> SyncResult<bool> {
        Ok(self.local.migrate_from_legacy_store().await?)
    }

    /// Wait until queued partial updates have been delivered or given up on.
    pub async fn flush_remote(&self) {
        if let Some(queue) = &self.patches {
            queue.idle().await;
        }
    }

    pub fn patch_stats(&self) -> Option<PatchQueueStats> {
        self.patches.as_ref().map(PatchQueue::stats)
    }

    /// Audit trail of a date from the remote store.
    pub async fn history(&self, date: &str) -> SyncResult<Vec<HistorySnapshot>> {
        check_date(date)?;
        let remote = self.remote_route().ok_or(SyncError::RemoteDisabled)?;
        Ok(remote.history(self.namespace(), date).await?)
    }

    /// Deliver queued patches and stop the worker.
    pub async fn shutdown(self) {
        if let Some(queue) = self.patches {
            queue.shutdown().await;
        }
    }

    pub(crate) async fn put_local(&self, namespace: Namespace, record: &DailyRecord) -> SyncResult<()> {
        self.local.put(namespace, record).await.map_err(|e| {
            error!(
                "event=record_put module=store status=fatal namespace={} date={} error=\"{}\"",
                namespace, record.date, e
            );
            SyncError::from(e)
        })
    }
}

fn check_date(date: &str) -> SyncResult<()> {
    match parse_record_date(date) {
        Some(_) => Ok(()),
        None => Err(SyncError::InvalidInput(format!("invalid record date `{}`", date))),
    }
}
