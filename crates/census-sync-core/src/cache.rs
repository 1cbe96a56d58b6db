//! Local persistent cache: the offline source of truth.
//!
//! Records are keyed by date within a [`Namespace`]. Reads pass through the
//! guard so callers always receive a well-formed record.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::db::{Database, DbError};
use crate::guard::decode_or_repair;
use crate::models::{DailyRecord, Namespace};

/// Local cache errors. Always fatal to the operation that hit them.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Durable key-value store of daily records.
#[async_trait]
pub trait LocalCache: Send + Sync {
    /// Get the record for a date.
    async fn get(&self, namespace: Namespace, date: &str) -> CacheResult<Option<DailyRecord>>;

    /// Insert or replace a record, keyed by its date.
    async fn put(&self, namespace: Namespace, record: &DailyRecord) -> CacheResult<()>;

    /// Insert a record unless its date already has one. Returns true if
    /// this call wrote it.
    async fn put_if_absent(&self, namespace: Namespace, record: &DailyRecord) -> CacheResult<bool>;

    /// Adopt a server-assigned `lastUpdated` for a stored record, leaving
    /// its contents alone. Never moves the timestamp backwards; returns
    /// true if it changed.
    async fn advance_last_updated(&self, namespace: Namespace, date: &str, stamp: DateTime<Utc>)
        -> CacheResult<bool>;

    /// Remove the record for a date. Returns true if one existed.
    async fn delete(&self, namespace: Namespace, date: &str) -> CacheResult<bool>;

    /// Records whose date starts with `prefix`, in date order.
    async fn scan_by_prefix(&self, namespace: Namespace, prefix: &str) -> CacheResult<Vec<DailyRecord>>;

    /// One-time import from the legacy store. Returns true if this call
    /// performed the migration.
    async fn migrate_from_legacy_store(&self) -> CacheResult<bool>;
}

/// SQLite-backed [`LocalCache`].
#[derive(Clone)]
pub struct SqliteCache {
    db: Arc<Mutex<Database>>,
}

impl SqliteCache {
    /// Open (or create) the cache database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> CacheResult<Self> {
        Ok(Self::from_database(Database::open(path)?))
    }

    /// Create an in-memory cache (for tests and demo setups).
    pub fn open_in_memory() -> CacheResult<Self> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    pub fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Shared handle to the underlying database.
    pub fn database(&self) -> Arc<Mutex<Database>> {
        Arc::clone(&self.db)
    }
}

#[async_trait]
impl LocalCache for SqliteCache {
    async fn get(&self, namespace: Namespace, date: &str) -> CacheResult<Option<DailyRecord>> {
        let stored = self.db.lock().await.get_record(namespace, date)?;
        Ok(stored.map(|s| decode_or_repair(&s.payload, &s.date)))
    }

    async fn put(&self, namespace: Namespace, record: &DailyRecord) -> CacheResult<()> {
        let payload = serde_json::to_value(record)?;
        let last_updated = record.last_updated.to_rfc3339();
        let result = self
            .db
            .lock()
            .await
            .put_record(namespace, &record.date, &payload, Some(&last_updated));

        if let Err(e) = &result {
            error!(
                "event=cache_put module=cache status=error namespace={} date={} error=\"{}\"",
                namespace, record.date, e
            );
        }
        Ok(result?)
    }

    async fn put_if_absent(&self, namespace: Namespace, record: &DailyRecord) -> CacheResult<bool> {
        let payload = serde_json::to_value(record)?;
        let last_updated = record.last_updated.to_rfc3339();
        let result = self.db.lock().await.insert_record_if_absent(
            namespace,
            &record.date,
            &payload,
            Some(&last_updated),
        );

        if let Err(e) = &result {
            error!(
                "event=cache_put module=cache status=error namespace={} date={} error=\"{}\"",
                namespace, record.date, e
            );
        }
        Ok(result?)
    }

    async fn advance_last_updated(
        &self,
        namespace: Namespace,
        date: &str,
        stamp: DateTime<Utc>,
    ) -> CacheResult<bool> {
        Ok(self.db.lock().await.advance_last_updated(namespace, date, stamp)?)
    }

    async fn delete(&self, namespace: Namespace, date: &str) -> CacheResult<bool> {
        Ok(self.db.lock().await.delete_record(namespace, date)?)
    }

    async fn scan_by_prefix(&self, namespace: Namespace, prefix: &str) -> CacheResult<Vec<DailyRecord>> {
        let stored = self.db.lock().await.scan_records(namespace, prefix)?;
        Ok(stored
            .iter()
            .map(|s| decode_or_repair(&s.payload, &s.date))
            .collect())
    }

    async fn migrate_from_legacy_store(&self) -> CacheResult<bool> {
        let outcome = self.db.lock().await.migrate_legacy()?;
        match outcome {
            Some(m) => {
                info!(
                    "event=legacy_migration module=cache status=ok production={} demo={} skipped={}",
                    m.production, m.demo, m.skipped
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let cache = SqliteCache::open_in_memory().unwrap();
        let mut record = DailyRecord::blank("2025-03-01", &["R1", "R2"]);
        record.beds.get_mut("R1").unwrap().patient_name = "Ana".into();

        cache.put(Namespace::Production, &record).await.unwrap();
        let loaded = cache.get(Namespace::Production, "2025-03-01").await.unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn test_get_repairs_corrupted_payload() {
        let cache = SqliteCache::open_in_memory().unwrap();
        cache
            .database()
            .lock()
            .await
            .put_record(
                Namespace::Production,
                "2025-03-01",
                &json!({"date": "2025-03-01", "beds": {}, "nursesDayShift": {"0": "Rosa"}}),
                None,
            )
            .unwrap();

        let loaded = cache.get(Namespace::Production, "2025-03-01").await.unwrap().unwrap();
        assert_eq!(loaded.nurses_day_shift, vec!["Rosa", ""]);
        assert_eq!(loaded.technicians_day_shift.len(), 3);
    }

    #[tokio::test]
    async fn test_put_if_absent_keeps_existing_record() {
        let cache = SqliteCache::open_in_memory().unwrap();
        let mut first = DailyRecord::blank("2025-03-01", &["R1"]);
        first.beds.get_mut("R1").unwrap().patient_name = "Ana".into();
        let second = DailyRecord::blank("2025-03-01", &["R1"]);

        assert!(cache.put_if_absent(Namespace::Production, &first).await.unwrap());
        assert!(!cache.put_if_absent(Namespace::Production, &second).await.unwrap());
        let loaded = cache.get(Namespace::Production, "2025-03-01").await.unwrap().unwrap();
        assert_eq!(loaded, first);
    }

    #[tokio::test]
    async fn test_advance_last_updated_keeps_contents() {
        let cache = SqliteCache::open_in_memory().unwrap();
        let mut record = DailyRecord::blank("2025-03-01", &["R1"]);
        record.beds.get_mut("R1").unwrap().patient_name = "Ana".into();
        cache.put(Namespace::Production, &record).await.unwrap();

        let stamp = record.last_updated + chrono::Duration::milliseconds(1500);
        assert!(cache
            .advance_last_updated(Namespace::Production, "2025-03-01", stamp)
            .await
            .unwrap());
        assert!(!cache
            .advance_last_updated(Namespace::Production, "2025-03-01", record.last_updated)
            .await
            .unwrap());

        let loaded = cache.get(Namespace::Production, "2025-03-01").await.unwrap().unwrap();
        assert_eq!(loaded.last_updated, stamp);
        assert_eq!(loaded.beds["R1"].patient_name, "Ana");
    }

    #[tokio::test]
    async fn test_scan_by_prefix_orders_dates() {
        let cache = SqliteCache::open_in_memory().unwrap();
        for date in ["2025-03-03", "2025-03-01", "2025-04-01"] {
            cache
                .put(Namespace::Production, &DailyRecord::blank(date, &["R1"]))
                .await
                .unwrap();
        }

        let dates: Vec<String> = cache
            .scan_by_prefix(Namespace::Production, "2025-03")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.date)
            .collect();
        assert_eq!(dates, vec!["2025-03-01", "2025-03-03"]);
    }

    #[tokio::test]
    async fn test_legacy_migration_is_idempotent() {
        let cache = SqliteCache::open_in_memory().unwrap();
        cache
            .database()
            .lock()
            .await
            .put_legacy_blob(
                Namespace::Production,
                &json!({"2025-01-05": {"date": "2025-01-05", "beds": {}}}),
            )
            .unwrap();

        assert!(cache.migrate_from_legacy_store().await.unwrap());
        assert!(!cache.migrate_from_legacy_store().await.unwrap());
        assert!(cache.get(Namespace::Production, "2025-01-05").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_on_disk_cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let record = DailyRecord::blank("2025-03-01", &["R1"]);

        SqliteCache::open(&path)
            .unwrap()
            .put(Namespace::Demo, &record)
            .await
            .unwrap();

        let reopened = SqliteCache::open(&path).unwrap();
        assert_eq!(reopened.get(Namespace::Demo, "2025-03-01").await.unwrap(), Some(record));
        assert!(reopened.get(Namespace::Production, "2025-03-01").await.unwrap().is_none());
    }
}
