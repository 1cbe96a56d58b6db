//! Census Sync Core Library
//!
//! Offline-first synchronization engine for a hospital's daily bed-census record.
//!
//! # Architecture
//!
//! ```text
//!                         Caller (ward UI, reports)
//!                                   │
//!                        ┌──────────▼──────────┐
//!                        │     RecordStore      │  namespace routing, patches
//!                        └───┬─────────────┬───┘
//!               always first │             │ opportunistic
//!                 ┌──────────▼───┐   ┌─────▼──────────────┐
//!                 │  LocalCache  │   │  RemoteSyncStore   │  snapshot → write
//!                 │   (SQLite)   │   │  + RetryPolicy     │  staleness check
//!                 └──────────────┘   └─────┬──────────────┘
//!                                          │
//!                                   RemoteBackend (shared)
//! ```
//!
//! Every document read from either backend passes through the [`guard`] before
//! it is trusted.
//!
//! # Core Principle
//!
//! **The local cache is the source of truth for the editor at the screen.** Remote
//! failures degrade to an offline state; only a detected lost update
//! ([`SyncError::Concurrency`]) interrupts the caller.
//!
//! # Modules
//!
//! - [`db`]: SQLite persistence for production/demo records and legacy migration
//! - [`cache`]: Local cache contract and its SQLite implementation
//! - [`remote`]: Remote backend contract, guarded store, in-memory backend
//! - [`guard`]: Strict validation and repair of semi-structured records
//! - [`store`]: The record store facade and its background patch queue
//! - [`init`]: Day initialization with shift carry-over, month backfill
//! - [`retry`]: Bounded exponential-backoff retries
//! - [`config`], [`logging`]: Ambient configuration and file logging

pub mod cache;
pub mod config;
pub mod db;
pub mod guard;
pub mod init;
pub mod logging;
pub mod models;
pub mod patch;
pub mod remote;
pub mod retry;
pub mod store;

// Re-export commonly used types
pub use cache::{CacheError, LocalCache, SqliteCache};
pub use config::{ConfigError, SyncConfig};
pub use db::Database;
pub use guard::{repair_and_validate, repair_array_shape, strict_validate, ValidationError};
pub use init::{DayInitializer, MonthIntegrityReport};
pub use models::{DailyRecord, HistorySnapshot, Namespace, PatientSlot};
pub use patch::FieldPatch;
pub use remote::{InMemoryRemote, RemoteBackend, RemoteError, RemoteSyncStore};
pub use retry::{with_retry, RetryPolicy};
pub use store::{RecordStore, SaveOutcome};

use chrono::{DateTime, Utc};

// =========================================================================
// Crate Error Type
// =========================================================================

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(
        "Record {date} was changed remotely at {remote_updated} after base version {base}; resync before saving"
    )]
    Concurrency {
        date: String,
        remote_updated: DateTime<Utc>,
        base: DateTime<Utc>,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    #[error("Local cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Remote store error: {0}")]
    Remote(String),

    #[error("Remote sync is disabled for the active mode")]
    RemoteDisabled,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<RemoteError> for SyncError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Conflict {
                date,
                remote_updated,
                base,
            } => SyncError::Concurrency {
                date,
                remote_updated,
                base,
            },
            other if other.is_transient() => SyncError::TransientIo(other.to_string()),
            other => SyncError::Remote(other.to_string()),
        }
    }
}

impl From<patch::PatchError> for SyncError {
    fn from(e: patch::PatchError) -> Self {
        SyncError::InvalidInput(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
