//! SQLite schema definition.

/// Complete database schema for the local census cache.
pub const SCHEMA: &str = r#"
-- ============================================================================
-- Daily Records
-- ============================================================================

-- Production records, one row per calendar date
CREATE TABLE IF NOT EXISTS daily_records (
    date TEXT PRIMARY KEY,                       -- YYYY-MM-DD
    payload TEXT NOT NULL,                       -- JSON document
    last_updated TEXT,                           -- record's lastUpdated, RFC 3339
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Demo records; same layout, never mixed with production
CREATE TABLE IF NOT EXISTS demo_daily_records (
    date TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    last_updated TEXT,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- ============================================================================
-- Legacy Store
-- ============================================================================

-- Single-blob key-value store used by earlier releases.
-- Each value is a JSON object mapping date -> record.
CREATE TABLE IF NOT EXISTS legacy_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- ============================================================================
-- Cache Metadata
-- ============================================================================

CREATE TABLE IF NOT EXISTS cache_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
