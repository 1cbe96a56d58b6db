//! Cache metadata and one-time migration from the legacy blob store.

use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use super::records::records_table;
use super::{Database, DbResult};
use crate::models::Namespace;

/// Legacy key holding every production record as one JSON object.
pub const LEGACY_PRODUCTION_KEY: &str = "census_records";
/// Legacy key holding every demo record as one JSON object.
pub const LEGACY_DEMO_KEY: &str = "census_demo_records";

/// Meta key set once the legacy store has been migrated.
pub const LEGACY_MIGRATED_FLAG: &str = "legacy_migrated";

/// Outcome of a legacy migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyMigration {
    /// Records copied into the production table
    pub production: usize,
    /// Records copied into the demo table
    pub demo: usize,
    /// Dates skipped because the new table already had them
    pub skipped: usize,
}

fn legacy_key(namespace: Namespace) -> &'static str {
    match namespace {
        Namespace::Production => LEGACY_PRODUCTION_KEY,
        Namespace::Demo => LEGACY_DEMO_KEY,
    }
}

impl Database {
    /// Read a metadata value.
    pub fn get_meta(&self, key: &str) -> DbResult<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM cache_meta WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    /// Write a metadata value.
    pub fn set_meta(&self, key: &str, value: &str) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO cache_meta (key, value, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    /// Check whether the legacy store has already been migrated.
    pub fn legacy_migrated(&self) -> DbResult<bool> {
        Ok(self.get_meta(LEGACY_MIGRATED_FLAG)?.as_deref() == Some("1"))
    }

    /// Store a legacy blob (used when importing old installs and in tests).
    pub fn put_legacy_blob(&self, namespace: Namespace, blob: &Value) -> DbResult<()> {
        let json = serde_json::to_string(blob)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO legacy_store (key, value) VALUES (?1, ?2)",
            params![legacy_key(namespace), json],
        )?;
        Ok(())
    }

    /// Read a legacy blob.
    pub fn get_legacy_blob(&self, namespace: Namespace) -> DbResult<Option<Value>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM legacy_store WHERE key = ?",
                [legacy_key(namespace)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
    }

    /// Copy legacy records into the per-namespace tables.
    ///
    /// Runs in one transaction. Dates that already exist are left alone, and
    /// the flag is set so subsequent calls return `None` without touching
    /// anything.
    pub fn migrate_legacy(&mut self) -> DbResult<Option<LegacyMigration>> {
        if self.legacy_migrated()? {
            return Ok(None);
        }

        let blobs = [
            (Namespace::Production, self.get_legacy_blob(Namespace::Production)?),
            (Namespace::Demo, self.get_legacy_blob(Namespace::Demo)?),
        ];

        let tx = self.transaction()?;
        let mut outcome = LegacyMigration::default();

        for (namespace, blob) in blobs {
            let Some(Value::Object(entries)) = blob else {
                continue;
            };
            let sql = format!(
                "INSERT OR IGNORE INTO {} (date, payload, last_updated) VALUES (?1, ?2, ?3)",
                records_table(namespace)
            );

            for (date, record) in entries {
                let last_updated = record
                    .get("lastUpdated")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let payload = serde_json::to_string(&record)?;
                let rows = tx.execute(&sql, params![date, payload, last_updated])?;
                match (rows > 0, namespace) {
                    (true, Namespace::Production) => outcome.production += 1,
                    (true, Namespace::Demo) => outcome.demo += 1,
                    (false, _) => outcome.skipped += 1,
                }
            }
        }

        tx.execute(
            "INSERT OR REPLACE INTO cache_meta (key, value, updated_at) VALUES (?1, '1', datetime('now'))",
            [LEGACY_MIGRATED_FLAG],
        )?;
        tx.commit()?;

        Ok(Some(outcome))
    }
}
