//! Daily record database operations.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use super::{Database, DbError, DbResult};
use crate::guard::parse_timestamp;
use crate::models::Namespace;

/// A stored record document, not yet passed through the guard.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub date: String,
    pub payload: Value,
    pub last_updated: Option<String>,
}

/// Table holding the records of a namespace.
pub(super) fn records_table(namespace: Namespace) -> &'static str {
    match namespace {
        Namespace::Production => "daily_records",
        Namespace::Demo => "demo_daily_records",
    }
}

impl Database {
    /// Get the record stored for a date.
    pub fn get_record(&self, namespace: Namespace, date: &str) -> DbResult<Option<StoredRecord>> {
        let sql = format!(
            "SELECT date, payload, last_updated FROM {} WHERE date = ?",
            records_table(namespace)
        );
        self.conn
            .query_row(&sql, [date], |row| {
                Ok(RecordRow {
                    date: row.get(0)?,
                    payload: row.get(1)?,
                    last_updated: row.get(2)?,
                })
            })
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Insert or replace the record for a date.
    pub fn put_record(
        &self,
        namespace: Namespace,
        date: &str,
        payload: &Value,
        last_updated: Option<&str>,
    ) -> DbResult<()> {
        let payload_json = serde_json::to_string(payload)?;
        let sql = format!(
            r#"
            INSERT INTO {} (date, payload, last_updated, stored_at)
            VALUES (?1, ?2, ?3, datetime('now'))
            ON CONFLICT(date) DO UPDATE SET
                payload = excluded.payload,
                last_updated = excluded.last_updated,
                stored_at = excluded.stored_at
            "#,
            records_table(namespace)
        );
        self.conn
            .execute(&sql, params![date, payload_json, last_updated])?;
        Ok(())
    }

    /// Insert the record only if the date has no entry yet.
    ///
    /// Returns true if a row was written.
    pub fn insert_record_if_absent(
        &self,
        namespace: Namespace,
        date: &str,
        payload: &Value,
        last_updated: Option<&str>,
    ) -> DbResult<bool> {
        let payload_json = serde_json::to_string(payload)?;
        let sql = format!(
            "INSERT OR IGNORE INTO {} (date, payload, last_updated) VALUES (?1, ?2, ?3)",
            records_table(namespace)
        );
        let rows = self
            .conn
            .execute(&sql, params![date, payload_json, last_updated])?;
        Ok(rows > 0)
    }

    /// Move a stored record's `lastUpdated` forward to `stamp`.
    ///
    /// Only the timestamp changes; the rest of the payload is left as
    /// stored. Returns false if the record is missing or already at or past
    /// `stamp`.
    pub fn advance_last_updated(
        &self,
        namespace: Namespace,
        date: &str,
        stamp: DateTime<Utc>,
    ) -> DbResult<bool> {
        let Some(mut stored) = self.get_record(namespace, date)? else {
            return Ok(false);
        };
        let current = stored.payload.get("lastUpdated").and_then(parse_timestamp);
        if current.is_some_and(|ts| ts >= stamp) {
            return Ok(false);
        }
        let Value::Object(fields) = &mut stored.payload else {
            return Ok(false);
        };

        let stamp = stamp.to_rfc3339_opts(SecondsFormat::Nanos, true);
        fields.insert("lastUpdated".into(), Value::String(stamp.clone()));
        let sql = format!(
            "UPDATE {} SET payload = ?1, last_updated = ?2, stored_at = datetime('now') WHERE date = ?3",
            records_table(namespace)
        );
        let rows = self.conn.execute(
            &sql,
            params![serde_json::to_string(&stored.payload)?, stamp, date],
        )?;
        Ok(rows > 0)
    }

    /// Delete the record for a date. Returns true if a row was removed.
    pub fn delete_record(&self, namespace: Namespace, date: &str) -> DbResult<bool> {
        let sql = format!("DELETE FROM {} WHERE date = ?", records_table(namespace));
        let rows = self.conn.execute(&sql, [date])?;
        Ok(rows > 0)
    }

    /// List records whose date key starts with `prefix`, in date order.
    ///
    /// `"2025-03"` selects a month, `""` selects everything.
    pub fn scan_records(&self, namespace: Namespace, prefix: &str) -> DbResult<Vec<StoredRecord>> {
        let sql = format!(
            r#"
            SELECT date, payload, last_updated FROM {}
            WHERE substr(date, 1, length(?1)) = ?1
            ORDER BY date
            "#,
            records_table(namespace)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([prefix], |row| {
            Ok(RecordRow {
                date: row.get(0)?,
                payload: row.get(1)?,
                last_updated: row.get(2)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.try_into()?);
        }
        Ok(records)
    }

    /// Count records in a namespace.
    pub fn count_records(&self, namespace: Namespace) -> DbResult<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", records_table(namespace));
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        usize::try_from(count).map_err(|_| DbError::Constraint(format!("negative count {}", count)))
    }
}

/// Internal row type for database mapping.
struct RecordRow {
    date: String,
    payload: String,
    last_updated: Option<String>,
}

impl TryFrom<RecordRow> for StoredRecord {
    type Error = DbError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        Ok(StoredRecord {
            date: row.date,
            payload: serde_json::from_str(&row.payload)?,
            last_updated: row.last_updated,
        })
    }
}
