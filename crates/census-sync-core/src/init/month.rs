//! Month integrity: backfill missing days.

use chrono::NaiveDate;
use log::{info, warn};

use super::DayInitializer;
use crate::models::record_date_key;
use crate::{SyncError, SyncResult};

/// A day that could not be initialized.
#[derive(Debug, Clone, PartialEq)]
pub struct DayFailure {
    pub date: String,
    pub error: String,
}

/// Outcome of [`DayInitializer::ensure_month_integrity`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonthIntegrityReport {
    /// True when no day failed
    pub success: bool,
    /// Dates created by this run, in order
    pub initialized_dates: Vec<String>,
    pub failures: Vec<DayFailure>,
    /// Days checked
    pub total_days: u32,
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    u32::try_from(next.signed_duration_since(first).num_days()).ok()
}

impl DayInitializer<'_> {
    /// Make sure days `1..=up_to_day` of a month exist locally.
    ///
    /// Each missing day is initialized against the day before it, so a gap
    /// is filled in order and carries the census forward. `up_to_day` is
    /// clamped to the month's length. Per-day failures are collected in the
    /// report; running twice initializes nothing the second time.
    pub async fn ensure_month_integrity(
        &self,
        year: i32,
        month: u32,
        up_to_day: u32,
    ) -> SyncResult<MonthIntegrityReport> {
        let days = days_in_month(year, month)
            .ok_or_else(|| SyncError::InvalidInput(format!("invalid month {}-{}", year, month)))?;
        let last_day = up_to_day.min(days);

        let mut report = MonthIntegrityReport {
            total_days: last_day,
            ..Default::default()
        };
        let namespace = self.store.namespace();

        for day in 1..=last_day {
            let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
                continue;
            };
            let key = record_date_key(date);

            match self.store.local().get(namespace, &key).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        "event=month_integrity module=init status=day_failed date={} error=\"{}\"",
                        key, e
                    );
                    report.failures.push(DayFailure {
                        date: key,
                        error: e.to_string(),
                    });
                    continue;
                }
            }

            let previous = date.pred_opt().map(record_date_key);
            match self.initialize_day(&key, previous.as_deref()).await {
                Ok(_) => report.initialized_dates.push(key),
                Err(e) => {
                    warn!(
                        "event=month_integrity module=init status=day_failed date={} error=\"{}\"",
                        key, e
                    );
                    report.failures.push(DayFailure {
                        date: key,
                        error: e.to_string(),
                    });
                }
            }
        }

        report.success = report.failures.is_empty();
        info!(
            "event=month_integrity module=init namespace={} month={:04}-{:02} checked={} initialized={} failed={}",
            namespace,
            year,
            month,
            report.total_days,
            report.initialized_dates.len(),
            report.failures.len()
        );
        Ok(report)
    }
}
