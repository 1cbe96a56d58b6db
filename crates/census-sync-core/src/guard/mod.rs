//! Schema guard for records read from either backend.
//!
//! Documents are semi-structured: older clients, partial writes and the
//! remote store's lack of array addressing all leave shapes behind that the
//! typed model does not accept. The guard offers two paths:
//!
//! - [`strict_validate`]: all-or-nothing typed decode plus invariant checks.
//! - [`repair_and_validate`]: never fails; malformed fields are replaced by
//!   empty defaults and every repair is logged.
//!
//! Both run [`bridge_absence`] first.

mod repair;
mod shape;

pub use repair::{repair, repair_and_validate, Repair, Repaired};
pub use shape::{bridge_absence, parse_timestamp, repair_array_shape, ABSENT_WHEN_NULL};

use log::debug;
use serde_json::Value;
use thiserror::Error;

use crate::models::{parse_record_date, DailyRecord, PatientSlot, NURSE_SLOTS, TECHNICIAN_SLOTS};

/// Strict validation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Record is not a JSON object")]
    NotAnObject,

    #[error("Field `{field}`: {reason}")]
    Field { field: String, reason: String },

    #[error("Decode failed: {0}")]
    Decode(String),
}

impl ValidationError {
    fn field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::Field {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Decode a raw document into a record, rejecting anything malformed.
pub fn strict_validate(raw: &Value) -> ValidationResult<DailyRecord> {
    if !raw.is_object() {
        return Err(ValidationError::NotAnObject);
    }
    let bridged = bridge_absence(raw.clone());
    let record: DailyRecord =
        serde_json::from_value(bridged).map_err(|e| ValidationError::Decode(e.to_string()))?;

    check_invariants(&record)?;
    Ok(record)
}

fn check_invariants(record: &DailyRecord) -> ValidationResult<()> {
    if parse_record_date(&record.date).is_none() {
        return Err(ValidationError::field("date", "expected YYYY-MM-DD"));
    }

    let rosters = [
        ("nursesDayShift", &record.nurses_day_shift, NURSE_SLOTS),
        ("nursesNightShift", &record.nurses_night_shift, NURSE_SLOTS),
        ("techniciansDayShift", &record.technicians_day_shift, TECHNICIAN_SLOTS),
        ("techniciansNightShift", &record.technicians_night_shift, TECHNICIAN_SLOTS),
    ];
    for (field, roster, expected) in rosters {
        if roster.len() != expected {
            return Err(ValidationError::field(
                field,
                format!("expected {} slots, found {}", expected, roster.len()),
            ));
        }
    }

    for (key, slot) in &record.beds {
        if &slot.bed_id != key {
            return Err(ValidationError::field(
                format!("beds.{}.bedId", key),
                format!("does not match its key (found `{}`)", slot.bed_id),
            ));
        }
        if slot
            .clinical_crib
            .as_deref()
            .is_some_and(|crib: &PatientSlot| crib.clinical_crib.is_some())
        {
            return Err(ValidationError::field(
                format!("beds.{}.clinicalCrib.clinicalCrib", key),
                "sub-occupants cannot nest",
            ));
        }
    }

    Ok(())
}

/// Strict decode, falling back to repair.
///
/// This is the path every read from a backend takes.
pub fn decode_or_repair(raw: &Value, fallback_date: &str) -> DailyRecord {
    match strict_validate(raw) {
        Ok(record) => record,
        Err(e) => {
            debug!(
                "event=strict_validate status=rejected date={} error=\"{}\"",
                fallback_date, e
            );
            repair_and_validate(raw, fallback_date)
        }
    }
}
