//! Daily census record and bed slot models.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::events::{DischargeEvent, ProcedureEvent, TransferEvent};

/// Number of nurse slots per shift.
pub const NURSE_SLOTS: usize = 2;
/// Number of technician slots per shift.
pub const TECHNICIAN_SLOTS: usize = 3;

/// Date key format used by both backends.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a `YYYY-MM-DD` record key.
pub fn parse_record_date(date: &str) -> Option<NaiveDate> {
    if date.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(date, DATE_FORMAT).ok()
}

/// Format a calendar date as a record key.
pub fn record_date_key(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// One bed in the census.
///
/// A slot optionally nests a clinical sub-occupant (`clinical_crib`), e.g. a
/// newborn sharing the mother's bed. The sub-occupant has the same shape but
/// never nests another one.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatientSlot {
    /// Bed identifier (matches the key in `DailyRecord::beds`)
    pub bed_id: String,
    /// Patient name; empty when the bed is free
    #[serde(default)]
    pub patient_name: String,
    /// National identifier
    #[serde(default)]
    pub rut: String,
    #[serde(default)]
    pub age: String,
    #[serde(default)]
    pub diagnosis: String,
    #[serde(default)]
    pub specialty: String,
    /// Clinical status (e.g. "stable", "serious")
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub admission_date: String,
    /// Invasive devices (CVC, urinary catheter, ...)
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default)]
    pub is_blocked: bool,
    #[serde(default)]
    pub block_reason: String,
    /// Nursing handoff note written by the day shift
    #[serde(default)]
    pub handoff_note_day_shift: String,
    /// Nursing handoff note written by the night shift
    #[serde(default)]
    pub handoff_note_night_shift: String,
    /// Nested sub-occupant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinical_crib: Option<Box<PatientSlot>>,
}

impl PatientSlot {
    /// Create an empty slot for a bed.
    pub fn empty(bed_id: impl Into<String>) -> Self {
        Self {
            bed_id: bed_id.into(),
            ..Default::default()
        }
    }

    /// Check if a patient occupies this slot.
    pub fn is_occupied(&self) -> bool {
        !self.patient_name.trim().is_empty()
    }
}

/// Medical handoff signature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MedicalSignature {
    pub doctor_name: String,
    pub signed_at: DateTime<Utc>,
}

/// The complete census state for one calendar date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailyRecord {
    /// Primary key, `YYYY-MM-DD`
    pub date: String,
    /// Bed identifier -> slot; contains every configured bed
    pub beds: BTreeMap<String, PatientSlot>,
    #[serde(default)]
    pub discharge_log: Vec<DischargeEvent>,
    #[serde(default)]
    pub transfer_log: Vec<TransferEvent>,
    #[serde(default)]
    pub day_procedure_log: Vec<ProcedureEvent>,
    /// Always `NURSE_SLOTS` long
    pub nurses_day_shift: Vec<String>,
    /// Always `NURSE_SLOTS` long
    pub nurses_night_shift: Vec<String>,
    /// Always `TECHNICIAN_SLOTS` long
    pub technicians_day_shift: Vec<String>,
    /// Always `TECHNICIAN_SLOTS` long
    pub technicians_night_shift: Vec<String>,
    /// Concurrency anchor; non-decreasing across writes
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_day_checklist: Option<BTreeMap<String, bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_night_checklist: Option<BTreeMap<String, bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_novedades_day_shift: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_novedades_night_shift: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medical_signature: Option<MedicalSignature>,
    /// Doctor assigned to the medical handoff
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medical_handoff_doctor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medical_handoff_sent_at: Option<DateTime<Utc>>,
    /// Top-level fields written by newer clients; carried through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DailyRecord {
    /// Create a record with no beds and empty rosters.
    pub fn empty(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            beds: BTreeMap::new(),
            discharge_log: Vec::new(),
            transfer_log: Vec::new(),
            day_procedure_log: Vec::new(),
            nurses_day_shift: vec![String::new(); NURSE_SLOTS],
            nurses_night_shift: vec![String::new(); NURSE_SLOTS],
            technicians_day_shift: vec![String::new(); TECHNICIAN_SLOTS],
            technicians_night_shift: vec![String::new(); TECHNICIAN_SLOTS],
            last_updated: Utc::now(),
            handoff_day_checklist: None,
            handoff_night_checklist: None,
            handoff_novedades_day_shift: None,
            handoff_novedades_night_shift: None,
            medical_signature: None,
            medical_handoff_doctor: None,
            medical_handoff_sent_at: None,
            extra: Map::new(),
        }
    }

    /// Create a blank record seeded with an empty slot for every bed.
    pub fn blank<S: AsRef<str>>(date: impl Into<String>, bed_ids: &[S]) -> Self {
        let mut record = Self::empty(date);
        record.ensure_beds(bed_ids);
        record
    }

    /// Insert empty slots for configured beds missing from the map.
    ///
    /// Returns the number of slots added.
    pub fn ensure_beds<S: AsRef<str>>(&mut self, bed_ids: &[S]) -> usize {
        let mut added = 0;
        for bed_id in bed_ids {
            let bed_id = bed_id.as_ref();
            if !self.beds.contains_key(bed_id) {
                self.beds
                    .insert(bed_id.to_string(), PatientSlot::empty(bed_id));
                added += 1;
            }
        }
        added
    }

    /// Beds with a patient in them, in key order.
    pub fn occupied_beds(&self) -> impl Iterator<Item = (&String, &PatientSlot)> {
        self.beds.iter().filter(|(_, slot)| slot.is_occupied())
    }

    /// Number of occupied beds, counting nested sub-occupants.
    pub fn occupancy(&self) -> usize {
        self.beds
            .values()
            .map(|slot| {
                usize::from(slot.is_occupied())
                    + usize::from(slot.clinical_crib.as_deref().is_some_and(PatientSlot::is_occupied))
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_record_has_every_bed() {
        let record = DailyRecord::blank("2025-03-01", &["R1", "R2", "NEO1"]);
        assert_eq!(record.beds.len(), 3);
        assert_eq!(record.beds["NEO1"].bed_id, "NEO1");
        assert!(!record.beds["R1"].is_occupied());
        assert_eq!(record.nurses_day_shift.len(), NURSE_SLOTS);
        assert_eq!(record.technicians_night_shift.len(), TECHNICIAN_SLOTS);
    }

    #[test]
    fn test_ensure_beds_keeps_existing_slots() {
        let mut record = DailyRecord::blank("2025-03-01", &["R1"]);
        record.beds.get_mut("R1").unwrap().patient_name = "Ana".into();

        let added = record.ensure_beds(&["R1", "R2"]);
        assert_eq!(added, 1);
        assert_eq!(record.beds["R1"].patient_name, "Ana");
        assert!(record.beds.contains_key("R2"));
    }

    #[test]
    fn test_occupancy_counts_crib() {
        let mut record = DailyRecord::blank("2025-03-01", &["R1", "R2"]);
        let slot = record.beds.get_mut("R1").unwrap();
        slot.patient_name = "Maria".into();
        let mut crib = PatientSlot::empty("R1");
        crib.patient_name = "RN Maria".into();
        slot.clinical_crib = Some(Box::new(crib));

        assert_eq!(record.occupancy(), 2);
        assert_eq!(record.occupied_beds().count(), 1);
    }

    #[test]
    fn test_parse_record_date() {
        assert!(parse_record_date("2025-03-01").is_some());
        assert!(parse_record_date("2025-3-1").is_none());
        assert!(parse_record_date("2025-02-30").is_none());
        assert!(parse_record_date("R1").is_none());
    }

    #[test]
    fn test_unknown_fields_survive_serde() {
        let mut record = DailyRecord::blank("2025-03-01", &["R1"]);
        record
            .extra
            .insert("cudyrScores".into(), serde_json::json!({"R1": "A1"}));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["cudyrScores"]["R1"], "A1");

        let back: DailyRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
