//! Best-effort repair of malformed records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::warn;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::shape::{parse_timestamp, repair_array_shape, strip_null_sentinels};
use crate::models::{
    parse_record_date, DailyRecord, DischargeEvent, MedicalSignature, PatientSlot, ProcedureEvent,
    TransferEvent, NURSE_SLOTS, TECHNICIAN_SLOTS,
};

/// Top-level fields the typed model owns; anything else passes through.
const KNOWN_FIELDS: &[&str] = &[
    "date",
    "beds",
    "dischargeLog",
    "transferLog",
    "dayProcedureLog",
    "nursesDayShift",
    "nursesNightShift",
    "techniciansDayShift",
    "techniciansNightShift",
    "lastUpdated",
    "handoffDayChecklist",
    "handoffNightChecklist",
    "handoffNovedadesDayShift",
    "handoffNovedadesNightShift",
    "medicalSignature",
    "medicalHandoffDoctor",
    "medicalHandoffSentAt",
];

const SLOT_STRING_FIELDS: &[&str] = &[
    "patientName",
    "rut",
    "age",
    "diagnosis",
    "specialty",
    "status",
    "admissionDate",
    "blockReason",
    "handoffNoteDayShift",
    "handoffNoteNightShift",
];

/// One corrective action taken on a malformed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repair {
    /// Field path that was repaired
    pub field: String,
    pub action: String,
}

/// A repaired record and what was done to it.
#[derive(Debug, Clone)]
pub struct Repaired {
    pub record: DailyRecord,
    pub repairs: Vec<Repair>,
}

impl Repaired {
    pub fn was_clean(&self) -> bool {
        self.repairs.is_empty()
    }
}

struct Repairs(Vec<Repair>);

impl Repairs {
    fn note(&mut self, field: impl Into<String>, action: impl Into<String>) {
        self.0.push(Repair {
            field: field.into(),
            action: action.into(),
        });
    }
}

/// Repair a raw document into a record. Never fails.
pub fn repair_and_validate(raw: &Value, fallback_date: &str) -> DailyRecord {
    repair(raw, fallback_date).record
}

/// Repair a raw document, reporting each corrective action.
///
/// Each repair is logged at `warn`.
pub fn repair(raw: &Value, fallback_date: &str) -> Repaired {
    let mut repairs = Repairs(Vec::new());

    let mut map = match raw {
        Value::Object(map) => map.clone(),
        _ => {
            repairs.note("$", "replaced non-object document with empty record");
            Map::new()
        }
    };
    strip_null_sentinels(&mut map);

    let date = match map.get("date").and_then(Value::as_str) {
        Some(d) if parse_record_date(d).is_some() => d.to_string(),
        _ => {
            repairs.note("date", format!("set to {}", fallback_date));
            fallback_date.to_string()
        }
    };

    let mut record = DailyRecord::empty(date);
    record.beds = repair_beds(map.get("beds"), &mut repairs);

    record.discharge_log = repair_log::<DischargeEvent>("dischargeLog", map.get("dischargeLog"), &mut repairs);
    record.transfer_log = repair_log::<TransferEvent>("transferLog", map.get("transferLog"), &mut repairs);
    record.day_procedure_log =
        repair_log::<ProcedureEvent>("dayProcedureLog", map.get("dayProcedureLog"), &mut repairs);

    record.nurses_day_shift = repair_roster("nursesDayShift", map.get("nursesDayShift"), NURSE_SLOTS, &mut repairs);
    record.nurses_night_shift =
        repair_roster("nursesNightShift", map.get("nursesNightShift"), NURSE_SLOTS, &mut repairs);
    record.technicians_day_shift = repair_roster(
        "techniciansDayShift",
        map.get("techniciansDayShift"),
        TECHNICIAN_SLOTS,
        &mut repairs,
    );
    record.technicians_night_shift = repair_roster(
        "techniciansNightShift",
        map.get("techniciansNightShift"),
        TECHNICIAN_SLOTS,
        &mut repairs,
    );

    record.last_updated = match map.get("lastUpdated").and_then(parse_timestamp) {
        Some(ts) => ts,
        None => {
            repairs.note("lastUpdated", "reset to epoch");
            DateTime::<Utc>::UNIX_EPOCH
        }
    };

    record.handoff_day_checklist =
        optional::<BTreeMap<String, bool>>("handoffDayChecklist", &map, &mut repairs);
    record.handoff_night_checklist =
        optional::<BTreeMap<String, bool>>("handoffNightChecklist", &map, &mut repairs);
    record.handoff_novedades_day_shift = optional::<String>("handoffNovedadesDayShift", &map, &mut repairs);
    record.handoff_novedades_night_shift =
        optional::<String>("handoffNovedadesNightShift", &map, &mut repairs);
    record.medical_signature = optional::<MedicalSignature>("medicalSignature", &map, &mut repairs);
    record.medical_handoff_doctor = optional::<String>("medicalHandoffDoctor", &map, &mut repairs);
    record.medical_handoff_sent_at = match map.get("medicalHandoffSentAt") {
        None | Some(Value::Null) => None,
        Some(v) => {
            let parsed = parse_timestamp(v);
            if parsed.is_none() {
                repairs.note("medicalHandoffSentAt", "dropped unreadable timestamp");
            }
            parsed
        }
    };

    record.extra = map
        .into_iter()
        .filter(|(k, _)| !KNOWN_FIELDS.contains(&k.as_str()))
        .collect();

    for r in &repairs.0 {
        warn!(
            "event=corruption_repaired module=guard date={} field={} action=\"{}\"",
            record.date, r.field, r.action
        );
    }

    Repaired {
        record,
        repairs: repairs.0,
    }
}

fn repair_beds(value: Option<&Value>, repairs: &mut Repairs) -> BTreeMap<String, PatientSlot> {
    let Some(Value::Object(beds)) = value else {
        repairs.note("beds", "replaced with empty map");
        return BTreeMap::new();
    };

    let mut out = BTreeMap::new();
    for (bed_id, raw) in beds {
        let path = format!("beds.{}", bed_id);
        match raw {
            Value::Object(fields) => {
                out.insert(bed_id.clone(), repair_slot(bed_id, fields, true, &path, repairs));
            }
            _ => {
                repairs.note(&path, "replaced non-object slot with empty slot");
                out.insert(bed_id.clone(), PatientSlot::empty(bed_id.as_str()));
            }
        }
    }
    out
}

fn repair_slot(
    bed_id: &str,
    fields: &Map<String, Value>,
    allow_crib: bool,
    path: &str,
    repairs: &mut Repairs,
) -> PatientSlot {
    let mut fields = fields.clone();

    // Sub-occupants usually omit their own bed id.
    if fields.get("bedId").and_then(Value::as_str) != Some(bed_id) {
        if allow_crib {
            repairs.note(format!("{}.bedId", path), format!("set to {}", bed_id));
        }
        fields.insert("bedId".into(), Value::String(bed_id.to_string()));
    }

    for key in SLOT_STRING_FIELDS {
        if fields.get(*key).is_some_and(|v| !v.is_string()) {
            repairs.note(format!("{}.{}", path, key), "dropped non-string value");
            fields.remove(*key);
        }
    }

    match fields.get("devices") {
        None | Some(Value::Array(_)) => {}
        Some(_) => {
            repairs.note(format!("{}.devices", path), "replaced with empty list");
            fields.remove("devices");
        }
    }
    if let Some(Value::Array(items)) = fields.get_mut("devices") {
        let before = items.len();
        items.retain(Value::is_string);
        if items.len() != before {
            repairs.note(format!("{}.devices", path), "dropped non-string entries");
        }
    }

    if fields.get("isBlocked").is_some_and(|v| !v.is_boolean()) {
        repairs.note(format!("{}.isBlocked", path), "reset to false");
        fields.remove("isBlocked");
    }

    let crib = fields.remove("clinicalCrib");

    let mut slot: PatientSlot = serde_json::from_value(Value::Object(fields)).unwrap_or_else(|e| {
        repairs.note(path, format!("replaced undecodable slot ({})", e));
        PatientSlot::empty(bed_id)
    });

    slot.clinical_crib = match crib {
        None | Some(Value::Null) => None,
        Some(Value::Object(crib_fields)) if allow_crib => {
            let crib_path = format!("{}.clinicalCrib", path);
            Some(Box::new(repair_slot(bed_id, &crib_fields, false, &crib_path, repairs)))
        }
        Some(_) => {
            repairs.note(format!("{}.clinicalCrib", path), "dropped malformed sub-occupant");
            None
        }
    };

    slot
}

fn repair_log<T: DeserializeOwned>(field: &str, value: Option<&Value>, repairs: &mut Repairs) -> Vec<T> {
    match value {
        None => Vec::new(),
        Some(Value::Array(items)) => {
            let mut events = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match serde_json::from_value::<T>(item.clone()) {
                    Ok(event) => events.push(event),
                    Err(_) => repairs.note(format!("{}.{}", field, i), "dropped undecodable event"),
                }
            }
            events
        }
        Some(_) => {
            repairs.note(field, "replaced with empty list");
            Vec::new()
        }
    }
}

fn repair_roster(field: &str, value: Option<&Value>, expected_len: usize, repairs: &mut Repairs) -> Vec<String> {
    let roster = repair_array_shape(value.unwrap_or(&Value::Null), expected_len);
    let exact = matches!(
        value,
        Some(Value::Array(items))
            if items.len() == expected_len && items.iter().all(Value::is_string)
    );
    if !exact {
        repairs.note(field, format!("rebuilt as {} slots", expected_len));
    }
    roster
}

fn optional<T: DeserializeOwned>(field: &str, map: &Map<String, Value>, repairs: &mut Repairs) -> Option<T> {
    match map.get(field) {
        None | Some(Value::Null) => None,
        Some(v) => match serde_json::from_value::<T>(v.clone()) {
            Ok(value) => Some(value),
            Err(_) => {
                repairs.note(field, "dropped malformed value");
                None
            }
        },
    }
}
