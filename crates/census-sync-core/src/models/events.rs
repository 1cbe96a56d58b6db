//! Append-only daily event logs.

use serde::{Deserialize, Serialize};

use super::record::PatientSlot;

/// Outcome of a discharge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DischargeStatus {
    Alive,
    Deceased,
}

/// A patient leaving the hospital.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DischargeEvent {
    pub id: String,
    pub bed_id: String,
    pub patient_name: String,
    #[serde(default)]
    pub rut: String,
    #[serde(default)]
    pub diagnosis: String,
    /// Local wall-clock time, `HH:MM`
    pub time: String,
    pub status: DischargeStatus,
    /// Whether the discharged patient was a nested sub-occupant
    #[serde(default)]
    pub is_nested: bool,
}

impl DischargeEvent {
    /// Record the discharge of the patient in `slot`.
    pub fn from_slot(slot: &PatientSlot, time: String, status: DischargeStatus) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            bed_id: slot.bed_id.clone(),
            patient_name: slot.patient_name.clone(),
            rut: slot.rut.clone(),
            diagnosis: slot.diagnosis.clone(),
            time,
            status,
            is_nested: false,
        }
    }
}

/// A patient moved to another facility.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferEvent {
    pub id: String,
    pub bed_id: String,
    pub patient_name: String,
    #[serde(default)]
    pub rut: String,
    #[serde(default)]
    pub diagnosis: String,
    pub time: String,
    /// Evacuation method (commercial flight, air ambulance, ...)
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub receiving_center: String,
}

/// An ambulatory (same-day) procedure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureEvent {
    pub id: String,
    #[serde(default)]
    pub bed_id: String,
    pub patient_name: String,
    #[serde(default)]
    pub rut: String,
    pub procedure: String,
    pub time: String,
}
