//! Shape fixes applied to raw documents before typed decoding.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Optional fields for which a stored `null` means "absent".
///
/// The remote store cannot express field deletion by omission, so clearing
/// one of these writes an explicit `null`.
pub const ABSENT_WHEN_NULL: &[&str] = &[
    "medicalSignature",
    "medicalHandoffDoctor",
    "medicalHandoffSentAt",
];

/// Rebuild a fixed-length string array.
///
/// Accepts a proper array or the corrupted map form `{"0": .., "1": ..}` left
/// behind by path-based partial updates. Missing or non-string slots become
/// `""`; slots past `expected_len` are dropped.
pub fn repair_array_shape(value: &Value, expected_len: usize) -> Vec<String> {
    let slot = |v: Option<&Value>| v.and_then(Value::as_str).unwrap_or_default().to_string();

    match value {
        Value::Array(items) => (0..expected_len).map(|i| slot(items.get(i))).collect(),
        Value::Object(map) => (0..expected_len)
            .map(|i| slot(map.get(&i.to_string())))
            .collect(),
        _ => vec![String::new(); expected_len],
    }
}

/// Convert the null-as-absent sentinel back into true absence.
pub fn bridge_absence(raw: Value) -> Value {
    match raw {
        Value::Object(mut map) => {
            strip_null_sentinels(&mut map);
            Value::Object(map)
        }
        other => other,
    }
}

pub(crate) fn strip_null_sentinels(map: &mut Map<String, Value>) {
    for key in ABSENT_WHEN_NULL {
        if matches!(map.get(*key), Some(Value::Null)) {
            map.remove(*key);
        }
    }
}

/// Read a timestamp in any of the forms the backends produce.
///
/// Supports RFC 3339 strings, `{seconds, nanoseconds}` server timestamp
/// objects and integer epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Object(map) => {
            let seconds = map.get("seconds").and_then(Value::as_i64)?;
            let nanos = map
                .get("nanoseconds")
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(0);
            DateTime::from_timestamp(seconds, nanos)
        }
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}
