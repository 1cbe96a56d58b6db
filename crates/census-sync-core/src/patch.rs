//! Dotted field-path patches (`"beds.R1.patientName" -> "Jane Doe"`).

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;

/// A write expressed as field paths and replacement values.
///
/// A `null` value is the absence sentinel: it clears the field.
pub type FieldPatch = BTreeMap<String, Value>;

/// Patch errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PatchError {
    #[error("Empty field path segment in `{0}`")]
    EmptySegment(String),

    #[error("Field `{0}` cannot be patched")]
    Immutable(String),

    #[error("Segment `{segment}` of `{path}` is not an array index")]
    NotAnIndex { path: String, segment: String },

    #[error("Index {index} of `{path}` is out of range")]
    IndexOutOfRange { path: String, index: usize },
}

pub type PatchResult<T> = Result<T, PatchError>;

/// How a path segment crossing an array is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayPolicy {
    /// Numeric segments index into the array (local cache)
    Index,
    /// Arrays are converted to maps keyed by stringified index first, as a
    /// document store without array addressing does
    KeyedMap,
}

/// Top-level fields that identify the record and may not be patched.
const IMMUTABLE_FIELDS: &[&str] = &["date"];

/// Build a patch from `(path, value)` pairs.
pub fn patch_of<I, K>(entries: I) -> FieldPatch
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    entries.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Check every path in the patch before anything is applied.
pub fn validate_patch(patch: &FieldPatch) -> PatchResult<()> {
    for path in patch.keys() {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(PatchError::EmptySegment(path.clone()));
        }
        if segments.len() == 1 && IMMUTABLE_FIELDS.contains(&segments[0]) {
            return Err(PatchError::Immutable(path.clone()));
        }
    }
    Ok(())
}

/// Apply every entry of `patch` to `doc` in key order.
pub fn apply_patch(doc: &mut Value, patch: &FieldPatch, policy: ArrayPolicy) -> PatchResult<()> {
    validate_patch(patch)?;
    for (path, value) in patch {
        let segments: Vec<&str> = path.split('.').collect();
        set_path(doc, path, &segments, value.clone(), policy)?;
    }
    Ok(())
}

fn set_path(
    node: &mut Value,
    path: &str,
    segments: &[&str],
    value: Value,
    policy: ArrayPolicy,
) -> PatchResult<()> {
    let Some((head, rest)) = segments.split_first() else {
        return Err(PatchError::EmptySegment(path.to_string()));
    };

    if let (Value::Array(items), ArrayPolicy::Index) = (&mut *node, policy) {
        let index: usize = head.parse().map_err(|_| PatchError::NotAnIndex {
            path: path.to_string(),
            segment: head.to_string(),
        })?;
        let slot = items.get_mut(index).ok_or(PatchError::IndexOutOfRange {
            path: path.to_string(),
            index,
        })?;
        if rest.is_empty() {
            *slot = value;
            return Ok(());
        }
        return set_path(slot, path, rest, value, policy);
    }

    if let Value::Array(items) = node {
        let keyed: Map<String, Value> = items
            .drain(..)
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect();
        *node = Value::Object(keyed);
    } else if !node.is_object() {
        *node = Value::Object(Map::new());
    }

    let Value::Object(map) = node else {
        return Err(PatchError::EmptySegment(path.to_string()));
    };

    if rest.is_empty() {
        map.insert(head.to_string(), value);
        Ok(())
    } else {
        let child = map.entry(head.to_string()).or_insert(Value::Null);
        set_path(child, path, rest, value, policy)
    }
}
