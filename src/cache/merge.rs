//! Append and de-duplication rules for paginated growth.

use std::collections::HashSet;

use serde_json::{Map, Value};

use super::entry::Payload;

/// Field holding the record list of a paginated payload.
pub const RECORDS_FIELD: &str = "records";

/// Record list of a payload: its `records` array, or the payload itself when
/// it is a bare array. Anything else has no records.
pub fn records(payload: &Payload) -> &[Value] {
    match payload {
        Value::Array(items) => items,
        Value::Object(object) => match object.get(RECORDS_FIELD) {
            Some(Value::Array(items)) => items,
            _ => &[],
        },
        _ => &[],
    }
}

/// Append `incoming` records after the `existing` ones.
///
/// With `dedup_key`, the first record seen for each value of that field wins,
/// so pre-existing records beat newly appended ones. Records without the field
/// are never collapsed. The result keeps the shape of `incoming`.
pub fn append(existing: Option<&Payload>, incoming: Payload, dedup_key: Option<&str>) -> Payload {
    let existing_records = existing.map(records).unwrap_or(&[]);
    let incoming_records = records(&incoming);

    let mut merged = Vec::with_capacity(existing_records.len() + incoming_records.len());
    match dedup_key {
        Some(field) => {
            let mut seen = HashSet::new();
            for record in existing_records.iter().chain(incoming_records) {
                let fresh = match record.get(field) {
                    // Value is not Hash; its compact JSON form is canonical.
                    Some(value) => seen.insert(value.to_string()),
                    None => true,
                };
                if fresh {
                    merged.push(record.clone());
                }
            }
        }
        None => {
            merged.extend(existing_records.iter().cloned());
            merged.extend(incoming_records.iter().cloned());
        }
    }

    match incoming {
        Value::Array(_) => Value::Array(merged),
        Value::Object(mut object) => {
            object.insert(RECORDS_FIELD.to_string(), Value::Array(merged));
            Value::Object(object)
        }
        _ => {
            let mut object = Map::new();
            object.insert(RECORDS_FIELD.to_string(), Value::Array(merged));
            Value::Object(object)
        }
    }
}
