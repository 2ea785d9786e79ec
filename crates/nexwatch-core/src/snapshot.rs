use std::collections::BTreeMap;

use serde_json::Value;

pub type Record = BTreeMap<String, Value>;

pub type Table = BTreeMap<String, Record>;

/// Renders a scalar the way an operator would type it: strings without quotes.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "<absent>".to_string(),
        other => other.to_string(),
    }
}

pub fn field_str<'a>(record: &'a Record, field: &str) -> Option<&'a str> {
    record.get(field).and_then(Value::as_str)
}

/// Converts a JSON object into a record, ignoring anything else.
pub fn record_from(value: &Value) -> Option<Record> {
    value
        .as_object()
        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

/// Number of entries in an object or array, zero for anything else.
pub fn entry_count(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Object(map)) => map.len() as u64,
        Some(Value::Array(items)) => items.len() as u64,
        _ => 0,
    }
}
