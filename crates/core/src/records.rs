//! Record and key types shared by every storage engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::TRANSIENT_UI_KEY;
use crate::errors::{Result, ValidationError};

/// A stored record. Always a JSON object once it reaches a table.
pub type Record = Value;

/// Primary or index key.
///
/// Integers sort before strings, which gives every engine the same
/// record order for `to_array` and index lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Int(i64),
    Text(String),
}

impl Key {
    /// Reads a key out of a JSON value. Only integers and strings are keys.
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) => n.as_i64().map(Key::Int),
            Value::String(s) => Some(Key::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(i) => Value::from(*i),
            Key::Text(s) => Value::from(s.clone()),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Key::Int(i) => Some(*i),
            Key::Text(_) => None,
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{}", i),
            Key::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Text(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Text(value)
    }
}

/// Deep-clones `value` and strips the UI bookkeeping key from every object
/// in it. The clone is what gets persisted; the caller's value is untouched.
pub fn sanitize_record(value: &Value) -> Result<Record> {
    if !value.is_object() {
        return Err(ValidationError::InvalidInput(format!(
            "records must be JSON objects, got {}",
            json_kind(value)
        ))
        .into());
    }

    let mut clone = value.clone();
    strip_transient_keys(&mut clone);
    Ok(clone)
}

fn strip_transient_keys(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.remove(TRANSIENT_UI_KEY);
            for nested in map.values_mut() {
                strip_transient_keys(nested);
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_transient_keys(item);
            }
        }
        _ => {}
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
