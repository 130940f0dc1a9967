//! Content fingerprints for plan payloads
//!
//! A payload is canonicalised (object keys sorted recursively, compact
//! serialization) before hashing, so key order and whitespace in the
//! submitted text never change the fingerprint.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::error::StoreError;

/// A validated payload together with its canonical text and fingerprint
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalPayload {
    value: Value,
    text: String,
    hash: String,
}

impl CanonicalPayload {
    /// Parse raw JSON text into a canonical payload
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let value: Value = serde_json::from_str(raw).map_err(StoreError::InvalidPayload)?;
        Self::from_value(&value)
    }

    /// Canonicalise an already-parsed value
    pub fn from_value(value: &Value) -> Result<Self, StoreError> {
        if !value.is_object() {
            return Err(StoreError::PayloadNotObject(kind_name(value)));
        }
        let value = canonicalize(value);
        let text = serde_json::to_string(&value)?;
        let hash = sha256_hex(text.as_bytes());
        Ok(Self { value, text, hash })
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Canonical serialization, as stored in the `data` columns
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}

/// Fingerprint of a JSON value, independent of key order
pub fn content_hash(value: &Value) -> String {
    let canonical = canonicalize(value);
    // Serializing a Value cannot fail: all map keys are strings
    let text = serde_json::to_string(&canonical).unwrap_or_default();
    sha256_hex(text.as_bytes())
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key.as_str()]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
