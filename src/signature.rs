//! Record fingerprints for change detection.
//!
//! The signature is a SHA-256 over a canonical serialization in which every
//! object's keys are sorted, so a record re-fetched with the same content in a
//! different key order compares equal.

use std::fmt;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::SignatureError;
use crate::record::Record;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn signature(record: &Record) -> Result<Signature, SignatureError> {
    let value = serde_json::to_value(record)?;
    let canonical = serde_json::to_vec(&canonicalize(value))?;
    Ok(Signature(hex::encode(Sha256::digest(&canonical))))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let sorted: Map<String, Value> = entries
                .into_iter()
                .map(|(key, value)| (key, canonicalize(value)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
