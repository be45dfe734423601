//! Document codec.
//!
//! Documents are arbitrary JSON values stored as UTF-8 JSON bytes. Object
//! field insertion order is preserved through the round trip (the `d/`
//! namespace stores exactly what this module produces).

use crate::error::DbResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Serializes a document to its stored byte form.
pub fn encode(value: &Value) -> DbResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Deserializes a document from its stored byte form.
pub fn decode(bytes: &[u8]) -> DbResult<Value> {
    Ok(serde_json::from_slice(bytes)?)
}

/// A `{key, value}` pair as exchanged by batch_set, import, and export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocEntry {
    /// Document key.
    pub key: String,
    /// Document value.
    pub value: Value,
}
