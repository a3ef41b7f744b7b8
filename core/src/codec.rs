//! JSON codec for request and response bodies.
//!
//! Document metadata lives next to user data in the same JSON object, marked
//! by a leading [`RESERVED_PREFIX`]. [`user_properties`] is the projection
//! application code sees.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::CodecError;

/// Leading character that marks a document key as metadata.
pub const RESERVED_PREFIX: char = '_';

/// A document body: string keys to arbitrary JSON values.
pub type Properties = Map<String, Value>;

/// Serializes `value` to JSON bytes.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(value).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Parses JSON bytes into a value.
pub fn decode(bytes: &[u8]) -> Result<Value, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::MalformedBody(e.to_string()))
}

/// Parses JSON bytes that must hold an object (a document body).
pub fn decode_properties(bytes: &[u8]) -> Result<Properties, CodecError> {
    match decode(bytes)? {
        Value::Object(map) => Ok(map),
        other => Err(CodecError::MalformedBody(format!(
            "expected a JSON object, found {}",
            json_kind(&other)
        ))),
    }
}

/// Returns `true` for keys reserved for document metadata.
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with(RESERVED_PREFIX)
}

/// Copies every key that does not start with [`RESERVED_PREFIX`].
pub fn user_properties(properties: &Properties) -> Properties {
    properties
        .iter()
        .filter(|(key, _)| !is_reserved_key(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
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
