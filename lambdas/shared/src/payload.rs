//! Inbound payload decoding
//!
//! Payloads arrive as a structured JSON object, as a JSON string holding the
//! object (raw payload string), or wrapped in a proxy-style `{"body": ...}`.

use serde_json::Value;

use crate::errors::{Error, Result};

/// Decode raw HTTP body bytes into a JSON object.
pub fn decode_bytes(body: &[u8]) -> Result<Value> {
    let body = std::str::from_utf8(body)
        .map_err(|_| Error::Validation("Request body is not valid UTF-8".to_string()))?;
    decode_body(body)
}

/// Decode an HTTP body into a JSON object.
pub fn decode_body(body: &str) -> Result<Value> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("Request body is empty".to_string()));
    }
    decode_value(serde_json::from_str(trimmed)?)
}

/// Normalize a direct-invocation payload into a JSON object.
pub fn decode_value(value: Value) -> Result<Value> {
    match value {
        Value::String(raw) => decode_body(&raw),
        Value::Object(mut map) => match map.remove("body") {
            Some(Value::String(raw)) => decode_body(&raw),
            Some(body @ Value::Object(_)) => Ok(body),
            Some(other) => {
                map.insert("body".to_string(), other);
                Ok(Value::Object(map))
            }
            None => Ok(Value::Object(map)),
        },
        Value::Null => Err(Error::Validation("Request body is empty".to_string())),
        _ => Err(Error::Validation("Request body must be a JSON object".to_string())),
    }
}

/// Whether a decoded payload is an `{operation, data}` envelope.
pub fn is_operation_envelope(payload: &Value) -> bool {
    payload.get("operation").is_some()
}
