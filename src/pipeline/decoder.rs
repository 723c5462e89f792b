//! Payload decoder: raw event data to `NewFileRecord`.

use crate::envelope::is_json_content_type;
use crate::error::DecodeError;
use crate::pipeline::types::NewFileRecord;

/// Decode event data according to its declared media type.
///
/// Only JSON media types are understood. A missing content type is read as
/// JSON, the CloudEvents default.
pub fn decode_data(payload: &[u8], content_type: Option<&str>) -> Result<NewFileRecord, DecodeError> {
    match content_type {
        Some(content_type) if !is_json_content_type(content_type) => Err(DecodeError::new(
            format!("unsupported data content type {content_type:?}"),
        )),
        _ => decode(payload),
    }
}

/// Decode a new-file payload.
///
/// The payload must be a JSON object with a string `path`. Extra fields are
/// ignored; the path is not normalized or checked for existence.
pub fn decode(payload: &[u8]) -> Result<NewFileRecord, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::new("payload is empty"));
    }

    let value: serde_json::Value =
        serde_json::from_slice(payload).map_err(|e| DecodeError::new(e.to_string()))?;

    // serde accepts a bare array as a struct; only objects carry a named `path`.
    if !value.is_object() {
        return Err(DecodeError::new(format!(
            "expected a JSON object, got {}",
            json_kind(&value)
        )));
    }

    serde_json::from_value(value).map_err(|e| DecodeError::new(e.to_string()))
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
