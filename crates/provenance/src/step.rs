//! Step identifiers, timestamps, and the encoded-step codec.

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chrono::{NaiveDateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::RecordError;

const STEP_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Mints a globally unique step identifier: 96 bits of entropy, URL-safe,
/// 16 characters.
pub(crate) fn mint_step_id() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    URL_SAFE_NO_PAD.encode(&bytes[..12])
}

/// Current time as ISO-8601 UTC, second precision, `Z` suffix.
pub(crate) fn timestamp_now() -> String {
    Utc::now().format(STEP_TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn validate_step_timestamp(timestamp: &str) -> Result<(), RecordError> {
    NaiveDateTime::parse_from_str(timestamp, STEP_TIMESTAMP_FORMAT)
        .map(|_| ())
        .map_err(|_| {
            RecordError::StepShape(format!(
                "timestamp {timestamp:?} is not ISO-8601 UTC with second precision"
            ))
        })
}

/// Encodes a step map as URL-safe base64 of its compact JSON. Key order is
/// insertion order; this string is the atomic unit every covering signature
/// commits to.
pub(crate) fn encode_step(step: &Map<String, Value>) -> Result<String, RecordError> {
    let json = serde_json::to_string(step)
        .map_err(|err| RecordError::StepShape(format!("step is not encodable: {err}")))?;
    Ok(URL_SAFE.encode(json))
}

pub(crate) fn decode_step(encoded: &str) -> Result<Map<String, Value>, RecordError> {
    let bytes = URL_SAFE.decode(encoded).map_err(|_| {
        RecordError::MalformedRecord("encoded step is not URL-safe base64".into())
    })?;
    let value: Value = serde_json::from_slice(&bytes).map_err(|err| {
        RecordError::MalformedRecord(format!("encoded step is not valid JSON: {err}"))
    })?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(RecordError::MalformedRecord("encoded step is not a JSON object".into())),
    }
}

/// A serial is canonical when it round-trips through integer parsing: ASCII
/// digits only, no leading zero unless the serial is exactly `"0"`.
pub(crate) fn is_canonical_serial(serial: &str) -> bool {
    !serial.is_empty()
        && serial.bytes().all(|b| b.is_ascii_digit())
        && (serial == "0" || !serial.starts_with('0'))
}
