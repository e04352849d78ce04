//! Text frame encoding and decoding
//!
//! Leaves speak one JSON object per websocket text frame. Decoding checks
//! the envelope first so that an unknown `type` is reported separately from
//! a known message with bad fields.

use crate::messages::{InboundMessage, OutboundMessage};
use crate::types::ProtocolError;

/// Message types a leaf may send
pub const INBOUND_TYPES: &[&str] = &[
    "CONFIG",
    "DEVICE_STATUS",
    "DATASTORE_CREATE",
    "DATASTORE_SET",
    "DATASTORE_GET",
    "DATASTORE_DELETE",
    "DATASTORE_PERMISSIONS",
    "SUBSCRIBE",
    "UNSUBSCRIBE",
    "CONDITION_CREATE",
    "CONDITION_DELETE",
];

/// Decode one inbound text frame
#[allow(clippy::missing_errors_doc)]
pub fn decode(text: &str) -> Result<InboundMessage, ProtocolError> {
    let raw: serde_json::Value = serde_json::from_str(text)?;
    let object = raw.as_object().ok_or(ProtocolError::NotAnObject)?;

    let kind = object
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or(ProtocolError::MissingType)?;
    if !INBOUND_TYPES.contains(&kind) {
        return Err(ProtocolError::UnknownType(kind.to_string()));
    }

    tracing::trace!("Decoding {} frame ({} bytes)", kind, text.len());
    Ok(serde_json::from_value(raw)?)
}

/// Encode one outbound message as a text frame
#[allow(clippy::missing_errors_doc)]
pub fn encode(message: &OutboundMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}
