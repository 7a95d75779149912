//! JSON codec
//!
//! Envelope shape:
//!
//! ```json
//! {"id": "...", "timestamp": 1700000000000, "headers": {...}, "@type": "text", "payload": "hi"}
//! ```
//!
//! `@type` is `text`, `bytes` or the object type name. It is checked against
//! the trusted types before the payload is accepted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{CodecError, TrustedTypes};
use crate::message::{HeaderValue, Message, Payload, BYTES_TYPE, TEXT_TYPE};

#[derive(Serialize, Deserialize)]
struct JsonEnvelope {
    id: Uuid,
    timestamp: i64,
    #[serde(default)]
    headers: BTreeMap<String, HeaderValue>,
    #[serde(rename = "@type")]
    type_name: String,
    payload: serde_json::Value,
}

pub(super) fn encode(message: &Message, trusted: &TrustedTypes) -> Result<Vec<u8>, CodecError> {
    let payload = match message.payload() {
        Payload::Text(s) => serde_json::Value::String(s.clone()),
        Payload::Bytes(b) => {
            serde_json::to_value(b).map_err(|e| CodecError::Serialization(e.to_string()))?
        }
        Payload::Object { type_name, value } => {
            trusted.check_object_type(type_name)?;
            value.clone()
        }
    };

    let envelope = JsonEnvelope {
        id: message.id(),
        timestamp: message.timestamp(),
        headers: message.headers().clone(),
        type_name: message.payload().type_name().to_string(),
        payload,
    };

    serde_json::to_vec(&envelope).map_err(|e| CodecError::Serialization(e.to_string()))
}

pub(super) fn decode(blob: &[u8], trusted: &TrustedTypes) -> Result<Message, CodecError> {
    if blob.first().is_some_and(|b| *b != b'{') {
        return Err(CodecError::Deserialization(
            "blob is not a JSON object (was it written with the binary codec?)".to_string(),
        ));
    }

    let envelope: JsonEnvelope =
        serde_json::from_slice(blob).map_err(|e| CodecError::Deserialization(e.to_string()))?;

    let payload = match envelope.type_name.as_str() {
        TEXT_TYPE => match envelope.payload {
            serde_json::Value::String(s) => Payload::Text(s),
            other => {
                return Err(CodecError::Deserialization(format!(
                    "text payload must be a string, found {}",
                    other
                )))
            }
        },
        BYTES_TYPE => Payload::Bytes(
            serde_json::from_value(envelope.payload)
                .map_err(|e| CodecError::Deserialization(e.to_string()))?,
        ),
        _ => {
            if !trusted.is_trusted(&envelope.type_name) {
                return Err(CodecError::Untrusted {
                    type_name: envelope.type_name,
                });
            }
            Payload::Object {
                type_name: envelope.type_name,
                value: envelope.payload,
            }
        }
    };

    Ok(Message::from_parts(
        envelope.id,
        envelope.timestamp,
        envelope.headers,
        payload,
    ))
}
