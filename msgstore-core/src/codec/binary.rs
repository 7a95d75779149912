//! Binary codec
//!
//! Layout: one format byte, then a bincode envelope. Object payloads travel
//! as JSON text inside the envelope so arbitrary JSON values survive a
//! non-self-describing format.

use bincode::Options;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{CodecError, TrustedTypes};
use crate::message::{HeaderValue, Message, Payload};

/// Leading byte of every blob written by this codec
pub const BINARY_FORMAT_VERSION: u8 = 1;

/// Upper bound on a decoded envelope
const MAX_ENVELOPE_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Serialize, Deserialize)]
struct BinaryEnvelope {
    id: Uuid,
    timestamp: i64,
    headers: BTreeMap<String, HeaderValue>,
    payload: BinaryPayload,
}

#[derive(Serialize, Deserialize)]
enum BinaryPayload {
    Text(String),
    Bytes(Vec<u8>),
    Object { type_name: String, json: String },
}

fn options() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_ENVELOPE_BYTES)
}

pub(super) fn encode(message: &Message, trusted: &TrustedTypes) -> Result<Vec<u8>, CodecError> {
    let payload = match message.payload() {
        Payload::Text(s) => BinaryPayload::Text(s.clone()),
        Payload::Bytes(b) => BinaryPayload::Bytes(b.clone()),
        Payload::Object { type_name, value } => {
            trusted.check_object_type(type_name)?;
            BinaryPayload::Object {
                type_name: type_name.clone(),
                json: serde_json::to_string(value)
                    .map_err(|e| CodecError::Serialization(e.to_string()))?,
            }
        }
    };

    let envelope = BinaryEnvelope {
        id: message.id(),
        timestamp: message.timestamp(),
        headers: message.headers().clone(),
        payload,
    };

    let body = options()
        .serialize(&envelope)
        .map_err(|e| CodecError::Serialization(e.to_string()))?;

    let mut blob = Vec::with_capacity(body.len() + 1);
    blob.push(BINARY_FORMAT_VERSION);
    blob.extend_from_slice(&body);
    Ok(blob)
}

pub(super) fn decode(blob: &[u8], trusted: &TrustedTypes) -> Result<Message, CodecError> {
    let (version, body) = blob
        .split_first()
        .ok_or_else(|| CodecError::Deserialization("empty message blob".to_string()))?;

    if *version != BINARY_FORMAT_VERSION {
        let hint = if *version == b'{' {
            " (blob looks like JSON; was it written with the json codec?)"
        } else {
            ""
        };
        return Err(CodecError::Deserialization(format!(
            "unsupported binary format version {}{}",
            version, hint
        )));
    }

    let envelope: BinaryEnvelope = options()
        .deserialize(body)
        .map_err(|e| CodecError::Deserialization(e.to_string()))?;

    let payload = match envelope.payload {
        BinaryPayload::Text(s) => Payload::Text(s),
        BinaryPayload::Bytes(b) => Payload::Bytes(b),
        BinaryPayload::Object { type_name, json } => {
            if !trusted.is_trusted(&type_name) {
                return Err(CodecError::Untrusted { type_name });
            }
            let value = serde_json::from_str(&json)
                .map_err(|e| CodecError::Deserialization(e.to_string()))?;
            Payload::Object { type_name, value }
        }
    };

    Ok(Message::from_parts(
        envelope.id,
        envelope.timestamp,
        envelope.headers,
        payload,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_blob_starts_with_version() {
        let blob = encode(&Message::new("x"), &TrustedTypes::default()).unwrap();
        assert_eq!(blob[0], BINARY_FORMAT_VERSION);
    }

    #[test]
    fn test_json_blob_is_rejected_with_hint() {
        let err = decode(br#"{"id":"x"}"#, &TrustedTypes::default()).unwrap_err();
        assert!(err.to_string().contains("json codec"));
    }

    #[test]
    fn test_truncated_blob_is_rejected() {
        let blob = encode(&Message::new("truncate me"), &TrustedTypes::default()).unwrap();
        let err = decode(&blob[..blob.len() - 3], &TrustedTypes::default()).unwrap_err();
        assert!(matches!(err, CodecError::Deserialization(_)));

        assert!(decode(&[], &TrustedTypes::default()).is_err());
    }

    #[test]
    fn test_reserved_object_type_on_write() {
        for type_name in ["text", "bytes"] {
            let message = Message::new(Payload::Object {
                type_name: type_name.to_string(),
                value: json!("looks built-in"),
            });
            let err = encode(&message, &TrustedTypes::trust_all()).unwrap_err();
            assert!(err.to_string().contains("reserved"), "{type_name}: {err}");
        }
    }

    #[test]
    fn test_untrusted_object_on_read() {
        let message = Message::new(Payload::Object {
            type_name: "evil.Gadget".to_string(),
            value: json!({"cmd": "rm"}),
        });
        let blob = encode(&message, &TrustedTypes::trust_all()).unwrap();

        let err = decode(&blob, &TrustedTypes::new(["billing.*"])).unwrap_err();
        assert!(matches!(err, CodecError::Untrusted { ref type_name } if type_name == "evil.Gadget"));
    }
}
