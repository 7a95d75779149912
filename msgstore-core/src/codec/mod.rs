//! Message codecs
//!
//! A store owns exactly one [`Codec`] for its lifetime. The codec turns a
//! [`Message`] into the blob kept in the `MESSAGE_BYTES` / `MESSAGE_CONTENT`
//! column and back, enforcing the [`TrustedTypes`] allow-list in both
//! directions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::message::Message;

mod binary;
mod json;
mod trusted;

pub use binary::BINARY_FORMAT_VERSION;
pub use trusted::TrustedTypes;

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Deserialization failed: {0}")]
    Deserialization(String),

    #[error("Payload type '{type_name}' is not trusted")]
    Untrusted { type_name: String },
}

/// Wire format of the message blob
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Binary,
    Json,
}

impl CodecKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodecKind::Binary => "binary",
            CodecKind::Json => "json",
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodecKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "binary" | "bincode" => Ok(CodecKind::Binary),
            "json" => Ok(CodecKind::Json),
            other => Err(format!("unknown codec '{}' (expected binary or json)", other)),
        }
    }
}

/// Serializer/deserializer pair bound to an allow-list
#[derive(Debug, Clone)]
pub struct Codec {
    kind: CodecKind,
    trusted: TrustedTypes,
}

impl Codec {
    pub fn new(kind: CodecKind, trusted: TrustedTypes) -> Self {
        Self { kind, trusted }
    }

    pub fn binary(trusted: TrustedTypes) -> Self {
        Self::new(CodecKind::Binary, trusted)
    }

    pub fn json(trusted: TrustedTypes) -> Self {
        Self::new(CodecKind::Json, trusted)
    }

    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    pub fn trusted_types(&self) -> &TrustedTypes {
        &self.trusted
    }

    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, CodecError> {
        match self.kind {
            CodecKind::Binary => binary::encode(message, &self.trusted),
            CodecKind::Json => json::encode(message, &self.trusted),
        }
    }

    pub fn decode(&self, blob: &[u8]) -> Result<Message, CodecError> {
        match self.kind {
            CodecKind::Binary => binary::decode(blob, &self.trusted),
            CodecKind::Json => json::decode(blob, &self.trusted),
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::binary(TrustedTypes::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{HeaderValue, Payload};
    use proptest::prelude::*;
    use serde_json::json;
    use uuid::Uuid;

    fn codecs() -> [Codec; 2] {
        [
            Codec::binary(TrustedTypes::new(["orders.*"])),
            Codec::json(TrustedTypes::new(["orders.*"])),
        ]
    }

    #[test]
    fn test_all_payload_kinds_survive() {
        let messages = [
            Message::builder("plain text").priority(3).header("flag", true).build(),
            Message::builder(vec![0u8, 255, 7]).header("trace", Uuid::now_v7()).build(),
            Message::new(Payload::Object {
                type_name: "orders.Order".to_string(),
                value: json!({"sku": "A-1", "qty": 2, "tags": ["x", "y"], "note": null}),
            }),
        ];

        for codec in codecs() {
            for message in &messages {
                let blob = codec.encode(message).unwrap();
                assert_eq!(&codec.decode(&blob).unwrap(), message, "codec {}", codec.kind());
            }
        }
    }

    #[test]
    fn test_codec_mismatch_is_reported() {
        let message = Message::new("x");
        let binary = Codec::binary(TrustedTypes::default());
        let json = Codec::json(TrustedTypes::default());

        let err = json.decode(&binary.encode(&message).unwrap()).unwrap_err();
        assert!(matches!(err, CodecError::Deserialization(_)));

        let err = binary.decode(&json.encode(&message).unwrap()).unwrap_err();
        assert!(matches!(err, CodecError::Deserialization(_)));
    }

    #[test]
    fn test_codec_kind_parsing() {
        assert_eq!("json".parse::<CodecKind>().unwrap(), CodecKind::Json);
        assert_eq!("BINARY".parse::<CodecKind>().unwrap(), CodecKind::Binary);
        assert!("xml".parse::<CodecKind>().is_err());
        assert_eq!(CodecKind::default(), CodecKind::Binary);
    }

    proptest! {
        #[test]
        fn prop_text_and_headers_survive(
            text in ".*",
            key in "[a-z]{1,8}",
            number in any::<i64>(),
            bytes in proptest::collection::vec(any::<u8>(), 0..64),
            timestamp in any::<i64>(),
        ) {
            let message = Message::builder(text)
                .timestamp(timestamp)
                .header(key, number)
                .header("raw", HeaderValue::Bytes(bytes))
                .build();

            for codec in codecs() {
                let blob = codec.encode(&message).unwrap();
                prop_assert_eq!(codec.decode(&blob).unwrap(), message.clone());
            }
        }
    }
}
