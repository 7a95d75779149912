//! Message model
//!
//! A [`Message`] is an immutable envelope: a time-ordered id, a creation
//! timestamp, a header map and a [`Payload`]. Stores persist it as an opaque
//! blob produced by a [`crate::Codec`].

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

mod group_key;

pub use group_key::GroupKey;

/// Header consulted by priority-enabled channel stores
pub const PRIORITY_HEADER: &str = "priority";

/// Type discriminator for [`Payload::Text`]
pub const TEXT_TYPE: &str = "text";

/// Type discriminator for [`Payload::Bytes`]
pub const BYTES_TYPE: &str = "bytes";

/// A single header value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderValue {
    Text(String),
    Integer(i64),
    Boolean(bool),
    Uuid(Uuid),
    Bytes(Vec<u8>),
}

impl HeaderValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            HeaderValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Text(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Text(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Integer(value)
    }
}

impl From<i32> for HeaderValue {
    fn from(value: i32) -> Self {
        HeaderValue::Integer(value.into())
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Boolean(value)
    }
}

impl From<Uuid> for HeaderValue {
    fn from(value: Uuid) -> Self {
        HeaderValue::Uuid(value)
    }
}

impl From<Vec<u8>> for HeaderValue {
    fn from(value: Vec<u8>) -> Self {
        HeaderValue::Bytes(value)
    }
}

/// Message body
///
/// `Object` carries a caller-chosen type name which is what the codec's
/// trusted-type allow-list is matched against on the way back in.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Bytes(Vec<u8>),
    Object {
        type_name: String,
        value: serde_json::Value,
    },
}

impl Payload {
    /// Serialize a domain value under an explicit type name
    pub fn object<T: Serialize>(
        type_name: impl Into<String>,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Payload::Object {
            type_name: type_name.into(),
            value: serde_json::to_value(value)?,
        })
    }

    /// Type discriminator written alongside the payload
    pub fn type_name(&self) -> &str {
        match self {
            Payload::Text(_) => TEXT_TYPE,
            Payload::Bytes(_) => BYTES_TYPE,
            Payload::Object { type_name, .. } => type_name,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Deserialize an `Object` payload back into a domain value
    pub fn to_object<T: DeserializeOwned>(&self) -> Option<Result<T, serde_json::Error>> {
        match self {
            Payload::Object { value, .. } => Some(serde_json::from_value(value.clone())),
            _ => None,
        }
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_string())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Bytes(value)
    }
}

/// An immutable message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    id: Uuid,
    timestamp: i64,
    headers: BTreeMap<String, HeaderValue>,
    payload: Payload,
}

impl Message {
    /// Start building a message around `payload`
    pub fn builder(payload: impl Into<Payload>) -> MessageBuilder {
        MessageBuilder::new(payload)
    }

    /// Shorthand for a message with no extra headers
    pub fn new(payload: impl Into<Payload>) -> Self {
        MessageBuilder::new(payload).build()
    }

    pub(crate) fn from_parts(
        id: Uuid,
        timestamp: i64,
        headers: BTreeMap<String, HeaderValue>,
        payload: Payload,
    ) -> Self {
        Self {
            id,
            timestamp,
            headers,
            payload,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Creation time in milliseconds since the Unix epoch
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn headers(&self) -> &BTreeMap<String, HeaderValue> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The `priority` header, if it holds an integer that fits in `i32`
    pub fn priority(&self) -> Option<i32> {
        self.header(PRIORITY_HEADER)
            .and_then(HeaderValue::as_integer)
            .and_then(|p| i32::try_from(p).ok())
    }
}

/// Builder for [`Message`]
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    id: Option<Uuid>,
    timestamp: Option<i64>,
    headers: BTreeMap<String, HeaderValue>,
    payload: Payload,
}

impl MessageBuilder {
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            id: None,
            timestamp: None,
            headers: BTreeMap::new(),
            payload: payload.into(),
        }
    }

    /// Copy id, timestamp and headers from an existing message
    pub fn from_message(message: &Message) -> Self {
        Self {
            id: Some(message.id),
            timestamp: Some(message.timestamp),
            headers: message.headers.clone(),
            payload: message.payload.clone(),
        }
    }

    /// Override the generated id. A nil id is accepted here but rejected by
    /// the stores on insert.
    pub fn id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn timestamp(mut self, millis: i64) -> Self {
        self.timestamp = Some(millis);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn priority(self, priority: i32) -> Self {
        self.header(PRIORITY_HEADER, priority)
    }

    pub fn build(self) -> Message {
        Message {
            id: self.id.unwrap_or_else(Uuid::now_v7),
            timestamp: self.timestamp.unwrap_or_else(current_timestamp),
            headers: self.headers,
            payload: self.payload,
        }
    }
}

/// Milliseconds since the Unix epoch
pub(crate) fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct MailMessage {
        subject: String,
        to: String,
    }

    #[test]
    fn test_builder_defaults() {
        let before = current_timestamp();
        let message = Message::new("hello");

        assert!(!message.id().is_nil());
        assert_eq!(message.id().get_version_num(), 7);
        assert!(message.timestamp() >= before);
        assert!(message.headers().is_empty());
        assert_eq!(message.payload().as_text(), Some("hello"));
    }

    #[test]
    fn test_ids_are_unique() {
        let first = Message::new("a");
        let second = Message::new("b");
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn test_priority_header() {
        let message = Message::builder("p").priority(7).build();
        assert_eq!(message.priority(), Some(7));

        let message = Message::builder("p").header(PRIORITY_HEADER, "high").build();
        assert_eq!(message.priority(), None);

        let message = Message::builder("p")
            .header(PRIORITY_HEADER, i64::MAX)
            .build();
        assert_eq!(message.priority(), None);
    }

    #[test]
    fn test_from_message_keeps_identity() {
        let original = Message::builder("x").header("k", "v").build();
        let copy = MessageBuilder::from_message(&original).build();
        assert_eq!(copy, original);
    }

    #[test]
    fn test_object_payload() {
        let mail = MailMessage {
            subject: "Order Confirmation".to_string(),
            to: "customer@example.com".to_string(),
        };
        let payload = Payload::object("mail.MailMessage", &mail).unwrap();

        assert_eq!(payload.type_name(), "mail.MailMessage");
        let back: MailMessage = payload.to_object().unwrap().unwrap();
        assert_eq!(back, mail);

        assert!(Payload::from("text").to_object::<MailMessage>().is_none());
        assert_eq!(Payload::from(vec![1u8, 2]).type_name(), BYTES_TYPE);
    }
}
