//! Row mapping and statement binding
//!
//! Rows are read as raw column values inside the rusqlite closure and
//! decoded afterwards, so codec failures surface as [`StoreError`]s rather
//! than being squeezed into `rusqlite::Error`.

use rusqlite::types::Value;
use rusqlite::{Row, ToSql};
use uuid::Uuid;

use super::errors::{StoreError, StoreResult};
use crate::codec::Codec;
use crate::message::{current_timestamp, GroupKey, Message};

/// Named parameters with owned names, for statements whose placeholder set
/// is only known at run time
#[derive(Debug, Default)]
pub(crate) struct NamedParams {
    entries: Vec<(String, Value)>,
}

impl NamedParams {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.entries.push((name.to_string(), value.into()));
        self
    }

    /// Bind `values` as `name_0`, `name_1`, ...
    pub(crate) fn with_list<I, V>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        for (i, value) in values.into_iter().enumerate() {
            self.entries.push((format!("{}_{}", name, i), value.into()));
        }
        self
    }

    pub(crate) fn as_params(&self) -> Vec<(&str, &dyn ToSql)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect()
    }
}

pub(crate) fn region_scope(region: &str) -> NamedParams {
    NamedParams::new().with(":region", region.to_string())
}

/// Scope shared by every per-group statement
pub(crate) fn group_scope(group_key: &GroupKey, region: &str) -> NamedParams {
    region_scope(region).with(":group_key", group_key.to_column())
}

pub(crate) fn message_id_column(id: Uuid) -> String {
    id.hyphenated().to_string()
}

/// Fail fast on a nil id before touching the database
pub(crate) fn require_id(message: &Message) -> StoreResult<Uuid> {
    let id = message.id();
    if id.is_nil() {
        return Err(StoreError::InvalidMessage(
            "message id must not be nil".to_string(),
        ));
    }
    Ok(id)
}

/// `MESSAGE_ID, MESSAGE_BYTES[, CREATED_DATE]` as read from the database
#[derive(Debug, Clone)]
pub(crate) struct RawMessageRow {
    pub(crate) id: String,
    pub(crate) bytes: Vec<u8>,
    pub(crate) created_date: Option<i64>,
}

impl RawMessageRow {
    /// Map a row selected as `MESSAGE_ID, MESSAGE_BYTES`
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            bytes: row.get(1)?,
            created_date: None,
        })
    }

    /// Map a row selected as `MESSAGE_ID, MESSAGE_BYTES, CREATED_DATE`
    pub(crate) fn from_row_with_date(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            bytes: row.get(1)?,
            created_date: Some(row.get(2)?),
        })
    }

    pub(crate) fn decode(&self, codec: &Codec) -> StoreResult<Message> {
        let message = codec.decode(&self.bytes)?;
        if message_id_column(message.id()) != self.id {
            tracing::warn!(
                column_id = %self.id,
                message_id = %message.id(),
                "Stored message id does not match its MESSAGE_ID column"
            );
        }
        Ok(message)
    }
}

/// Parameters for a channel store insert
///
/// `CREATED_DATE` is the insertion time, not the message's own timestamp,
/// so delivery follows the order messages were added.
pub(crate) fn bind_channel_message(
    group_key: &GroupKey,
    region: &str,
    message: &Message,
    bytes: Vec<u8>,
    priority_enabled: bool,
) -> NamedParams {
    let priority = if priority_enabled {
        message.priority()
    } else {
        None
    };

    group_scope(group_key, region)
        .with(":message_id", message_id_column(message.id()))
        .with(":created_date", current_timestamp())
        .with(":priority", priority)
        .with(":message_bytes", bytes)
}

/// Parameters for a group store message insert
pub(crate) fn bind_group_message(region: &str, message: &Message, bytes: Vec<u8>) -> NamedParams {
    NamedParams::new()
        .with(":message_id", message_id_column(message.id()))
        .with(":region", region.to_string())
        .with(":created_date", current_timestamp())
        .with(":message_bytes", bytes)
}
