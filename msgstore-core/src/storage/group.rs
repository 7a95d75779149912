//! Group store value types

use rusqlite::Row;
use uuid::Uuid;

use crate::message::{GroupKey, Message};

/// One `<PREFIX>MESSAGE_GROUP` row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMetadata {
    pub group_key: GroupKey,
    /// One-way flag; only deleting the group clears it
    pub complete: bool,
    pub last_released_sequence: i64,
    /// Earliest timestamp among the messages that created the group
    pub created_date: i64,
    pub updated_date: i64,
    pub condition: Option<String>,
}

impl GroupMetadata {
    /// Map a row selected as `GROUP_KEY, COMPLETE, LAST_RELEASED_SEQUENCE,
    /// CREATED_DATE, UPDATED_DATE, GROUP_CONDITION`
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let key: String = row.get(0)?;
        let complete: i64 = row.get(1)?;
        Ok(Self {
            group_key: GroupKey::new(&key),
            complete: complete > 0,
            last_released_sequence: row.get(2)?,
            created_date: row.get(3)?,
            updated_date: row.get(4)?,
            condition: row.get(5)?,
        })
    }
}

/// Id and stored creation time of a group store message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageMetadata {
    pub id: Uuid,
    pub created_date: i64,
}

/// Snapshot of a correlation group
///
/// A group that has never been written to (or has been removed) has no
/// metadata and no messages.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageGroup {
    group_key: GroupKey,
    metadata: Option<GroupMetadata>,
    messages: Vec<Message>,
}

impl MessageGroup {
    pub(crate) fn new(
        group_key: GroupKey,
        metadata: Option<GroupMetadata>,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            group_key,
            metadata,
            messages,
        }
    }

    pub fn group_key(&self) -> GroupKey {
        self.group_key
    }

    pub fn metadata(&self) -> Option<&GroupMetadata> {
        self.metadata.as_ref()
    }

    pub fn exists(&self) -> bool {
        self.metadata.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.metadata.as_ref().is_some_and(|m| m.complete)
    }

    pub fn last_released_sequence(&self) -> i64 {
        self.metadata
            .as_ref()
            .map_or(0, |m| m.last_released_sequence)
    }

    pub fn condition(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.condition.as_deref())
    }

    /// Messages ordered by creation time
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn size(&self) -> usize {
        self.messages.len()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_group_snapshot() {
        let group = MessageGroup::new(GroupKey::new("gone"), None, Vec::new());
        assert!(!group.exists());
        assert!(!group.is_complete());
        assert_eq!(group.last_released_sequence(), 0);
        assert_eq!(group.condition(), None);
        assert_eq!(group.size(), 0);
    }

    #[test]
    fn test_snapshot_accessors() {
        let key = GroupKey::new("g");
        let metadata = GroupMetadata {
            group_key: key,
            complete: true,
            last_released_sequence: 4,
            created_date: 10,
            updated_date: 20,
            condition: Some("size > 3".to_string()),
        };
        let group = MessageGroup::new(key, Some(metadata), vec![Message::new("m")]);

        assert!(group.exists());
        assert!(group.is_complete());
        assert_eq!(group.last_released_sequence(), 4);
        assert_eq!(group.condition(), Some("size > 3"));
        assert_eq!(group.into_messages().len(), 1);
    }
}
