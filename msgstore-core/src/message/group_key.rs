//! Group keys
//!
//! Callers name groups with arbitrary strings; the tables store a fixed-width
//! UUID key derived from that name. A name that already is a UUID maps to
//! itself, so a key read back from the database addresses the same group.

use std::fmt;
use uuid::Uuid;

/// Stable storage key for a channel queue or correlation group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey(Uuid);

impl GroupKey {
    /// Derive the key for a group name
    pub fn new(group_id: &str) -> Self {
        match Uuid::parse_str(group_id) {
            Ok(uuid) => GroupKey(uuid),
            Err(_) => GroupKey(Uuid::new_v5(&Uuid::NAMESPACE_OID, group_id.as_bytes())),
        }
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Column value (lowercase hyphenated UUID)
    pub fn to_column(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl From<&str> for GroupKey {
    fn from(value: &str) -> Self {
        GroupKey::new(value)
    }
}

impl From<&String> for GroupKey {
    fn from(value: &String) -> Self {
        GroupKey::new(value)
    }
}

impl From<String> for GroupKey {
    fn from(value: String) -> Self {
        GroupKey::new(&value)
    }
}

impl From<Uuid> for GroupKey {
    fn from(value: Uuid) -> Self {
        GroupKey(value)
    }
}

impl From<&GroupKey> for GroupKey {
    fn from(value: &GroupKey) -> Self {
        *value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_is_stable() {
        assert_eq!(GroupKey::new("orders"), GroupKey::new("orders"));
        assert_ne!(GroupKey::new("orders"), GroupKey::new("invoices"));
        assert_eq!(GroupKey::new("orders").as_uuid().get_version_num(), 5);
    }

    #[test]
    fn test_key_of_key_is_itself() {
        let key = GroupKey::new("orders");
        assert_eq!(GroupKey::new(&key.to_column()), key);
        assert_eq!(GroupKey::from(key.to_string()), key);
    }

    #[test]
    fn test_uuid_names_are_used_verbatim() {
        let id = Uuid::now_v7();
        assert_eq!(GroupKey::new(&id.to_string()).as_uuid(), id);
        assert_eq!(GroupKey::from(id).to_column(), id.hyphenated().to_string());
    }
}
