//! Test fixtures: temporary databases and messages with fixed timestamps

use tempfile::TempDir;

use crate::config::{DatabaseConfig, StoreConfig, DEFAULT_TABLE_PREFIX};
use crate::message::{Message, Payload};
use crate::storage::{migrate, open_pool, ChannelMessageStore, GroupMessageStore, SqlitePool};

/// Pool over a fresh database file, schema not applied
pub fn temp_pool() -> (TempDir, SqlitePool) {
    let dir = TempDir::new().expect("temp dir");
    let config = DatabaseConfig {
        path: dir.path().join("test.db"),
        ..DatabaseConfig::default()
    };
    let pool = open_pool(&config).expect("open pool");
    (dir, pool)
}

/// Migrated database under the default table prefix
///
/// The directory is removed when the value is dropped.
pub struct TestDb {
    _dir: TempDir,
    pool: SqlitePool,
}

impl TestDb {
    pub fn new() -> Self {
        let (dir, pool) = temp_pool();
        migrate(&pool, DEFAULT_TABLE_PREFIX).expect("migrate");
        Self { _dir: dir, pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn channel_store(&self, config: StoreConfig) -> ChannelMessageStore {
        ChannelMessageStore::new(self.pool.clone(), config).expect("channel store")
    }

    pub fn group_store(&self, config: StoreConfig) -> GroupMessageStore {
        GroupMessageStore::new(self.pool.clone(), config).expect("group store")
    }
}

/// Message with a fixed timestamp, for deterministic ordering
pub fn message_at(payload: impl Into<Payload>, timestamp: i64) -> Message {
    Message::builder(payload).timestamp(timestamp).build()
}

/// Message with a fixed timestamp and a priority header
pub fn prioritized_at(payload: impl Into<Payload>, timestamp: i64, priority: Option<i32>) -> Message {
    let builder = Message::builder(payload).timestamp(timestamp);
    match priority {
        Some(p) => builder.priority(p).build(),
        None => builder.build(),
    }
}
