//! Database migrations for the message store tables
//!
//! Provides versioned, prefix-parameterized SQLite DDL for the channel and
//! group store schemas. Each migration is applied atomically and tracked in
//! the `<PREFIX>SCHEMA_VERSION` table. Stores never run these themselves;
//! applying the schema is the caller's (or the CLI's) job.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use super::errors::{StoreError, StoreResult};
use super::pool::SqlitePool;
use super::query::PREFIX_PLACEHOLDER;
use crate::message::current_timestamp;

/// Current schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Migration descriptor
pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up_sql: &'static str,
    pub down_sql: Option<&'static str>,
}

/// All available migrations in order
pub fn get_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Channel message table",
            up_sql: r#"
                CREATE TABLE IF NOT EXISTS %PREFIX%CHANNEL_MESSAGE (
                    MESSAGE_ID TEXT NOT NULL,
                    GROUP_KEY TEXT NOT NULL,
                    REGION TEXT NOT NULL,
                    CREATED_DATE INTEGER NOT NULL,          -- millis since epoch
                    MESSAGE_PRIORITY INTEGER,
                    MESSAGE_SEQUENCE INTEGER NOT NULL,      -- tie-breaker within CREATED_DATE
                    MESSAGE_BYTES BLOB NOT NULL,
                    PRIMARY KEY (MESSAGE_ID, GROUP_KEY, REGION)
                );

                CREATE INDEX IF NOT EXISTS %PREFIX%CHANNEL_MSG_DATE_IDX
                    ON %PREFIX%CHANNEL_MESSAGE (REGION, GROUP_KEY, CREATED_DATE, MESSAGE_SEQUENCE);
                CREATE INDEX IF NOT EXISTS %PREFIX%CHANNEL_MSG_PRIORITY_IDX
                    ON %PREFIX%CHANNEL_MESSAGE (REGION, GROUP_KEY, MESSAGE_PRIORITY DESC, CREATED_DATE, MESSAGE_SEQUENCE);
                CREATE INDEX IF NOT EXISTS %PREFIX%CHANNEL_MSG_SEQ_IDX
                    ON %PREFIX%CHANNEL_MESSAGE (MESSAGE_SEQUENCE);
            "#,
            down_sql: Some(
                r#"
                DROP INDEX IF EXISTS %PREFIX%CHANNEL_MSG_SEQ_IDX;
                DROP INDEX IF EXISTS %PREFIX%CHANNEL_MSG_PRIORITY_IDX;
                DROP INDEX IF EXISTS %PREFIX%CHANNEL_MSG_DATE_IDX;
                DROP TABLE IF EXISTS %PREFIX%CHANNEL_MESSAGE;
            "#,
            ),
        },
        Migration {
            version: 2,
            description: "Group message tables",
            up_sql: r#"
                CREATE TABLE IF NOT EXISTS %PREFIX%MESSAGE (
                    MESSAGE_ID TEXT NOT NULL,
                    REGION TEXT NOT NULL,
                    CREATED_DATE INTEGER NOT NULL,
                    MESSAGE_BYTES BLOB NOT NULL,
                    PRIMARY KEY (MESSAGE_ID, REGION)
                );

                CREATE INDEX IF NOT EXISTS %PREFIX%MESSAGE_DATE_IDX
                    ON %PREFIX%MESSAGE (REGION, CREATED_DATE);

                CREATE TABLE IF NOT EXISTS %PREFIX%GROUP_TO_MESSAGE (
                    GROUP_KEY TEXT NOT NULL,
                    MESSAGE_ID TEXT NOT NULL,
                    REGION TEXT NOT NULL,
                    PRIMARY KEY (GROUP_KEY, MESSAGE_ID, REGION)
                );

                CREATE INDEX IF NOT EXISTS %PREFIX%GROUP_TO_MESSAGE_MSG_IDX
                    ON %PREFIX%GROUP_TO_MESSAGE (MESSAGE_ID, REGION);

                CREATE TABLE IF NOT EXISTS %PREFIX%MESSAGE_GROUP (
                    GROUP_KEY TEXT NOT NULL,
                    REGION TEXT NOT NULL,
                    GROUP_CONDITION TEXT,
                    COMPLETE INTEGER NOT NULL DEFAULT 0,
                    LAST_RELEASED_SEQUENCE INTEGER NOT NULL DEFAULT 0,
                    CREATED_DATE INTEGER NOT NULL,
                    UPDATED_DATE INTEGER NOT NULL,
                    PRIMARY KEY (GROUP_KEY, REGION)
                );
            "#,
            down_sql: Some(
                r#"
                DROP TABLE IF EXISTS %PREFIX%MESSAGE_GROUP;
                DROP INDEX IF EXISTS %PREFIX%GROUP_TO_MESSAGE_MSG_IDX;
                DROP TABLE IF EXISTS %PREFIX%GROUP_TO_MESSAGE;
                DROP INDEX IF EXISTS %PREFIX%MESSAGE_DATE_IDX;
                DROP TABLE IF EXISTS %PREFIX%MESSAGE;
            "#,
            ),
        },
    ]
}

fn check_prefix(prefix: &str) -> StoreResult<()> {
    if prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(StoreError::InvalidConfiguration(format!(
            "table prefix '{}' may only contain letters, digits and '_'",
            prefix
        )))
    }
}

fn render(sql: &str, prefix: &str) -> String {
    sql.replace(PREFIX_PLACEHOLDER, prefix)
}

/// Get current schema version, creating the tracking table if needed
fn get_current_version(conn: &Connection, prefix: &str) -> StoreResult<i32> {
    conn.execute(
        &render(
            "CREATE TABLE IF NOT EXISTS %PREFIX%SCHEMA_VERSION (
                VERSION INTEGER PRIMARY KEY,
                APPLIED_AT INTEGER NOT NULL
            )",
            prefix,
        ),
        [],
    )?;

    let version: Option<i32> = conn
        .query_row(
            &render("SELECT MAX(VERSION) FROM %PREFIX%SCHEMA_VERSION", prefix),
            [],
            |row| row.get::<_, Option<i32>>(0),
        )
        .optional()?
        .flatten();

    Ok(version.unwrap_or(0))
}

/// Schema version currently recorded under `prefix`
pub fn current_version(pool: &SqlitePool, prefix: &str) -> StoreResult<i32> {
    check_prefix(prefix)?;
    let conn = pool.get()?;
    get_current_version(&conn, prefix)
}

/// Run all pending migrations, returning how many were applied
pub fn migrate(pool: &SqlitePool, prefix: &str) -> StoreResult<usize> {
    check_prefix(prefix)?;
    let mut conn = pool.get()?;

    let current_version = get_current_version(&conn, prefix)?;
    let pending: Vec<_> = get_migrations()
        .into_iter()
        .filter(|m| m.version > current_version)
        .collect();

    for migration in &pending {
        let tx = conn.transaction()?;

        tx.execute_batch(&render(migration.up_sql, prefix))?;
        tx.execute(
            &render(
                "INSERT INTO %PREFIX%SCHEMA_VERSION (VERSION, APPLIED_AT) VALUES (?, ?)",
                prefix,
            ),
            params![migration.version, current_timestamp()],
        )?;

        tx.commit()?;

        info!(
            version = migration.version,
            prefix,
            "Applied migration: {}", migration.description
        );
    }

    Ok(pending.len())
}

/// Revert applied migrations down to `target_version`, newest first
pub fn rollback(pool: &SqlitePool, prefix: &str, target_version: i32) -> StoreResult<usize> {
    check_prefix(prefix)?;
    let mut conn = pool.get()?;

    let current_version = get_current_version(&conn, prefix)?;
    let mut to_revert: Vec<_> = get_migrations()
        .into_iter()
        .filter(|m| m.version > target_version && m.version <= current_version)
        .collect();
    to_revert.sort_by(|a, b| b.version.cmp(&a.version));

    for migration in &to_revert {
        let down_sql = migration.down_sql.ok_or_else(|| {
            StoreError::InvalidConfiguration(format!(
                "migration v{} cannot be reverted",
                migration.version
            ))
        })?;

        let tx = conn.transaction()?;
        tx.execute_batch(&render(down_sql, prefix))?;
        tx.execute(
            &render("DELETE FROM %PREFIX%SCHEMA_VERSION WHERE VERSION = ?", prefix),
            params![migration.version],
        )?;
        tx.commit()?;

        info!(version = migration.version, prefix, "Reverted migration");
    }

    Ok(to_revert.len())
}

/// Get the latest migration version available
pub fn get_latest_version() -> i32 {
    get_migrations().iter().map(|m| m.version).max().unwrap_or(0)
}
