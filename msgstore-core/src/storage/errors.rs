/*
    errors.rs - Error types for the message stores

    Defines the errors surfaced by channel and group store operations, plus
    the internal outcomes that are absorbed rather than surfaced:
    - duplicate inserts (the message is already durable)
    - lost claim races (another consumer took the row)
*/

use rusqlite::ffi;
use thiserror::Error;

use crate::codec::CodecError;
use crate::config::ConfigError;

/// Errors that can occur in store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Message could not be encoded on the write path
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored blob could not be decoded, or names an untrusted payload type
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Message rejected before reaching the database
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Startup probe could not reach one of the store's tables
    #[error("Schema unavailable: {0}")]
    SchemaUnavailable(String),

    /// Database error, propagated unchanged
    #[error("Database error: {0}")]
    Driver(#[from] rusqlite::Error),

    /// No connection could be checked out of the pool
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

impl From<CodecError> for StoreError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Serialization(msg) => StoreError::Serialization(msg),
            CodecError::Deserialization(msg) => StoreError::Deserialization(msg),
            untrusted @ CodecError::Untrusted { .. } => {
                StoreError::Deserialization(untrusted.to_string())
            }
        }
    }
}

impl From<ConfigError> for StoreError {
    fn from(err: ConfigError) -> Self {
        StoreError::InvalidConfiguration(err.to_string())
    }
}

/// Result of inserting a row keyed by message id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InsertOutcome {
    Inserted,
    /// Primary key already present; treated as success
    Duplicate,
}

/// Result of deleting a previously selected row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClaimOutcome {
    Claimed,
    /// Zero rows deleted; a concurrent consumer got there first
    RaceLost,
}

impl ClaimOutcome {
    pub(crate) fn from_rows_affected(rows: usize) -> Self {
        if rows == 0 {
            ClaimOutcome::RaceLost
        } else {
            ClaimOutcome::Claimed
        }
    }
}

/// Primary key or unique constraint violation
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
                && (e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE)
        }
        _ => false,
    }
}
