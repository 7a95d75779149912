//! Durable, SQL-backed message stores.
//!
//! Two stores share one physical pattern:
//! - [`ChannelMessageStore`]: a FIFO or priority queue per group key, one
//!   message per row, safe for many concurrent pollers.
//! - [`GroupMessageStore`]: correlation groups holding several live messages
//!   plus group metadata (complete flag, last released sequence, condition).
//!
//! Both are scoped by a region so several deployments can share one set of
//! tables, and both take a caller-owned connection pool at construction.

pub mod codec;
pub mod config;
pub mod logging;
pub mod message;
pub mod metrics;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_utils;

pub use codec::{Codec, CodecError, CodecKind, TrustedTypes};
pub use config::{Config, ConfigError, DatabaseConfig, StoreConfig};
pub use logging::{init_logging, LogLevel};
pub use message::{GroupKey, HeaderValue, Message, MessageBuilder, Payload};
pub use metrics::init_metrics;
pub use storage::{
    migrate, open_pool, ChannelMessageStore, ChannelQueries, Dialect, GroupIter,
    GroupMessageStore, GroupMetadata, GroupQueries, Lifecycle, MessageGroup, MessageGroupHandle,
    MessageMetadata, MessageStream, SqlitePool, StoreError, StoreResult,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        // Ensure the main exports are accessible
        let _ = LogLevel::Info;
        let _ = Dialect::Sqlite;
        let _ = CodecKind::Binary;
    }
}
