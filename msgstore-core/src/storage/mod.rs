//! Storage layer for the channel and group message stores
//!
//! Both stores run on a caller-owned `r2d2` pool of SQLite connections.
//! Statement text for every supported dialect is rendered by [`query`];
//! the schema for the bundled SQLite driver is managed by [`migrations`].

pub mod channel_store;
pub mod errors;
pub mod group;
pub mod group_store;
pub mod id_cache;
pub mod lifecycle;
pub mod migrations;
pub mod pool;
pub mod query;
mod row;
pub mod stream;

pub use channel_store::{ChannelMessageStore, MessageGroupHandle};
pub use errors::{StoreError, StoreResult};
pub use group::{GroupMetadata, MessageGroup, MessageMetadata};
pub use group_store::GroupMessageStore;
pub use lifecycle::Lifecycle;
pub use migrations::{migrate, rollback, CURRENT_SCHEMA_VERSION};
pub use pool::{open_pool, SqlitePool};
pub use query::{expand_list_param, ChannelQueries, Dialect, GroupQueries};
pub use stream::{GroupIter, MessageStream};

// Testing modules
#[cfg(test)]
#[path = "tests/concurrency_tests.rs"]
mod concurrency_tests;
#[cfg(test)]
#[path = "tests/ordering_tests.rs"]
mod ordering_tests;
#[cfg(test)]
#[path = "tests/group_lifecycle_tests.rs"]
mod group_lifecycle_tests;
