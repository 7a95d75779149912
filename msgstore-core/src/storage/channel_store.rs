//! Channel message store
//!
//! A durable FIFO or priority queue per group key and region, one message
//! per row of `<PREFIX>CHANNEL_MESSAGE`.
//!
//! Polling claims a row exactly once across any number of concurrent
//! consumers:
//! - single-statement dialects select and delete in one `DELETE ..
//!   RETURNING`
//! - other dialects select first, then delete by id; a delete that affects
//!   no rows means another consumer won the race and the poll reports
//!   nothing available
//!
//! Every operation has a pooled-connection form. Add and poll also come in
//! `*_in(&Connection, ..)` form for callers that run them inside their own
//! transaction; those callers then report the outcome through
//! [`ChannelMessageStore::acknowledge`] or [`ChannelMessageStore::reject`].

use rusqlite::{Connection, TransactionBehavior};
use std::borrow::Cow;
use tracing::{debug, warn};
use uuid::Uuid;

use super::errors::{is_unique_violation, ClaimOutcome, InsertOutcome, StoreError, StoreResult};
use super::id_cache::IdCache;
use super::lifecycle::{probe_schema, Lifecycle, RunState};
use super::pool::SqlitePool;
use super::query::{expand_list_param, ChannelQueries, MESSAGE_IDS_PARAM};
use super::row::{
    bind_channel_message, group_scope, message_id_column, region_scope, require_id, NamedParams,
    RawMessageRow,
};
use crate::codec::{Codec, TrustedTypes};
use crate::config::StoreConfig;
use crate::message::{GroupKey, Message};
use crate::metrics::{
    record_counter, record_gauge, Timer, GROUPS_REMOVED, ID_CACHE_SIZE, MESSAGES_ADDED,
    MESSAGES_DUPLICATE, MESSAGES_POLLED, POLL_DURATION_MS, POLL_EMPTY, POLL_RACE_LOST,
};

const COMPONENT: &str = "channel_message_store";

/// Lightweight reference to a channel queue
///
/// The channel store never materializes pending messages; use
/// [`ChannelMessageStore::message_group_size`] for the queue depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageGroupHandle {
    group_key: GroupKey,
    region: String,
}

impl MessageGroupHandle {
    pub(crate) fn new(group_key: GroupKey, region: &str) -> Self {
        Self {
            group_key,
            region: region.to_string(),
        }
    }

    pub fn group_key(&self) -> GroupKey {
        self.group_key
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

/// SQL-backed queue store
pub struct ChannelMessageStore {
    pool: SqlitePool,
    config: StoreConfig,
    queries: ChannelQueries,
    codec: Codec,
    id_cache: IdCache,
    state: RunState,
}

impl ChannelMessageStore {
    /// Create a store over a caller-owned pool
    ///
    /// Statement text is rendered here, once. Only dialects that run on the
    /// bundled SQLite driver are accepted; the others are available as SQL
    /// text through [`ChannelQueries`].
    pub fn new(pool: SqlitePool, config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;

        if !config.dialect.is_executable() {
            return Err(StoreError::InvalidConfiguration(format!(
                "dialect '{}' cannot be executed by this store",
                config.dialect
            )));
        }

        let queries = ChannelQueries::new(config.dialect, &config.table_prefix);
        let codec = Codec::new(
            config.codec,
            TrustedTypes::new(config.trusted_types.iter().cloned()),
        );

        debug!(
            region = %config.region,
            dialect = %config.dialect,
            codec = %config.codec,
            priority = config.priority_enabled,
            id_cache = config.id_cache_enabled,
            "Created channel message store"
        );

        Ok(Self {
            pool,
            config,
            queries,
            codec,
            id_cache: IdCache::new(),
            state: RunState::default(),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn region(&self) -> &str {
        &self.config.region
    }

    pub fn queries(&self) -> &ChannelQueries {
        &self.queries
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Handle for a queue without touching the database
    pub fn group_handle(&self, group_id: impl Into<GroupKey>) -> MessageGroupHandle {
        MessageGroupHandle::new(group_id.into(), &self.config.region)
    }

    /// Store `message` at the tail of the queue
    ///
    /// Re-adding an id already present in the same queue is a no-op.
    pub fn add_message_to_group(
        &self,
        group_id: impl Into<GroupKey>,
        message: &Message,
    ) -> StoreResult<MessageGroupHandle> {
        let conn = self.pool.get()?;
        self.add_message_to_group_in(&conn, group_id, message)
    }

    /// [`Self::add_message_to_group`] on a caller-supplied connection
    pub fn add_message_to_group_in(
        &self,
        conn: &Connection,
        group_id: impl Into<GroupKey>,
        message: &Message,
    ) -> StoreResult<MessageGroupHandle> {
        let group_key = group_id.into();
        let region = &self.config.region;
        let id = require_id(message)?;
        let bytes = self.codec.encode(message)?;

        let params = bind_channel_message(
            &group_key,
            region,
            message,
            bytes,
            self.config.priority_enabled,
        );

        let outcome = match conn.execute(self.queries.create_message(), params.as_params().as_slice())
        {
            Ok(_) => InsertOutcome::Inserted,
            Err(e) if is_unique_violation(&e) => InsertOutcome::Duplicate,
            Err(e) => return Err(e.into()),
        };

        match outcome {
            InsertOutcome::Inserted => {
                debug!(group_key = %group_key, message_id = %id, region = %region, "Inserted message");
                record_counter(MESSAGES_ADDED, region, 1);
            }
            InsertOutcome::Duplicate => {
                debug!(
                    group_key = %group_key,
                    message_id = %id,
                    region = %region,
                    "Message already stored; ignoring duplicate insert"
                );
                record_counter(MESSAGES_DUPLICATE, region, 1);
            }
        }

        Ok(MessageGroupHandle::new(group_key, region))
    }

    /// Claim and remove the next eligible message, or `None` if the queue
    /// is empty (or its head was claimed by a concurrent consumer)
    ///
    /// Runs in an immediate transaction owned by the store. A message that
    /// fails to decode stays queued and the error is returned.
    pub fn poll_message_from_group(
        &self,
        group_id: impl Into<GroupKey>,
    ) -> StoreResult<Option<Message>> {
        let group_key = group_id.into();
        let timer = Timer::new(POLL_DURATION_MS);
        let result = self.poll_owned(&group_key);
        timer.stop();
        result
    }

    /// [`Self::poll_message_from_group`] inside the caller's transaction
    ///
    /// Nothing is committed here. With the id cache enabled, the returned
    /// id stays excluded from later polls until [`Self::acknowledge`] or
    /// [`Self::reject`] is called for it.
    pub fn poll_message_from_group_in(
        &self,
        conn: &Connection,
        group_id: impl Into<GroupKey>,
    ) -> StoreResult<Option<Message>> {
        let group_key = group_id.into();
        let timer = Timer::new(POLL_DURATION_MS);
        let result = self.poll_in(conn, &group_key);
        timer.stop();
        result
    }

    fn poll_owned(&self, group_key: &GroupKey) -> StoreResult<Option<Message>> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(message) = self.poll_in(&tx, group_key)? else {
            tx.commit()?;
            return Ok(None);
        };

        let committed = tx.commit();
        // This transaction was the only one the cache entry waited on
        if self.config.id_cache_enabled {
            self.id_cache.remove(&message.id());
            self.record_cache_size();
        }
        committed?;

        Ok(Some(message))
    }

    fn poll_in(&self, conn: &Connection, group_key: &GroupKey) -> StoreResult<Option<Message>> {
        let region = &self.config.region;

        let excluded = if self.config.id_cache_enabled {
            self.id_cache.snapshot()
        } else {
            Vec::new()
        };

        let template = self
            .queries
            .poll(self.config.priority_enabled, !excluded.is_empty());
        let sql: Cow<'_, str> = if excluded.is_empty() {
            Cow::Borrowed(template)
        } else {
            Cow::Owned(expand_list_param(template, MESSAGE_IDS_PARAM, excluded.len()))
        };

        let params = group_scope(group_key, region).with_list(
            MESSAGE_IDS_PARAM,
            excluded.iter().map(|id| message_id_column(*id)),
        );

        let raw = {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params.as_params().as_slice())?;
            let first = match rows.next()? {
                Some(row) => Some(RawMessageRow::from_row(row)?),
                None => None,
            };
            // Step RETURNING statements to completion
            while rows.next()?.is_some() {}
            first
        };

        let Some(raw) = raw else {
            debug!(group_key = %group_key, region = %region, "No message available");
            record_counter(POLL_EMPTY, region, 1);
            return Ok(None);
        };

        if !self.queries.is_single_statement_poll()
            && self.claim(conn, group_key, &raw.id)? == ClaimOutcome::RaceLost
        {
            warn!(
                group_key = %group_key,
                message_id = %raw.id,
                region = %region,
                "Polled message was claimed by another consumer"
            );
            record_counter(POLL_RACE_LOST, region, 1);
            return Ok(None);
        }

        let message = raw.decode(&self.codec)?;

        if self.config.id_cache_enabled {
            let added = self.id_cache.insert(message.id());
            debug!(message_id = %message.id(), added, "Cached polled message id");
            self.record_cache_size();
        }

        debug!(group_key = %group_key, message_id = %message.id(), region = %region, "Polled message");
        record_counter(MESSAGES_POLLED, region, 1);

        Ok(Some(message))
    }

    /// Delete a row selected by a two-statement poll
    fn claim(
        &self,
        conn: &Connection,
        group_key: &GroupKey,
        message_id: &str,
    ) -> StoreResult<ClaimOutcome> {
        let params = group_scope(group_key, &self.config.region)
            .with(":message_id", message_id.to_string());
        let deleted = conn.execute(self.queries.delete_message(), params.as_params().as_slice())?;
        Ok(ClaimOutcome::from_rows_affected(deleted))
    }

    /// Number of messages queued under `group_id`
    pub fn message_group_size(&self, group_id: impl Into<GroupKey>) -> StoreResult<usize> {
        let params = group_scope(&group_id.into(), &self.config.region);
        self.count(self.queries.count_group_size(), &params)
    }

    /// Number of non-empty queues in the region
    pub fn message_group_count(&self) -> StoreResult<usize> {
        self.count(self.queries.count_groups(), &region_scope(&self.config.region))
    }

    /// Number of queued messages across every group in the region
    pub fn message_count(&self) -> StoreResult<usize> {
        self.count(self.queries.count_messages(), &region_scope(&self.config.region))
    }

    fn count(&self, sql: &str, params: &NamedParams) -> StoreResult<usize> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(sql, params.as_params().as_slice(), |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Delete every message queued under `group_id`, returning how many
    pub fn remove_message_group(&self, group_id: impl Into<GroupKey>) -> StoreResult<usize> {
        let group_key = group_id.into();
        let region = &self.config.region;
        let conn = self.pool.get()?;

        let params = group_scope(&group_key, region);
        let deleted = conn.execute(self.queries.delete_group(), params.as_params().as_slice())?;

        debug!(group_key = %group_key, region = %region, deleted, "Removed message group");
        record_counter(GROUPS_REMOVED, region, 1);

        Ok(deleted)
    }

    /// Polled ids currently excluded from polls
    pub fn id_cache_size(&self) -> usize {
        self.id_cache.len()
    }

    /// The transaction that polled `id` committed
    pub fn acknowledge(&self, id: Uuid) {
        if self.id_cache.remove(&id) {
            debug!(message_id = %id, "Evicted acknowledged message id");
            self.record_cache_size();
        }
    }

    /// The transaction that polled `id` rolled back; the message becomes
    /// eligible for polling again
    pub fn reject(&self, id: Uuid) {
        if self.id_cache.remove(&id) {
            debug!(message_id = %id, "Evicted rejected message id");
            self.record_cache_size();
        }
    }

    fn record_cache_size(&self) {
        record_gauge(ID_CACHE_SIZE, &self.config.region, self.id_cache.len() as f64);
    }

    /// Verify the channel table is reachable
    pub fn check_schema(&self) -> StoreResult<()> {
        probe_schema(&self.pool, [self.queries.schema_probe()])
    }
}

impl Lifecycle for ChannelMessageStore {
    fn start(&self) -> StoreResult<()> {
        self.state.start_with(COMPONENT, || {
            if self.config.check_schema_on_start {
                self.check_schema()
            } else {
                Ok(())
            }
        })
    }

    fn stop(&self) {
        self.state.stop(COMPONENT)
    }

    fn is_running(&self) -> bool {
        self.state.is_running()
    }
}
