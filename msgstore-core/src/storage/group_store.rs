//! Group message store
//!
//! Correlation groups over three tables: `<PREFIX>MESSAGE` holds each message
//! once per region, `<PREFIX>GROUP_TO_MESSAGE` links messages to the groups
//! that hold them, and `<PREFIX>MESSAGE_GROUP` carries per-group metadata.
//! A message shared by several groups is only deleted once the last group
//! referencing it lets go.
//!
//! Every multi-statement mutation runs in an immediate transaction owned by
//! the store; the `*_in` variants run on a caller-supplied connection and
//! commit nothing.

use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

use super::errors::{is_unique_violation, InsertOutcome, StoreError, StoreResult};
use super::group::{GroupMetadata, MessageGroup, MessageMetadata};
use super::lifecycle::{probe_schema, Lifecycle, RunState};
use super::pool::SqlitePool;
use super::query::GroupQueries;
use super::row::{
    bind_group_message, group_scope, message_id_column, region_scope, require_id, NamedParams,
    RawMessageRow,
};
use super::stream::{GroupIter, MessageCursor, MessageStream, PagedMessage};
use crate::codec::{Codec, TrustedTypes};
use crate::config::StoreConfig;
use crate::message::{current_timestamp, GroupKey, Message};
use crate::metrics::{
    record_counter, GROUPS_REMOVED, GROUP_CREATE_RACE_LOST, MESSAGES_ADDED, MESSAGES_DUPLICATE,
    MESSAGES_POLLED, MESSAGES_REMOVED, POLL_EMPTY,
};

const COMPONENT: &str = "group_message_store";

/// SQL-backed correlation group store
pub struct GroupMessageStore {
    pool: SqlitePool,
    config: StoreConfig,
    queries: GroupQueries,
    codec: Codec,
    state: RunState,
}

impl GroupMessageStore {
    /// Create a store over a caller-owned pool
    pub fn new(pool: SqlitePool, config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;

        if !config.dialect.is_executable() {
            return Err(StoreError::InvalidConfiguration(format!(
                "dialect '{}' cannot be executed by this store",
                config.dialect
            )));
        }

        let queries = GroupQueries::new(config.dialect, &config.table_prefix);
        let codec = Codec::new(
            config.codec,
            TrustedTypes::new(config.trusted_types.iter().cloned()),
        );

        debug!(
            region = %config.region,
            dialect = %config.dialect,
            codec = %config.codec,
            page_size = config.page_size,
            "Created group message store"
        );

        Ok(Self {
            pool,
            config,
            queries,
            codec,
            state: RunState::default(),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn region(&self) -> &str {
        &self.config.region
    }

    pub fn queries(&self) -> &GroupQueries {
        &self.queries
    }

    pub(crate) fn page_size(&self) -> usize {
        self.config.page_size
    }

    // ---- Messages ---------------------------------------------------------

    /// Store a message outside of any group
    ///
    /// If the id is already stored, the stored message is returned and the
    /// new one is discarded.
    pub fn add_message(&self, message: &Message) -> StoreResult<Message> {
        let conn = self.pool.get()?;
        match self.insert_message(&conn, message)? {
            InsertOutcome::Inserted => Ok(message.clone()),
            InsertOutcome::Duplicate => Ok(self
                .fetch_message(&conn, message.id())?
                .unwrap_or_else(|| message.clone())),
        }
    }

    fn insert_message(&self, conn: &Connection, message: &Message) -> StoreResult<InsertOutcome> {
        let region = &self.config.region;
        let id = require_id(message)?;
        let bytes = self.codec.encode(message)?;
        let params = bind_group_message(region, message, bytes);

        let mut stmt = conn.prepare_cached(&self.queries.create_message)?;
        match stmt.execute(params.as_params().as_slice()) {
            Ok(_) => {
                debug!(message_id = %id, region = %region, "Inserted message");
                record_counter(MESSAGES_ADDED, region, 1);
                Ok(InsertOutcome::Inserted)
            }
            Err(e) if is_unique_violation(&e) => {
                debug!(message_id = %id, region = %region, "Message already stored; keeping existing row");
                record_counter(MESSAGES_DUPLICATE, region, 1);
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_message(&self, id: Uuid) -> StoreResult<Option<Message>> {
        let conn = self.pool.get()?;
        self.fetch_message(&conn, id)
    }

    fn fetch_message(&self, conn: &Connection, id: Uuid) -> StoreResult<Option<Message>> {
        match self.fetch_raw(conn, id)? {
            Some(raw) => raw.decode(&self.codec).map(Some),
            None => Ok(None),
        }
    }

    fn fetch_raw(&self, conn: &Connection, id: Uuid) -> StoreResult<Option<RawMessageRow>> {
        let params = region_scope(&self.config.region).with(":message_id", message_id_column(id));
        let raw = conn
            .query_row(
                &self.queries.get_message,
                params.as_params().as_slice(),
                RawMessageRow::from_row_with_date,
            )
            .optional()?;
        Ok(raw)
    }

    /// Id and stored creation time, without decoding the message
    pub fn get_message_metadata(&self, id: Uuid) -> StoreResult<Option<MessageMetadata>> {
        let conn = self.pool.get()?;
        let Some(raw) = self.fetch_raw(&conn, id)? else {
            return Ok(None);
        };
        Ok(Some(MessageMetadata {
            id: parse_message_id(&raw.id)?,
            created_date: raw.created_date.unwrap_or_default(),
        }))
    }

    /// Delete a message and every group's reference to it
    pub fn remove_message(&self, id: Uuid) -> StoreResult<Option<Message>> {
        let region = &self.config.region;
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(raw) = self.fetch_raw(&tx, id)? else {
            return Ok(None);
        };
        let message = raw.decode(&self.codec)?;

        let params = region_scope(region).with(":message_id", message_id_column(id));
        let unlinked = tx.execute(
            &self.queries.remove_message_from_all_groups,
            params.as_params().as_slice(),
        )?;
        let deleted = tx.execute(&self.queries.delete_message, params.as_params().as_slice())?;
        tx.commit()?;

        debug!(message_id = %id, region = %region, unlinked, "Removed message");
        record_counter(MESSAGES_REMOVED, region, deleted as u64);

        Ok(Some(message))
    }

    // ---- Counts -----------------------------------------------------------

    /// Messages stored in the region, grouped or not
    pub fn message_count(&self) -> StoreResult<usize> {
        self.count(&self.queries.get_message_count, &region_scope(&self.config.region))
    }

    /// Group memberships in the region; a message in two groups counts twice
    pub fn message_count_for_all_groups(&self) -> StoreResult<usize> {
        self.count(
            &self.queries.count_all_messages_in_groups,
            &region_scope(&self.config.region),
        )
    }

    pub fn message_group_size(&self, group_id: impl Into<GroupKey>) -> StoreResult<usize> {
        let params = group_scope(&group_id.into(), &self.config.region);
        self.count(&self.queries.count_all_messages_in_group, &params)
    }

    /// Groups with metadata in the region
    pub fn message_group_count(&self) -> StoreResult<usize> {
        self.count(&self.queries.count_all_groups, &region_scope(&self.config.region))
    }

    fn count(&self, sql: &str, params: &NamedParams) -> StoreResult<usize> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(sql, params.as_params().as_slice(), |row| row.get(0))?;
        Ok(count as usize)
    }

    // ---- Group membership -------------------------------------------------

    /// Add one message to a group, creating the group if needed
    pub fn add_message_to_group(
        &self,
        group_id: impl Into<GroupKey>,
        message: &Message,
    ) -> StoreResult<()> {
        self.add_messages_to_group(group_id, std::slice::from_ref(message))
    }

    /// Add messages to a group in one transaction
    ///
    /// A new group's creation date is the earliest timestamp among
    /// `messages`. Messages or memberships that already exist are skipped.
    /// An empty batch is a no-op and does not create the group.
    pub fn add_messages_to_group(
        &self,
        group_id: impl Into<GroupKey>,
        messages: &[Message],
    ) -> StoreResult<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        self.add_messages_to_group_in(&tx, group_id, messages)?;
        tx.commit()?;
        Ok(())
    }

    /// [`Self::add_messages_to_group`] on a caller-supplied connection
    pub fn add_messages_to_group_in(
        &self,
        conn: &Connection,
        group_id: impl Into<GroupKey>,
        messages: &[Message],
    ) -> StoreResult<()> {
        let group_key = group_id.into();
        let region = &self.config.region;

        if messages.is_empty() {
            debug!(group_key = %group_key, region = %region, "No messages to add; group left untouched");
            return Ok(());
        }
        for message in messages {
            require_id(message)?;
        }

        let now = current_timestamp();
        let created = messages
            .iter()
            .map(Message::timestamp)
            .min()
            .unwrap_or(now);
        self.upsert_group(conn, &group_key, created, now)?;

        for message in messages {
            self.insert_message(conn, message)?;
        }

        let mut link = conn.prepare_cached(&self.queries.create_group_to_message)?;
        let mut linked = 0usize;
        for message in messages {
            let params = group_scope(&group_key, region)
                .with(":message_id", message_id_column(message.id()));
            match link.execute(params.as_params().as_slice()) {
                Ok(_) => linked += 1,
                Err(e) if is_unique_violation(&e) => {
                    debug!(
                        group_key = %group_key,
                        message_id = %message.id(),
                        "Message already in group"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        debug!(group_key = %group_key, region = %region, linked, "Added messages to group");
        Ok(())
    }

    /// Create the group row, or bump its update date if it exists
    fn upsert_group(
        &self,
        conn: &Connection,
        group_key: &GroupKey,
        created: i64,
        now: i64,
    ) -> StoreResult<()> {
        let region = &self.config.region;
        let scope = group_scope(group_key, region);
        let existing: i64 = conn.query_row(
            &self.queries.group_exists,
            scope.as_params().as_slice(),
            |row| row.get(0),
        )?;
        if existing > 0 {
            return self.touch_group(conn, group_key, now);
        }

        let params = group_scope(group_key, region)
            .with(":created_date", created)
            .with(":updated_date", now);
        match conn.execute(
            &self.queries.create_message_group,
            params.as_params().as_slice(),
        ) {
            Ok(_) => {
                debug!(group_key = %group_key, region = %region, "Created message group");
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => {
                warn!(
                    group_key = %group_key,
                    region = %region,
                    "Group was created concurrently; updating instead"
                );
                record_counter(GROUP_CREATE_RACE_LOST, region, 1);
                self.touch_group(conn, group_key, now)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn touch_group(&self, conn: &Connection, group_key: &GroupKey, now: i64) -> StoreResult<()> {
        let params = group_scope(group_key, &self.config.region).with(":updated_date", now);
        conn.execute(
            &self.queries.update_message_group,
            params.as_params().as_slice(),
        )?;
        Ok(())
    }

    /// Drop the group's references to `messages`, deleting any message no
    /// other group still holds
    pub fn remove_messages_from_group(
        &self,
        group_id: impl Into<GroupKey>,
        messages: &[Message],
    ) -> StoreResult<()> {
        let group_key = group_id.into();
        let ids: Vec<Uuid> = messages.iter().map(Message::id).collect();

        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        self.unlink_messages(&tx, &group_key, &ids)?;
        tx.commit()?;
        Ok(())
    }

    fn unlink_messages(&self, conn: &Connection, group_key: &GroupKey, ids: &[Uuid]) -> StoreResult<()> {
        let region = &self.config.region;
        let mut unlink = conn.prepare_cached(&self.queries.remove_message_from_group)?;
        let mut delete = conn.prepare_cached(&self.queries.delete_unreferenced_message)?;

        let mut deleted = 0usize;
        for id in ids {
            let params = group_scope(group_key, region).with(":message_id", message_id_column(*id));
            unlink.execute(params.as_params().as_slice())?;

            let params = region_scope(region).with(":message_id", message_id_column(*id));
            deleted += delete.execute(params.as_params().as_slice())?;
        }

        self.touch_group(conn, group_key, current_timestamp())?;
        debug!(
            group_key = %group_key,
            region = %region,
            unlinked = ids.len(),
            deleted,
            "Removed messages from group"
        );
        Ok(())
    }

    // ---- Group reads ------------------------------------------------------

    pub fn group_metadata(&self, group_id: impl Into<GroupKey>) -> StoreResult<Option<GroupMetadata>> {
        let conn = self.pool.get()?;
        self.fetch_metadata(&conn, &group_id.into())
    }

    fn fetch_metadata(&self, conn: &Connection, group_key: &GroupKey) -> StoreResult<Option<GroupMetadata>> {
        let params = group_scope(group_key, &self.config.region);
        let metadata = conn
            .query_row(
                &self.queries.get_group_info,
                params.as_params().as_slice(),
                GroupMetadata::from_row,
            )
            .optional()?;
        Ok(metadata)
    }

    /// Metadata and messages, read from one snapshot
    pub fn get_message_group(&self, group_id: impl Into<GroupKey>) -> StoreResult<MessageGroup> {
        let group_key = group_id.into();
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let metadata = self.fetch_metadata(&tx, &group_key)?;
        let messages = match metadata {
            Some(_) => self.collect_messages(&tx, &group_key)?,
            None => Vec::new(),
        };
        tx.commit()?;

        Ok(MessageGroup::new(group_key, metadata, messages))
    }

    /// Every message in the group, oldest first
    pub fn get_messages_for_group(&self, group_id: impl Into<GroupKey>) -> StoreResult<Vec<Message>> {
        let conn = self.pool.get()?;
        self.collect_messages(&conn, &group_id.into())
    }

    fn collect_messages(&self, conn: &Connection, group_key: &GroupKey) -> StoreResult<Vec<Message>> {
        let mut messages = Vec::new();
        let mut cursor = MessageCursor::start();
        loop {
            let page = self.fetch_message_page(conn, group_key, &cursor)?;
            let full = page.len() == self.page_size();
            if let Some(last) = page.last() {
                cursor = last.cursor.clone();
            }
            messages.extend(page.into_iter().map(|row| row.message));
            if !full {
                return Ok(messages);
            }
        }
    }

    /// Lazily page through the group's messages, oldest first
    pub fn stream_messages_for_group(&self, group_id: impl Into<GroupKey>) -> MessageStream<'_> {
        MessageStream::new(self, group_id.into())
    }

    pub(crate) fn load_message_page(
        &self,
        group_key: &GroupKey,
        after: &MessageCursor,
    ) -> StoreResult<Vec<PagedMessage>> {
        let conn = self.pool.get()?;
        self.fetch_message_page(&conn, group_key, after)
    }

    fn fetch_message_page(
        &self,
        conn: &Connection,
        group_key: &GroupKey,
        after: &MessageCursor,
    ) -> StoreResult<Vec<PagedMessage>> {
        let params = group_scope(group_key, &self.config.region)
            .with(":after_date", after.created_date)
            .with(":after_id", after.message_id.clone())
            .with(":limit", self.page_size() as i64);

        let mut stmt = conn.prepare_cached(&self.queries.list_messages_page)?;
        let raws = stmt
            .query_map(params.as_params().as_slice(), RawMessageRow::from_row_with_date)?
            .collect::<Result<Vec<_>, _>>()?;

        raws.into_iter()
            .map(|raw| -> StoreResult<PagedMessage> {
                let message = raw.decode(&self.codec)?;
                Ok(PagedMessage {
                    cursor: MessageCursor {
                        created_date: raw.created_date.unwrap_or_default(),
                        message_id: raw.id,
                    },
                    message,
                })
            })
            .collect()
    }

    /// Lazily page through the metadata of every group in the region
    pub fn iter_groups(&self) -> GroupIter<'_> {
        GroupIter::new(self)
    }

    pub(crate) fn load_group_page(&self, after_key: &str) -> StoreResult<Vec<GroupMetadata>> {
        let conn = self.pool.get()?;
        let params = region_scope(&self.config.region)
            .with(":after_key", after_key.to_string())
            .with(":limit", self.page_size() as i64);

        let mut stmt = conn.prepare_cached(&self.queries.list_groups_page)?;
        let groups = stmt
            .query_map(params.as_params().as_slice(), GroupMetadata::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(groups)
    }

    // ---- Polling ----------------------------------------------------------

    /// Oldest message in the group, left in place
    pub fn get_one_message_from_group(
        &self,
        group_id: impl Into<GroupKey>,
    ) -> StoreResult<Option<Message>> {
        let conn = self.pool.get()?;
        match self.oldest_in_group(&conn, &group_id.into())? {
            Some(raw) => raw.decode(&self.codec).map(Some),
            None => Ok(None),
        }
    }

    fn oldest_in_group(&self, conn: &Connection, group_key: &GroupKey) -> StoreResult<Option<RawMessageRow>> {
        let params = group_scope(group_key, &self.config.region);
        let raw = conn
            .query_row(
                &self.queries.poll_from_group,
                params.as_params().as_slice(),
                RawMessageRow::from_row_with_date,
            )
            .optional()?;
        Ok(raw)
    }

    /// Remove and return the oldest message in the group
    ///
    /// The message row itself survives while another group references it.
    /// A message that fails to decode stays in the group.
    pub fn poll_message_from_group(
        &self,
        group_id: impl Into<GroupKey>,
    ) -> StoreResult<Option<Message>> {
        let group_key = group_id.into();
        let region = &self.config.region;
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(raw) = self.oldest_in_group(&tx, &group_key)? else {
            debug!(group_key = %group_key, region = %region, "No message available");
            record_counter(POLL_EMPTY, region, 1);
            return Ok(None);
        };

        let message = raw.decode(&self.codec)?;
        self.unlink_messages(&tx, &group_key, &[message.id()])?;
        tx.commit()?;

        debug!(group_key = %group_key, message_id = %message.id(), region = %region, "Polled message");
        record_counter(MESSAGES_POLLED, region, 1);

        Ok(Some(message))
    }

    // ---- Group metadata updates -------------------------------------------

    /// Mark the group complete; there is no way to clear the flag short of
    /// removing the group
    pub fn complete_group(&self, group_id: impl Into<GroupKey>) -> StoreResult<()> {
        let group_key = group_id.into();
        let params = self.update_params(&group_key);
        self.update_group(&self.queries.complete_group, &group_key, &params, "complete")
    }

    pub fn set_last_released_sequence_number_for_group(
        &self,
        group_id: impl Into<GroupKey>,
        sequence: i64,
    ) -> StoreResult<()> {
        let group_key = group_id.into();
        let params = self.update_params(&group_key).with(":sequence", sequence);
        self.update_group(
            &self.queries.update_last_released_sequence,
            &group_key,
            &params,
            "last_released_sequence",
        )
    }

    /// Replace the group's condition; `None` clears it
    pub fn set_group_condition(
        &self,
        group_id: impl Into<GroupKey>,
        condition: Option<&str>,
    ) -> StoreResult<()> {
        let group_key = group_id.into();
        let params = self
            .update_params(&group_key)
            .with(":condition", condition.map(str::to_string));
        self.update_group(
            &self.queries.update_group_condition,
            &group_key,
            &params,
            "condition",
        )
    }

    fn update_params(&self, group_key: &GroupKey) -> NamedParams {
        group_scope(group_key, &self.config.region).with(":updated_date", current_timestamp())
    }

    fn update_group(
        &self,
        sql: &str,
        group_key: &GroupKey,
        params: &NamedParams,
        field: &'static str,
    ) -> StoreResult<()> {
        let conn = self.pool.get()?;
        let updated = conn.execute(sql, params.as_params().as_slice())?;
        if updated == 0 {
            debug!(group_key = %group_key, field, "No such group; nothing updated");
        } else {
            debug!(group_key = %group_key, field, "Updated group");
        }
        Ok(())
    }

    /// Delete the group, its memberships, and every message only it held
    pub fn remove_message_group(&self, group_id: impl Into<GroupKey>) -> StoreResult<()> {
        let group_key = group_id.into();
        let region = &self.config.region;
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let params = group_scope(&group_key, region);
        let params = params.as_params();
        let messages = tx.execute(
            &self.queries.delete_messages_exclusive_to_group,
            params.as_slice(),
        )?;
        let links = tx.execute(
            &self.queries.remove_group_to_message_join,
            params.as_slice(),
        )?;
        tx.execute(&self.queries.delete_message_group, params.as_slice())?;
        tx.commit()?;

        debug!(group_key = %group_key, region = %region, messages, links, "Removed message group");
        record_counter(GROUPS_REMOVED, region, 1);
        Ok(())
    }

    /// Verify all three group tables are reachable
    pub fn check_schema(&self) -> StoreResult<()> {
        probe_schema(&self.pool, self.queries.schema_probes())
    }
}

impl Lifecycle for GroupMessageStore {
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

fn parse_message_id(column: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(column).map_err(|e| {
        StoreError::Deserialization(format!("invalid MESSAGE_ID '{}': {}", column, e))
    })
}
