//! Lazy, restartable enumeration over the group store
//!
//! Both iterators page with a keyset cursor: each page is fetched on its own
//! pooled connection only once the previous page has been consumed, so
//! neither a group's messages nor the region's groups are ever loaded in
//! full. Starting a new iterator always begins from the first row.

use std::collections::VecDeque;

use super::errors::StoreResult;
use super::group::GroupMetadata;
use super::group_store::GroupMessageStore;
use crate::message::{GroupKey, Message};

/// Position after the last message returned: `(CREATED_DATE, MESSAGE_ID)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MessageCursor {
    pub(crate) created_date: i64,
    pub(crate) message_id: String,
}

impl MessageCursor {
    /// Sorts before every stored message
    pub(crate) fn start() -> Self {
        Self {
            created_date: i64::MIN,
            message_id: String::new(),
        }
    }
}

/// One decoded row of a message page
pub(crate) struct PagedMessage {
    pub(crate) cursor: MessageCursor,
    pub(crate) message: Message,
}

/// Messages of one group, oldest first
pub struct MessageStream<'a> {
    store: &'a GroupMessageStore,
    group_key: GroupKey,
    buffer: VecDeque<Message>,
    cursor: MessageCursor,
    done: bool,
}

impl<'a> MessageStream<'a> {
    pub(crate) fn new(store: &'a GroupMessageStore, group_key: GroupKey) -> Self {
        Self {
            store,
            group_key,
            buffer: VecDeque::new(),
            cursor: MessageCursor::start(),
            done: false,
        }
    }

    pub fn group_key(&self) -> GroupKey {
        self.group_key
    }
}

impl Iterator for MessageStream<'_> {
    type Item = StoreResult<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(message) = self.buffer.pop_front() {
            return Some(Ok(message));
        }
        if self.done {
            return None;
        }

        let page_size = self.store.page_size();
        match self.store.load_message_page(&self.group_key, &self.cursor) {
            Ok(page) => {
                if page.len() < page_size {
                    self.done = true;
                }
                if let Some(last) = page.last() {
                    self.cursor = last.cursor.clone();
                }
                self.buffer.extend(page.into_iter().map(|row| row.message));
                self.buffer.pop_front().map(Ok)
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Metadata of every group in the store's region, ordered by group key
pub struct GroupIter<'a> {
    store: &'a GroupMessageStore,
    buffer: VecDeque<GroupMetadata>,
    after_key: String,
    done: bool,
}

impl<'a> GroupIter<'a> {
    pub(crate) fn new(store: &'a GroupMessageStore) -> Self {
        Self {
            store,
            buffer: VecDeque::new(),
            after_key: String::new(),
            done: false,
        }
    }
}

impl Iterator for GroupIter<'_> {
    type Item = StoreResult<GroupMetadata>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(group) = self.buffer.pop_front() {
            return Some(Ok(group));
        }
        if self.done {
            return None;
        }

        let page_size = self.store.page_size();
        match self.store.load_group_page(&self.after_key) {
            Ok(page) => {
                if page.len() < page_size {
                    self.done = true;
                }
                if let Some(last) = page.last() {
                    self.after_key = last.group_key.to_column();
                }
                self.buffer.extend(page);
                self.buffer.pop_front().map(Ok)
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
