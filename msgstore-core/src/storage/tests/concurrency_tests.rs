//! Concurrent polling
//!
//! Many consumers draining one queue through a shared pool must each see a
//! disjoint set of messages, and together they must see every message.

#![cfg(test)]

use std::collections::HashSet;
use std::sync::Mutex;
use std::thread;

use uuid::Uuid;

use super::{ChannelMessageStore, Dialect, GroupMessageStore};
use crate::config::StoreConfig;
use crate::test_utils::{message_at, TestDb};

const MESSAGES: usize = 60;
const CONSUMERS: usize = 6;

/// Poll until the queue is drained, tolerating polls that lost a race
fn drain(store: &ChannelMessageStore, group: &str, seen: &Mutex<Vec<Uuid>>) {
    loop {
        match store.poll_message_from_group(group).unwrap() {
            Some(message) => seen.lock().unwrap().push(message.id()),
            None => {
                if store.message_group_size(group).unwrap() == 0 {
                    return;
                }
            }
        }
    }
}

fn assert_exactly_once(seen: Vec<Uuid>, expected: &HashSet<Uuid>) {
    let unique: HashSet<Uuid> = seen.iter().copied().collect();
    assert_eq!(unique.len(), seen.len(), "a message was delivered twice");
    assert_eq!(&unique, expected);
}

#[test]
fn test_concurrent_pollers_claim_each_message_once() {
    for dialect in [Dialect::Sqlite, Dialect::SqliteCompat] {
        let db = TestDb::new();
        let store = db.channel_store(StoreConfig::default().with_dialect(dialect));

        let mut expected = HashSet::new();
        for i in 0..MESSAGES {
            let message = message_at(format!("m{i}"), i as i64);
            expected.insert(message.id());
            store.add_message_to_group("work", &message).unwrap();
        }

        let seen = Mutex::new(Vec::new());
        thread::scope(|s| {
            for _ in 0..CONSUMERS {
                s.spawn(|| drain(&store, "work", &seen));
            }
        });

        assert_exactly_once(seen.into_inner().unwrap(), &expected);
        assert_eq!(store.message_count().unwrap(), 0, "{dialect}");
    }
}

#[test]
fn test_more_pollers_than_messages() {
    const AVAILABLE: usize = 3;
    const POLLERS: usize = 8;

    for dialect in [Dialect::Sqlite, Dialect::SqliteCompat] {
        let db = TestDb::new();
        let store = db.channel_store(StoreConfig::default().with_dialect(dialect));
        for i in 0..AVAILABLE {
            store.add_message_to_group("scarce", &message_at("x", i as i64)).unwrap();
        }

        let results = Mutex::new(Vec::new());
        thread::scope(|s| {
            for _ in 0..POLLERS {
                s.spawn(|| {
                    let polled = store.poll_message_from_group("scarce").unwrap();
                    results.lock().unwrap().push(polled.map(|m| m.id()));
                });
            }
        });

        let results = results.into_inner().unwrap();
        let claimed: Vec<Uuid> = results.iter().flatten().copied().collect();
        let unique: HashSet<Uuid> = claimed.iter().copied().collect();

        assert_eq!(results.len(), POLLERS);
        assert_eq!(claimed.len(), AVAILABLE, "{dialect}");
        assert_eq!(unique.len(), AVAILABLE, "{dialect}");
        assert_eq!(store.message_group_size("scarce").unwrap(), 0);
    }
}

#[test]
fn test_producers_and_consumers_interleave() {
    let db = TestDb::new();
    let store = db.channel_store(StoreConfig::default());

    let produced = Mutex::new(HashSet::new());
    let seen = Mutex::new(Vec::new());

    thread::scope(|s| {
        for producer in 0..3 {
            let store = &store;
            let produced = &produced;
            s.spawn(move || {
                for i in 0..20 {
                    let message = message_at(format!("p{producer}-{i}"), i);
                    store.add_message_to_group("mixed", &message).unwrap();
                    produced.lock().unwrap().insert(message.id());
                }
            });
        }
    });

    thread::scope(|s| {
        for _ in 0..CONSUMERS {
            s.spawn(|| drain(&store, "mixed", &seen));
        }
    });

    assert_exactly_once(seen.into_inner().unwrap(), &produced.into_inner().unwrap());
}

#[test]
fn test_separate_stores_share_one_queue() {
    let db = TestDb::new();
    let stores: Vec<ChannelMessageStore> = (0..3)
        .map(|_| db.channel_store(StoreConfig::default()))
        .collect();

    let mut expected = HashSet::new();
    for i in 0..30 {
        let message = message_at(format!("m{i}"), i);
        expected.insert(message.id());
        stores[i as usize % 3].add_message_to_group("q", &message).unwrap();
    }

    let seen = Mutex::new(Vec::new());
    thread::scope(|s| {
        for store in &stores {
            let seen = &seen;
            s.spawn(move || drain(store, "q", seen));
        }
    });

    assert_exactly_once(seen.into_inner().unwrap(), &expected);
}

#[test]
fn test_concurrent_group_polls() {
    let db = TestDb::new();
    let store: GroupMessageStore = db.group_store(StoreConfig::default());

    let messages: Vec<_> = (0..40).map(|i| message_at(format!("g{i}"), i)).collect();
    let expected: HashSet<Uuid> = messages.iter().map(|m| m.id()).collect();
    store.add_messages_to_group("batch", &messages).unwrap();

    let seen = Mutex::new(Vec::new());
    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                while let Some(message) = store.poll_message_from_group("batch").unwrap() {
                    seen.lock().unwrap().push(message.id());
                }
            });
        }
    });

    assert_exactly_once(seen.into_inner().unwrap(), &expected);
    assert_eq!(store.message_count().unwrap(), 0);
}

#[test]
fn test_concurrent_adds_create_group_once() {
    let db = TestDb::new();
    let store = db.group_store(StoreConfig::default());

    thread::scope(|s| {
        for t in 0..4 {
            let store = &store;
            s.spawn(move || {
                for i in 0..10 {
                    store
                        .add_message_to_group("shared", &message_at(format!("{t}-{i}"), i))
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(store.message_group_count().unwrap(), 1);
    assert_eq!(store.message_group_size("shared").unwrap(), 40);
}
