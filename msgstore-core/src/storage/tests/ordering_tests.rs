//! Delivery order of the channel store
//!
//! FIFO queues deliver in the order messages were added, whatever their own
//! timestamps say. Priority queues deliver by priority (absent priority
//! last), then FIFO.

#![cfg(test)]

use proptest::prelude::*;

use super::Dialect;
use crate::config::StoreConfig;
use crate::message::Message;
use crate::test_utils::{message_at, prioritized_at, TestDb};

const SQLITE_DIALECTS: [Dialect; 2] = [Dialect::Sqlite, Dialect::SqliteCompat];

fn drain_texts(store: &super::ChannelMessageStore, group: &str) -> Vec<String> {
    std::iter::from_fn(|| store.poll_message_from_group(group).unwrap())
        .map(|m: Message| m.payload().as_text().unwrap_or_default().to_string())
        .collect()
}

#[test]
fn test_fifo_follows_add_order() {
    for dialect in SQLITE_DIALECTS {
        let db = TestDb::new();
        let store = db.channel_store(StoreConfig::default().with_dialect(dialect));

        let built_first = Message::new("built-first");
        std::thread::sleep(std::time::Duration::from_millis(5));
        let built_second = Message::new("built-second");
        let stale = message_at("stale", 1);

        store.add_message_to_group("q", &built_second).unwrap();
        store.add_message_to_group("q", &built_first).unwrap();
        store.add_message_to_group("q", &stale).unwrap();

        assert_eq!(
            drain_texts(&store, "q"),
            ["built-second", "built-first", "stale"],
            "{dialect}"
        );
    }
}

#[test]
fn test_colliding_timestamps_keep_insertion_order() {
    for dialect in SQLITE_DIALECTS {
        let db = TestDb::new();
        let store = db.channel_store(StoreConfig::default().with_dialect(dialect));

        let expected: Vec<String> = (0..10).map(|i| format!("m{i}")).collect();
        for text in &expected {
            store.add_message_to_group("q", &message_at(text.as_str(), 42)).unwrap();
        }

        assert_eq!(drain_texts(&store, "q"), expected, "{dialect}");
    }
}

#[test]
fn test_priority_order_puts_missing_priority_last() {
    for dialect in SQLITE_DIALECTS {
        let db = TestDb::new();
        let store = db.channel_store(
            StoreConfig::default()
                .with_dialect(dialect)
                .with_priority(true),
        );

        store.add_message_to_group("q", &prioritized_at("p3", 1, Some(3))).unwrap();
        store.add_message_to_group("q", &prioritized_at("none-a", 2, None)).unwrap();
        store.add_message_to_group("q", &prioritized_at("p7", 3, Some(7))).unwrap();
        store.add_message_to_group("q", &prioritized_at("none-b", 4, None)).unwrap();

        assert_eq!(
            drain_texts(&store, "q"),
            ["p7", "p3", "none-a", "none-b"],
            "{dialect}"
        );
    }
}

#[test]
fn test_equal_priority_falls_back_to_fifo() {
    let db = TestDb::new();
    let store = db.channel_store(StoreConfig::default().with_priority(true));

    store.add_message_to_group("q", &prioritized_at("first", 20, Some(5))).unwrap();
    store.add_message_to_group("q", &prioritized_at("second", 10, Some(5))).unwrap();
    store.add_message_to_group("q", &prioritized_at("third", 10, Some(5))).unwrap();

    assert_eq!(drain_texts(&store, "q"), ["first", "second", "third"]);
}

#[test]
fn test_priority_ignored_when_disabled() {
    let db = TestDb::new();
    let store = db.channel_store(StoreConfig::default());

    store.add_message_to_group("q", &prioritized_at("low", 1, Some(1))).unwrap();
    store.add_message_to_group("q", &prioritized_at("high", 2, Some(9))).unwrap();

    assert_eq!(drain_texts(&store, "q"), ["low", "high"]);
}

#[test]
fn test_queues_are_independent() {
    let db = TestDb::new();
    let store = db.channel_store(StoreConfig::default());

    store.add_message_to_group("a", &message_at("a1", 1)).unwrap();
    store.add_message_to_group("b", &message_at("b1", 0)).unwrap();
    store.add_message_to_group("a", &message_at("a2", 2)).unwrap();

    assert_eq!(drain_texts(&store, "a"), ["a1", "a2"]);
    assert_eq!(drain_texts(&store, "b"), ["b1"]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_priority_drain_is_sorted(
        entries in prop::collection::vec((0i64..5, prop::option::of(0i32..4)), 1..20)
    ) {
        let db = TestDb::new();
        let store = db.channel_store(StoreConfig::default().with_priority(true));

        let mut expected: Vec<(Option<i32>, usize)> = Vec::new();
        for (i, (timestamp, priority)) in entries.iter().enumerate() {
            let message = prioritized_at(i.to_string(), *timestamp, *priority);
            store.add_message_to_group("q", &message).unwrap();
            expected.push((*priority, i));
        }

        // Highest priority first, absent priority last, then add order
        expected.sort_by(|a, b| {
            let rank = |p: Option<i32>| p.map_or(i64::MIN, i64::from);
            rank(b.0).cmp(&rank(a.0)).then(a.1.cmp(&b.1))
        });
        let expected: Vec<String> = expected.iter().map(|(_, i)| i.to_string()).collect();

        prop_assert_eq!(drain_texts(&store, "q"), expected);
    }
}
