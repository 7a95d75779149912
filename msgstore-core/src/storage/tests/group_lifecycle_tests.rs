//! Group store lifecycle: creation, completion, release, removal, and
//! paged enumeration

#![cfg(test)]

use std::collections::HashSet;

use super::{GroupMessageStore, StoreError};
use crate::config::StoreConfig;
use crate::message::{GroupKey, Message};
use crate::test_utils::{message_at, TestDb};

fn paged(db: &TestDb, page_size: usize) -> GroupMessageStore {
    db.group_store(StoreConfig::default().with_page_size(page_size))
}

#[test]
fn test_complete_group_still_accepts_messages() {
    let db = TestDb::new();
    let store = db.group_store(StoreConfig::default());

    store.add_message_to_group("agg", &message_at("one", 1)).unwrap();
    store.complete_group("agg").unwrap();
    store.add_message_to_group("agg", &message_at("two", 2)).unwrap();

    let group = store.get_message_group("agg").unwrap();
    assert!(group.is_complete());
    assert_eq!(group.size(), 2);
}

#[test]
fn test_release_cycle() {
    let db = TestDb::new();
    let store = db.group_store(StoreConfig::default());
    let batch: Vec<Message> = (1..=3).map(|i| message_at(format!("s{i}"), i)).collect();

    store.add_messages_to_group("seq", &batch).unwrap();
    store.remove_messages_from_group("seq", &batch[..2]).unwrap();
    store.set_last_released_sequence_number_for_group("seq", 2).unwrap();

    let group = store.get_message_group("seq").unwrap();
    assert_eq!(group.last_released_sequence(), 2);
    assert_eq!(group.messages(), &batch[2..]);
    assert_eq!(store.message_count().unwrap(), 1);
}

#[test]
fn test_remove_group_clears_everything_it_owns() {
    let db = TestDb::new();
    let store = db.group_store(StoreConfig::default());
    let batch: Vec<Message> = (0..5).map(|i| message_at(format!("m{i}"), i)).collect();

    store.add_messages_to_group("doomed", &batch).unwrap();
    store.complete_group("doomed").unwrap();
    store.remove_message_group("doomed").unwrap();

    let group = store.get_message_group("doomed").unwrap();
    assert!(!group.exists());
    assert_eq!(group.size(), 0);
    assert_eq!(store.message_group_size("doomed").unwrap(), 0);
    assert_eq!(store.message_count().unwrap(), 0);
    assert_eq!(store.message_group_count().unwrap(), 0);

    // Recreated from scratch, not complete
    store.add_message_to_group("doomed", &message_at("again", 9)).unwrap();
    assert!(!store.get_message_group("doomed").unwrap().is_complete());
}

#[test]
fn test_remove_group_keeps_shared_messages() {
    let db = TestDb::new();
    let store = db.group_store(StoreConfig::default());
    let shared = message_at("shared", 1);
    let exclusive = message_at("exclusive", 2);

    store.add_messages_to_group("a", &[shared.clone(), exclusive.clone()]).unwrap();
    store.add_message_to_group("b", &shared).unwrap();

    store.remove_message_group("a").unwrap();

    assert_eq!(store.get_message(exclusive.id()).unwrap(), None);
    assert_eq!(store.get_message(shared.id()).unwrap(), Some(shared.clone()));
    assert_eq!(store.get_messages_for_group("b").unwrap(), [shared]);
    assert_eq!(store.message_count_for_all_groups().unwrap(), 1);
}

#[test]
fn test_remove_group_keeps_ungrouped_messages() {
    let db = TestDb::new();
    let store = db.group_store(StoreConfig::default());
    let loose = Message::new("loose");

    store.add_message(&loose).unwrap();
    store.add_message_to_group("g", &Message::new("grouped")).unwrap();
    store.remove_message_group("g").unwrap();

    assert_eq!(store.get_message(loose.id()).unwrap(), Some(loose));
}

#[test]
fn test_stream_crosses_page_boundaries() {
    let db = TestDb::new();
    let store = paged(&db, 3);
    let batch: Vec<Message> = (0..10).map(|i| message_at(format!("m{i}"), i / 2)).collect();
    store.add_messages_to_group("big", &batch).unwrap();

    let streamed: Vec<Message> = store
        .stream_messages_for_group("big")
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(streamed.len(), batch.len());
    let ids: HashSet<_> = streamed.iter().map(Message::id).collect();
    assert_eq!(ids.len(), batch.len());
    assert_eq!(streamed, batch);
    assert_eq!(store.get_messages_for_group("big").unwrap(), streamed);
}

#[test]
fn test_stream_is_restartable() {
    let db = TestDb::new();
    let store = paged(&db, 2);
    let batch: Vec<Message> = (0..4).map(|i| message_at(format!("m{i}"), i)).collect();
    store.add_messages_to_group("g", &batch).unwrap();

    let mut stream = store.stream_messages_for_group("g");
    assert_eq!(stream.group_key(), GroupKey::new("g"));
    assert_eq!(stream.next().unwrap().unwrap(), batch[0]);

    let again: Vec<Message> = store
        .stream_messages_for_group("g")
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(again, batch);
}

#[test]
fn test_stream_of_exact_page_multiple() {
    let db = TestDb::new();
    let store = paged(&db, 2);
    let batch: Vec<Message> = (0..4).map(|i| message_at(format!("m{i}"), i)).collect();
    store.add_messages_to_group("g", &batch).unwrap();

    assert_eq!(store.stream_messages_for_group("g").count(), 4);
    assert_eq!(store.stream_messages_for_group("empty").count(), 0);
}

#[test]
fn test_iter_groups_pages_through_region() {
    let db = TestDb::new();
    let store = paged(&db, 2);
    let other_region = db.group_store(StoreConfig::default().with_region("OTHER"));

    let names: Vec<String> = (0..5).map(|i| format!("group-{i}")).collect();
    for name in &names {
        store.add_message_to_group(name, &Message::new("x")).unwrap();
    }
    other_region.add_message_to_group("elsewhere", &Message::new("y")).unwrap();

    let seen: Vec<GroupKey> = store
        .iter_groups()
        .map(|g| g.map(|g| g.group_key))
        .collect::<Result<_, _>>()
        .unwrap();

    let expected: HashSet<GroupKey> = names.iter().map(GroupKey::from).collect();
    assert_eq!(seen.len(), expected.len());
    assert_eq!(seen.iter().copied().collect::<HashSet<_>>(), expected);
    assert!(seen.windows(2).all(|w| w[0].to_column() < w[1].to_column()));
}

#[test]
fn test_undecodable_message_stays_in_group() {
    let db = TestDb::new();
    let writer = db.group_store(StoreConfig::default().with_trusted_types(["orders.*"]));
    let reader = db.group_store(StoreConfig::default());
    let message = Message::new(crate::message::Payload::Object {
        type_name: "orders.Order".to_string(),
        value: serde_json::json!({"id": 1}),
    });

    writer.add_message_to_group("g", &message).unwrap();

    assert!(matches!(
        reader.poll_message_from_group("g"),
        Err(StoreError::Deserialization(_))
    ));
    assert_eq!(reader.message_group_size("g").unwrap(), 1);
    assert_eq!(writer.poll_message_from_group("g").unwrap(), Some(message));
}
