//! Durable queue round-trips across simulated process restarts

use rusqlite::Connection;
use serde_json::json;
use tempfile::TempDir;

use tracelink_core::{PendingQueue, QueueConfig, RequestEnvelope, RequestKind, SqliteRecordStore};

fn open_queue(dir: &TempDir) -> PendingQueue {
    let store = SqliteRecordStore::open(dir.path().join("queue.sqlite")).unwrap();
    PendingQueue::new(Box::new(store), &QueueConfig::default())
}

fn event(name: &str) -> RequestEnvelope {
    RequestEnvelope::new(RequestKind::CompletedAction, json!({ "event": name })).unwrap()
}

#[test]
fn envelopes_survive_restart_in_order() {
    let dir = TempDir::new().unwrap();

    let ids = {
        let mut queue = open_queue(&dir);
        let a = event("first");
        let b = event("second");
        let c = RequestEnvelope::new(RequestKind::GetUrl, json!({ "channel": "email" })).unwrap();
        let ids = [a.id, b.id, c.id];
        queue.enqueue(a).unwrap();
        queue.enqueue(b).unwrap();
        queue.enqueue(c).unwrap();
        ids
        // Queue dropped here; nothing was dispatched before the "crash".
    };

    let mut queue = open_queue(&dir);
    let restored = queue.load_from_store().unwrap();
    assert_eq!(restored, 3);

    for expected in ids {
        let envelope = queue.pop_next().unwrap();
        assert_eq!(envelope.id, expected);
    }
    assert!(queue.is_empty());
}

#[test]
fn reloaded_envelopes_keep_their_fields() {
    let dir = TempDir::new().unwrap();

    {
        let mut queue = open_queue(&dir);
        queue.enqueue(event("purchase")).unwrap();
        // Retry bookkeeping written through head mutation survives too.
        if let Some(head) = queue.head_mut() {
            head.retry_count = 2;
        }
        queue.flush_to_store();
    }

    let mut queue = open_queue(&dir);
    queue.load_from_store().unwrap();

    let envelope = queue.pop_next().unwrap();
    assert_eq!(envelope.kind, RequestKind::CompletedAction);
    assert_eq!(envelope.retry_count, 2);
    assert_eq!(envelope.payload["event"], "purchase");
    // Completion slots are not persisted.
    assert_eq!(envelope.callback.waiter_count(), 0);
}

#[test]
fn corrupt_record_is_skipped_not_fatal() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("queue.sqlite");

    let (first_id, third_id) = {
        let store = SqliteRecordStore::open(&db_path).unwrap();
        let mut queue = PendingQueue::new(Box::new(store), &QueueConfig::default());
        let a = event("keep-me");
        let b = event("doomed");
        let c = event("also-keep-me");
        let ids = (a.id, c.id);
        queue.enqueue(a).unwrap();
        queue.enqueue(b).unwrap();
        queue.enqueue(c).unwrap();
        ids
    };

    // Corrupt the middle record directly in the store.
    {
        let conn = Connection::open(&db_path).unwrap();
        conn.execute(
            "UPDATE pending_requests SET envelope = '{not json' WHERE position = 1",
            [],
        )
        .unwrap();
    }

    let mut queue = open_queue(&dir);
    let restored = queue.load_from_store().unwrap();
    assert_eq!(restored, 2);
    assert_eq!(queue.pop_next().unwrap().id, first_id);
    assert_eq!(queue.pop_next().unwrap().id, third_id);
}

#[test]
fn load_on_fresh_store_is_empty() {
    let dir = TempDir::new().unwrap();
    let mut queue = open_queue(&dir);
    assert_eq!(queue.load_from_store().unwrap(), 0);
    assert!(queue.peek_next().is_none());
}
