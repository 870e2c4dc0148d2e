//! Pending request queue
//!
//! An insertion-ordered queue of [`RequestEnvelope`]s with head promotion for
//! session envelopes and write-through persistence: every mutation flushes
//! the full queue image to the durable store before returning, so a crash
//! mid-dispatch leaves the store consistent with "attempt not yet completed".

use std::collections::VecDeque;

use uuid::Uuid;

use crate::config::QueueConfig;
use crate::envelope::{Priority, RequestEnvelope};
use crate::errors::QueueError;
use crate::store::RecordStore;

// ----------------------------------------------------------------------------
// Pending Queue
// ----------------------------------------------------------------------------

/// Ordered, durable collection of pending request envelopes
pub struct PendingQueue {
    entries: VecDeque<RequestEnvelope>,
    store: Box<dyn RecordStore>,
    max_pending: usize,
}

impl PendingQueue {
    /// Create an empty queue over the given store
    pub fn new(store: Box<dyn RecordStore>, config: &QueueConfig) -> Self {
        Self {
            entries: VecDeque::new(),
            store,
            max_pending: config.max_pending,
        }
    }

    /// Load persisted envelopes from the durable store.
    ///
    /// Corrupt records are logged and dropped individually; the rest of the
    /// image loads normally. Returns the number of envelopes restored.
    pub fn load_from_store(&mut self) -> Result<usize, QueueError> {
        let records = self.store.load_all()?;
        self.entries.clear();

        for (position, record) in records {
            match serde_json::from_str::<RequestEnvelope>(&record) {
                Ok(envelope) => self.entries.push_back(envelope),
                Err(e) => {
                    let err = QueueError::Corrupt {
                        position,
                        reason: e.to_string(),
                    };
                    tracing::warn!("dropping persisted record: {err}");
                }
            }
        }

        // Rewrite the image so dropped records do not come back.
        self.flush();
        Ok(self.entries.len())
    }

    /// Append an envelope, promoting `Priority::Front` envelopes to the head.
    ///
    /// The capacity limit applies to normal submissions only; session
    /// open/close envelopes are always accepted.
    pub fn enqueue(&mut self, envelope: RequestEnvelope) -> Result<(), QueueError> {
        if envelope.priority == Priority::Normal && self.is_full() {
            return Err(QueueError::Full {
                capacity: self.max_pending,
            });
        }
        match envelope.priority {
            Priority::Front => self.entries.push_front(envelope),
            Priority::Normal => self.entries.push_back(envelope),
        }
        self.flush();
        Ok(())
    }

    /// Whether normal submissions would currently be rejected
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_pending
    }

    /// Inspect the head envelope without removing it.
    ///
    /// The dispatcher executes the head in place: the envelope stays queued
    /// (and stays in the durable store) until its attempt is terminal, so a
    /// crash mid-call replays it on the next start. A retrying envelope
    /// keeps the head position; strictly-newer envelopes never jump ahead
    /// of it.
    pub fn peek_next(&self) -> Option<&RequestEnvelope> {
        self.entries.front()
    }

    /// Mutable access to the head envelope (retry bookkeeping, payload
    /// enrichment). Call [`flush_to_store`](Self::flush_to_store) after
    /// mutating.
    pub fn head_mut(&mut self) -> Option<&mut RequestEnvelope> {
        self.entries.front_mut()
    }

    /// Remove and return the head envelope once its outcome is terminal
    pub fn pop_next(&mut self) -> Option<RequestEnvelope> {
        let envelope = self.entries.pop_front();
        if envelope.is_some() {
            self.flush();
        }
        envelope
    }

    /// Remove an envelope by id before it is dispatched
    pub fn remove(&mut self, id: Uuid) -> Option<RequestEnvelope> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        let envelope = self.entries.remove(index);
        self.flush();
        envelope
    }

    /// Remove every pending envelope, returning them in queue order
    pub fn drain_all(&mut self) -> Vec<RequestEnvelope> {
        let drained: Vec<_> = self.entries.drain(..).collect();
        self.flush();
        drained
    }

    /// Mutable access to a queued session-init envelope, if any
    pub fn find_session_init_mut(&mut self) -> Option<&mut RequestEnvelope> {
        self.entries.iter_mut().find(|e| e.kind.is_session_init())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flush the current queue image to the durable store.
    ///
    /// Mutations through this type flush themselves; callers that mutate an
    /// envelope in place via [`head_mut`](Self::head_mut) flush explicitly.
    pub fn flush_to_store(&mut self) {
        self.flush();
    }

    /// Write-through flush of the current queue image.
    ///
    /// Store failures are logged and contained here; one bad flush must not
    /// block unrelated envelopes from dispatching.
    fn flush(&mut self) {
        let mut records = Vec::with_capacity(self.entries.len());
        for envelope in &self.entries {
            match serde_json::to_string(envelope) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(kind = %envelope.kind, "skipping unserializable envelope: {e}")
                }
            }
        }
        if let Err(e) = self.store.replace_all(&records) {
            tracing::warn!("queue flush failed: {e}");
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::RequestKind;
    use crate::store::MemoryRecordStore;
    use serde_json::json;

    fn test_queue() -> PendingQueue {
        PendingQueue::new(Box::new(MemoryRecordStore::new()), &QueueConfig::default())
    }

    fn event(name: &str) -> RequestEnvelope {
        RequestEnvelope::new(RequestKind::CompletedAction, json!({ "event": name })).unwrap()
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut queue = test_queue();
        let a = event("a");
        let b = event("b");
        let (a_id, b_id) = (a.id, b.id);

        queue.enqueue(a).unwrap();
        queue.enqueue(b).unwrap();

        assert_eq!(queue.pop_next().unwrap().id, a_id);
        assert_eq!(queue.pop_next().unwrap().id, b_id);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_session_init_promoted_to_head() {
        let mut queue = test_queue();
        queue.enqueue(event("a")).unwrap();
        queue.enqueue(event("b")).unwrap();

        let init = RequestEnvelope::new(RequestKind::RegisterOpen, json!({})).unwrap();
        let init_id = init.id;
        queue.enqueue(init).unwrap();

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.peek_next().unwrap().id, init_id);
    }

    #[test]
    fn test_retrying_head_keeps_its_position() {
        let mut queue = test_queue();
        let old = event("old");
        let old_id = old.id;
        queue.enqueue(old).unwrap();
        queue.enqueue(event("newer")).unwrap();

        // A failed attempt bumps the retry count in place; the envelope
        // never leaves the head.
        if let Some(head) = queue.head_mut() {
            head.retry_count += 1;
        }
        queue.flush_to_store();

        assert_eq!(queue.peek_next().unwrap().id, old_id);
        assert_eq!(queue.peek_next().unwrap().retry_count, 1);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_remove_by_id() {
        let mut queue = test_queue();
        let a = event("a");
        let b = event("b");
        let b_id = b.id;
        queue.enqueue(a).unwrap();
        queue.enqueue(b).unwrap();

        let removed = queue.remove(b_id).unwrap();
        assert_eq!(removed.id, b_id);
        assert_eq!(queue.len(), 1);
        assert!(queue.remove(b_id).is_none());
    }

    #[test]
    fn test_capacity_limit() {
        let config = QueueConfig {
            max_pending: 2,
            ..QueueConfig::default()
        };
        let mut queue = PendingQueue::new(Box::new(MemoryRecordStore::new()), &config);
        queue.enqueue(event("a")).unwrap();
        queue.enqueue(event("b")).unwrap();
        let err = queue.enqueue(event("c")).unwrap_err();
        assert_eq!(err, QueueError::Full { capacity: 2 });

        // Session envelopes are exempt from the limit.
        let init = RequestEnvelope::new(RequestKind::RegisterOpen, json!({})).unwrap();
        queue.enqueue(init).unwrap();
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_find_session_init() {
        let mut queue = test_queue();
        queue.enqueue(event("a")).unwrap();
        assert!(queue.find_session_init_mut().is_none());

        queue
            .enqueue(RequestEnvelope::new(RequestKind::RegisterInstall, json!({})).unwrap())
            .unwrap();
        assert!(queue.find_session_init_mut().is_some());
    }

    #[test]
    fn test_drain_all_in_order() {
        let mut queue = test_queue();
        let a = event("a");
        let b = event("b");
        let ids = [a.id, b.id];
        queue.enqueue(a).unwrap();
        queue.enqueue(b).unwrap();

        let drained = queue.drain_all();
        assert_eq!(drained.len(), 2);
        assert_eq!([drained[0].id, drained[1].id], ids);
        assert!(queue.is_empty());
    }
}
