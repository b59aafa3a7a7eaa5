//! Invalidation events.
//!
//! The host publishes an event whenever data a cached result may depend on
//! changes. Events queue in memory until the consumer drains them.

use std::collections::VecDeque;
use std::sync::Mutex;

use metrics::{counter, gauge};
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use super::identity::Tag;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::events";

const METRIC_EVENT_QUEUE_LEN: &str = "gql_result_cache_event_queue_len";
const METRIC_EVENT_DROPPED_TOTAL: &str = "gql_result_cache_event_dropped_total";

/// A change notification awaiting consumption.
#[derive(Debug, Clone)]
pub struct InvalidationEvent {
    /// Unique identifier for idempotency (UUIDv4).
    pub id: Uuid,
    pub kind: EventKind,
    /// When the event was published.
    pub timestamp: OffsetDateTime,
}

impl InvalidationEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// What changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Explicit tags, e.g. `catalog_price_rule`.
    TagsInvalidated { tags: Vec<Tag> },
    /// A single entity; invalidates the `{entity_type}_{id}` tag.
    EntityChanged { entity_type: String, id: String },
    /// Everything this cache type wrote.
    FlushAll,
}

/// Bounded in-memory event queue.
///
/// When a publish would exceed the limit, the pending events and the new one
/// are replaced by a single [`EventKind::FlushAll`]. No invalidation is lost,
/// only widened.
pub struct EventQueue {
    queue: Mutex<VecDeque<InvalidationEvent>>,
    limit: usize,
}

impl EventQueue {
    /// Unbounded queue.
    pub fn new() -> Self {
        Self::new_with_limit(usize::MAX)
    }

    /// Queue holding at most `limit` pending events (at least one).
    pub fn new_with_limit(limit: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            limit: limit.max(1),
        }
    }

    /// Enqueue an event, collapsing the queue into a full flush on overflow.
    pub fn publish(&self, kind: EventKind) {
        let event = InvalidationEvent::new(kind);

        info!(
            event_id = %event.id,
            event_kind = ?event.kind,
            "Invalidation event enqueued"
        );

        let mut queue = mutex_lock(&self.queue, SOURCE, "publish");
        if queue.len() >= self.limit {
            let dropped = queue.len() + 1;
            queue.clear();
            queue.push_back(InvalidationEvent::new(EventKind::FlushAll));
            counter!(METRIC_EVENT_DROPPED_TOTAL).increment(dropped as u64);
            warn!(
                dropped,
                limit = self.limit,
                "Invalidation queue full, collapsed into full flush"
            );
        } else {
            queue.push_back(event);
        }
        gauge!(METRIC_EVENT_QUEUE_LEN).set(queue.len() as f64);
    }

    /// Drain up to `limit` events in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<InvalidationEvent> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        let drained: Vec<_> = queue.drain(..count).collect();
        gauge!(METRIC_EVENT_QUEUE_LEN).set(queue.len() as f64);
        drained
    }

    /// Put events back at the head of the queue, preserving their order.
    pub fn requeue(&self, events: Vec<InvalidationEvent>) {
        let mut queue = mutex_lock(&self.queue, SOURCE, "requeue");
        for event in events.into_iter().rev() {
            queue.push_front(event);
        }
        if queue.len() > self.limit {
            let dropped = queue.len();
            queue.clear();
            queue.push_back(InvalidationEvent::new(EventKind::FlushAll));
            counter!(METRIC_EVENT_DROPPED_TOTAL).increment(dropped as u64);
        }
        gauge!(METRIC_EVENT_QUEUE_LEN).set(queue.len() as f64);
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum pending events before the queue collapses.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Discard every pending event.
    pub fn clear(&self) {
        mutex_lock(&self.queue, SOURCE, "clear").clear();
        gauge!(METRIC_EVENT_QUEUE_LEN).set(0.0);
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    fn product_changed(id: u32) -> EventKind {
        EventKind::EntityChanged {
            entity_type: "product".to_string(),
            id: id.to_string(),
        }
    }

    #[test]
    fn publish_and_drain_fifo() {
        let queue = EventQueue::new();

        queue.publish(product_changed(1));
        queue.publish(EventKind::TagsInvalidated {
            tags: vec![Tag::from("catalog_price_rule")],
        });
        queue.publish(product_changed(2));

        let events = queue.drain(2);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, product_changed(1));
        assert_ne!(events[0].id, events[1].id);
        assert!(events[0].timestamp <= events[1].timestamp);
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.drain(100).len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn overflow_collapses_into_flush_all() {
        let queue = EventQueue::new_with_limit(2);

        queue.publish(product_changed(1));
        queue.publish(product_changed(2));
        queue.publish(product_changed(3));

        let events = queue.drain(10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::FlushAll);

        queue.publish(product_changed(4));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn requeue_restores_head_order() {
        let queue = EventQueue::new();
        queue.publish(product_changed(1));
        queue.publish(product_changed(2));
        queue.publish(product_changed(3));

        let head = queue.drain(2);
        queue.requeue(head);

        let events = queue.drain(3);
        let kinds: Vec<_> = events.into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![product_changed(1), product_changed(2), product_changed(3)]);
    }

    #[test]
    fn event_queue_recovers_from_poisoned_lock() {
        let queue = EventQueue::new();

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = queue.queue.lock().expect("queue lock should be acquired");
            panic!("poison queue lock");
        }));

        queue.publish(EventKind::FlushAll);
        assert_eq!(queue.len(), 1);
    }
}
