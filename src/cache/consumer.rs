//! Invalidation consumer.
//!
//! Drains events from the queue, merges them into a plan and applies the plan
//! to the result cache.

use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::events::EventQueue;
use super::orchestrator::ResultCache;
use super::planner::InvalidationPlan;

const METRIC_CONSUME_MS: &str = "gql_result_cache_consume_ms";

/// Applies queued invalidation events to a [`ResultCache`].
pub struct InvalidationConsumer {
    cache: Arc<ResultCache>,
    queue: Arc<EventQueue>,
}

impl InvalidationConsumer {
    /// Consumer draining `queue` into `cache`.
    pub fn new(cache: Arc<ResultCache>, queue: Arc<EventQueue>) -> Self {
        Self { cache, queue }
    }

    /// Consume one batch of pending events.
    ///
    /// Returns true if any events were processed. If the store rejects part
    /// of the plan, the whole batch goes back to the head of the queue;
    /// invalidation is idempotent, so re-applying the rest is harmless.
    #[instrument(skip(self))]
    pub async fn consume(&self) -> bool {
        let started_at = Instant::now();
        let events = self.queue.drain(self.cache.config().consume_batch_limit.max(1));
        if events.is_empty() {
            return false;
        }

        let event_count = events.len();
        let event_ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
        let plan = InvalidationPlan::from_events(events.iter().cloned());

        info!(
            event_count,
            event_ids = ?event_ids,
            plan = %plan,
            "Invalidation consumption starting"
        );

        let mut removed = 0;
        let mut failed = false;

        if plan.flush_all {
            match self.cache.flush().await {
                Ok(count) => removed += count,
                Err(_) => failed = true,
            }
        } else {
            for tag in &plan.tags {
                match self.cache.invalidate_by_tag(tag).await {
                    Ok(count) => removed += count,
                    Err(_) => failed = true,
                }
            }
        }

        if failed {
            warn!(event_count, "Invalidation incomplete, events requeued");
            self.queue.requeue(events);
        } else {
            info!(event_count, removed, "Invalidation consumption complete");
        }

        histogram!(METRIC_CONSUME_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        true
    }

    /// Queue this consumer drains.
    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// Cache the drained events are applied to.
    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use bytes::Bytes;

    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::events::EventKind;
    use crate::cache::hydrator::HydratorRegistry;
    use crate::cache::identity::Tag;
    use crate::cache::keys::{CacheKey, KeyBuilder};
    use crate::cache::orchestrator::CACHE_TYPE_TAG;

    fn consumer_with(config: CacheConfig) -> InvalidationConsumer {
        let cache = Arc::new(ResultCache::in_memory(
            config,
            KeyBuilder::default(),
            Arc::new(HydratorRegistry::empty()),
        ));
        InvalidationConsumer::new(cache, Arc::new(EventQueue::new()))
    }

    async fn seed(consumer: &InvalidationConsumer, key: &str, tags: &[&str]) {
        let mut tags: HashSet<Tag> = tags.iter().map(|t| Tag::from(*t)).collect();
        tags.insert(Tag::from(CACHE_TYPE_TAG));
        consumer
            .cache
            .store()
            .put(CacheKey::from(key), Bytes::from_static(b"{}"), tags, None)
            .await
            .expect("memory store put");
    }

    async fn stored(consumer: &InvalidationConsumer) -> usize {
        consumer.cache.store().len().await.expect("memory store len")
    }

    #[tokio::test]
    async fn consume_empty_queue_returns_false() {
        let consumer = consumer_with(CacheConfig::default());
        assert!(!consumer.consume().await);
    }

    #[tokio::test]
    async fn entity_change_removes_tagged_entries_only() {
        let consumer = consumer_with(CacheConfig::default());
        seed(&consumer, "A", &["product_123"]).await;
        seed(&consumer, "B", &["product_456"]).await;

        consumer.queue.publish(EventKind::EntityChanged {
            entity_type: "product".to_string(),
            id: "123".to_string(),
        });

        assert!(consumer.consume().await);
        assert!(consumer.queue.is_empty());
        assert_eq!(stored(&consumer).await, 1);
        let remaining = consumer
            .cache
            .store()
            .get(&CacheKey::from("B"))
            .await
            .expect("memory store get");
        assert!(remaining.is_some());
    }

    #[tokio::test]
    async fn flush_all_removes_everything() {
        let consumer = consumer_with(CacheConfig::default());
        seed(&consumer, "A", &["product_1"]).await;
        seed(&consumer, "B", &["category_3"]).await;

        consumer.queue.publish(EventKind::FlushAll);
        consumer.consume().await;

        assert_eq!(stored(&consumer).await, 0);
    }

    #[tokio::test]
    async fn consume_respects_batch_limit() {
        let consumer = consumer_with(CacheConfig {
            consume_batch_limit: 2,
            ..Default::default()
        });

        for id in 0..5 {
            consumer.queue.publish(EventKind::EntityChanged {
                entity_type: "product".to_string(),
                id: id.to_string(),
            });
        }

        consumer.consume().await;
        assert_eq!(consumer.queue.len(), 3);
    }
}
