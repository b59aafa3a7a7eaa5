//! Invalidation trigger.
//!
//! Entry point for write paths: publishes an event and optionally applies it
//! before returning.

use std::sync::Arc;

use tracing::debug;

use super::consumer::InvalidationConsumer;
use super::events::{EventKind, EventQueue};
use super::identity::Tag;

/// ```ignore
/// // After a product save commits:
/// trigger.entity_changed("product", product.id).await;
/// ```
pub struct CacheTrigger {
    enabled: bool,
    queue: Arc<EventQueue>,
    consumer: Arc<InvalidationConsumer>,
}

impl CacheTrigger {
    /// Trigger publishing to the consumer's queue. Inert when the cache is disabled.
    pub fn new(consumer: Arc<InvalidationConsumer>) -> Self {
        Self {
            enabled: consumer.cache().config().enabled,
            queue: Arc::clone(consumer.queue()),
            consumer,
        }
    }

    /// Publish an event; with `consume_now`, apply pending events immediately
    /// instead of waiting for the maintenance task.
    pub async fn trigger(&self, kind: EventKind, consume_now: bool) {
        if !self.enabled {
            debug!(event_kind = ?kind, "Cache trigger skipped: cache disabled");
            return;
        }

        self.queue.publish(kind);

        if consume_now {
            self.consumer.consume().await;
        }
    }

    /// Invalidate explicit tags and apply immediately.
    pub async fn tags_invalidated(&self, tags: impl IntoIterator<Item = Tag>) {
        let tags = tags.into_iter().collect();
        self.trigger(EventKind::TagsInvalidated { tags }, true).await;
    }

    /// Invalidate the `{entity_type}_{id}` tag and apply immediately.
    pub async fn entity_changed(&self, entity_type: &str, id: impl ToString) {
        self.trigger(
            EventKind::EntityChanged {
                entity_type: entity_type.to_string(),
                id: id.to_string(),
            },
            true,
        )
        .await;
    }

    /// Drop everything this cache type wrote.
    pub async fn flush_all(&self) {
        self.trigger(EventKind::FlushAll, true).await;
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn consumer(&self) -> &Arc<InvalidationConsumer> {
        &self.consumer
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use bytes::Bytes;

    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::hydrator::HydratorRegistry;
    use crate::cache::keys::{CacheKey, KeyBuilder};
    use crate::cache::orchestrator::ResultCache;

    fn trigger_with(config: CacheConfig) -> CacheTrigger {
        let cache = Arc::new(ResultCache::in_memory(
            config,
            KeyBuilder::default(),
            Arc::new(HydratorRegistry::empty()),
        ));
        let consumer = Arc::new(InvalidationConsumer::new(cache, Arc::new(EventQueue::new())));
        CacheTrigger::new(consumer)
    }

    #[tokio::test]
    async fn trigger_without_consume_leaves_event_queued() {
        let trigger = trigger_with(CacheConfig::default());

        trigger.trigger(EventKind::FlushAll, false).await;

        assert_eq!(trigger.queue().len(), 1);
    }

    #[tokio::test]
    async fn trigger_respects_disabled_config() {
        let trigger = trigger_with(CacheConfig {
            enabled: false,
            ..Default::default()
        });

        trigger.entity_changed("product", 1).await;

        assert!(trigger.queue().is_empty());
    }

    #[tokio::test]
    async fn entity_changed_applies_immediately() {
        let trigger = trigger_with(CacheConfig::default());
        let store = trigger.consumer().cache().store();
        store
            .put(
                CacheKey::from("A"),
                Bytes::from_static(b"[]"),
                HashSet::from([Tag::from("product_7")]),
                None,
            )
            .await
            .expect("memory store put");

        trigger.entity_changed("product", 7).await;

        assert!(trigger.queue().is_empty());
        assert_eq!(store.len().await.expect("memory store len"), 0);
    }

    #[tokio::test]
    async fn convenience_methods_drain_queue() {
        let trigger = trigger_with(CacheConfig::default());

        trigger.tags_invalidated([Tag::from("catalog_price_rule")]).await;
        trigger.entity_changed("category", "3").await;
        trigger.flush_all().await;

        assert!(trigger.queue().is_empty());
    }
}
