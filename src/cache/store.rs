//! Cache storage.
//!
//! [`CacheBackend`] is the contract the orchestrator depends on; it can be
//! satisfied by an in-memory map, a distributed cache or a persistent store.
//! [`MemoryStore`] is the in-process implementation: an LRU map plus a
//! [`TagRegistry`], committed together under one store lock.
//!
//! Expiry is enforced lazily on `get` (an expired entry is removed and
//! reported as absent) and eagerly by `sweep_expired`.
//!
//! Results computed concurrently with an invalidation are written through
//! `put_if_fresh`, which refuses the write when one of the entry's tags was
//! invalidated after the writer's [`Epoch`] snapshot.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use thiserror::Error;
use tracing::debug;

use super::config::CacheConfig;
use super::identity::Tag;
use super::keys::CacheKey;
use super::lock::mutex_lock;
use super::registry::{Epoch, TagRegistry};

const COMPONENT: &str = "cache::store";

const METRIC_EVICT_TOTAL: &str = "gql_result_cache_evict_total";
const METRIC_EXPIRED_TOTAL: &str = "gql_result_cache_expired_total";
const METRIC_INVALIDATED_TOTAL: &str = "gql_result_cache_invalidated_total";

/// A stored resolver result. Never mutated in place.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    /// Serialized (dehydrated) resolver result.
    pub payload: Bytes,
    pub tags: HashSet<Tag>,
    pub created_at: Instant,
    /// Lifetime from `created_at`; `None` never expires.
    pub ttl: Option<Duration>,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(self.created_at) >= ttl)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }
}

#[derive(Debug, Clone, Error)]
#[error("cache backend unavailable: {reason}")]
pub struct StoreUnavailableError {
    reason: String,
}

impl StoreUnavailableError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Key-value store with tag indexing.
///
/// `invalidate_by_tag` is all-or-nothing for concurrent readers: once an
/// entry's tag edges are gone, `get` no longer returns it.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreUnavailableError>;

    /// Store `payload`, replacing any previous entry and its tag edges.
    async fn put(
        &self,
        key: CacheKey,
        payload: Bytes,
        tags: HashSet<Tag>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreUnavailableError>;

    /// Current invalidation epoch. Snapshot it before computing a result
    /// that will be written with [`put_if_fresh`](Self::put_if_fresh).
    async fn invalidation_epoch(&self) -> Result<Epoch, StoreUnavailableError>;

    /// Like [`put`](Self::put), but refuses the write when any of `tags` was
    /// invalidated after `since`. Returns whether the entry was stored.
    async fn put_if_fresh(
        &self,
        key: CacheKey,
        payload: Bytes,
        tags: HashSet<Tag>,
        ttl: Option<Duration>,
        since: Epoch,
    ) -> Result<bool, StoreUnavailableError>;

    /// Remove one entry. Returns whether it was present.
    async fn remove(&self, key: &CacheKey) -> Result<bool, StoreUnavailableError>;

    /// Remove every entry associated with `tag`. Returns the number removed.
    async fn invalidate_by_tag(&self, tag: &Tag) -> Result<usize, StoreUnavailableError>;

    async fn entries_for_tag(&self, tag: &Tag) -> Result<HashSet<CacheKey>, StoreUnavailableError>;

    /// Remove every expired entry. Returns the number removed.
    async fn sweep_expired(&self) -> Result<usize, StoreUnavailableError>;

    async fn clear(&self) -> Result<(), StoreUnavailableError>;

    async fn len(&self) -> Result<usize, StoreUnavailableError>;
}

/// In-process LRU store.
///
/// Recency is a strict order, so eviction always has a single
/// least-recently-used candidate. Evicted entries lose their tag edges in the
/// same critical section.
pub struct MemoryStore {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    tags: TagRegistry,
}

impl MemoryStore {
    /// Empty store bounded by `config.max_entries`.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(config.max_entries_non_zero())),
            tags: TagRegistry::new(),
        }
    }

    /// Fetch an entry and mark it most recently used.
    ///
    /// An expired entry is removed and reported as absent.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut entries = mutex_lock(&self.entries, COMPONENT, "get");
        let expired = entries.get(key)?.is_expired();
        if expired {
            entries.pop(key);
            self.tags.remove(key);
            counter!(METRIC_EXPIRED_TOTAL).increment(1);
            debug!(key = %key, "expired entry removed on read");
            return None;
        }
        entries.get(key).cloned()
    }

    /// Store `payload` under `key`, replacing any previous entry and its tags.
    ///
    /// May evict the least recently used entry.
    pub fn put(&self, key: CacheKey, payload: Bytes, tags: HashSet<Tag>, ttl: Option<Duration>) {
        let mut entries = mutex_lock(&self.entries, COMPONENT, "put");
        self.insert(&mut entries, key, payload, tags, ttl);
    }

    /// Store `payload` unless one of `tags` was invalidated after `since`.
    ///
    /// The check and the write share the store lock with
    /// [`invalidate_by_tag`](Self::invalidate_by_tag), so an invalidation
    /// either happens first and refuses the write, or happens after and
    /// removes the entry.
    pub fn put_if_fresh(
        &self,
        key: CacheKey,
        payload: Bytes,
        tags: HashSet<Tag>,
        ttl: Option<Duration>,
        since: Epoch,
    ) -> bool {
        let mut entries = mutex_lock(&self.entries, COMPONENT, "put_if_fresh");
        if self.tags.invalidated_since(&tags, since) {
            debug!(key = %key, since, "tags invalidated after snapshot, write refused");
            return false;
        }
        self.insert(&mut entries, key, payload, tags, ttl);
        true
    }

    /// Current invalidation epoch of the tag index.
    pub fn invalidation_epoch(&self) -> Epoch {
        self.tags.epoch()
    }

    fn insert(
        &self,
        entries: &mut LruCache<CacheKey, CacheEntry>,
        key: CacheKey,
        payload: Bytes,
        tags: HashSet<Tag>,
        ttl: Option<Duration>,
    ) {
        if entries.pop(&key).is_some() {
            self.tags.remove(&key);
        }

        let entry = CacheEntry {
            key: key.clone(),
            payload,
            tags: tags.clone(),
            created_at: Instant::now(),
            ttl,
        };

        if let Some((evicted, _)) = entries.push(key.clone(), entry) {
            self.tags.remove(&evicted);
            counter!(METRIC_EVICT_TOTAL).increment(1);
            debug!(key = %evicted, "least recently used entry evicted");
        }
        self.tags.associate(&key, tags);
    }

    /// Remove one entry and its tag edges. Returns whether it was present.
    pub fn remove(&self, key: &CacheKey) -> bool {
        let mut entries = mutex_lock(&self.entries, COMPONENT, "remove");
        let removed = entries.pop(key).is_some();
        self.tags.remove(key);
        removed
    }

    /// Remove every entry tagged with `tag`. Returns the number removed.
    pub fn invalidate_by_tag(&self, tag: &Tag) -> usize {
        let mut entries = mutex_lock(&self.entries, COMPONENT, "invalidate_by_tag");
        let removed = self
            .tags
            .invalidate(tag)
            .iter()
            .filter(|key| entries.pop(*key).is_some())
            .count();

        counter!(METRIC_INVALIDATED_TOTAL).increment(removed as u64);
        removed
    }

    pub fn entries_for_tag(&self, tag: &Tag) -> HashSet<CacheKey> {
        self.tags.entries_for_tag(tag)
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let mut entries = mutex_lock(&self.entries, COMPONENT, "sweep_expired");
        let now = Instant::now();
        let expired: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            entries.pop(key);
        }
        self.tags.remove_many(&expired);

        counter!(METRIC_EXPIRED_TOTAL).increment(expired.len() as u64);
        expired.len()
    }

    /// Remove every entry. Outstanding epoch snapshots become stale.
    pub fn clear(&self) {
        let mut entries = mutex_lock(&self.entries, COMPONENT, "clear");
        entries.clear();
        self.tags.clear();
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, COMPONENT, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The tag index backing this store.
    pub fn tags(&self) -> &TagRegistry {
        &self.tags
    }
}

#[async_trait]
impl CacheBackend for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreUnavailableError> {
        Ok(MemoryStore::get(self, key))
    }

    async fn put(
        &self,
        key: CacheKey,
        payload: Bytes,
        tags: HashSet<Tag>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreUnavailableError> {
        MemoryStore::put(self, key, payload, tags, ttl);
        Ok(())
    }

    async fn invalidation_epoch(&self) -> Result<Epoch, StoreUnavailableError> {
        Ok(MemoryStore::invalidation_epoch(self))
    }

    async fn put_if_fresh(
        &self,
        key: CacheKey,
        payload: Bytes,
        tags: HashSet<Tag>,
        ttl: Option<Duration>,
        since: Epoch,
    ) -> Result<bool, StoreUnavailableError> {
        Ok(MemoryStore::put_if_fresh(self, key, payload, tags, ttl, since))
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool, StoreUnavailableError> {
        Ok(MemoryStore::remove(self, key))
    }

    async fn invalidate_by_tag(&self, tag: &Tag) -> Result<usize, StoreUnavailableError> {
        Ok(MemoryStore::invalidate_by_tag(self, tag))
    }

    async fn entries_for_tag(&self, tag: &Tag) -> Result<HashSet<CacheKey>, StoreUnavailableError> {
        Ok(MemoryStore::entries_for_tag(self, tag))
    }

    async fn sweep_expired(&self) -> Result<usize, StoreUnavailableError> {
        Ok(MemoryStore::sweep_expired(self))
    }

    async fn clear(&self) -> Result<(), StoreUnavailableError> {
        MemoryStore::clear(self);
        Ok(())
    }

    async fn len(&self) -> Result<usize, StoreUnavailableError> {
        Ok(MemoryStore::len(self))
    }
}
