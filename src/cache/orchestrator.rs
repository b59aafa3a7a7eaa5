//! Result cache orchestrator.
//!
//! Each resolver invocation runs through
//! `START → KEY_BUILT → {HIT, MISS} → (MISS: RESOLVE → STORE) → HYDRATE → DONE`:
//!
//! - a key that cannot be built forces an uncached resolution;
//! - a hit is hydrated by the resolver's hydrator, if one is registered;
//! - a miss invokes the resolver once per key (concurrent callers wait for
//!   the in-flight resolution) and stores the dehydrated result with the tags
//!   the resolution reported or recorded.
//!
//! Store outages and hydration failures degrade to misses. Resolver errors
//! propagate unchanged and leave the cache untouched. A result whose tags were
//! invalidated while it was being resolved is returned to its callers but not
//! stored.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::config::CacheConfig;
use super::deps;
use super::flight::{self, Flight, FlightResult, InFlight};
use super::hydrator::{HydrationError, HydratorRegistry};
use super::identity::{ResolverIdentity, Tag};
use super::keys::{CacheKey, ContextDiscriminators, KeyBuilder};
use super::registry::Epoch;
use super::store::{CacheBackend, MemoryStore, StoreUnavailableError};

/// Tag attached to every entry; invalidating it flushes the whole cache type.
pub const CACHE_TYPE_TAG: &str = "gql_resolver_result";

const METRIC_HIT_TOTAL: &str = "gql_result_cache_hit_total";
const METRIC_MISS_TOTAL: &str = "gql_result_cache_miss_total";
const METRIC_UNCACHED_TOTAL: &str = "gql_result_cache_uncached_total";
const METRIC_HYDRATION_ERROR_TOTAL: &str = "gql_result_cache_hydration_error_total";
const METRIC_STORE_UNAVAILABLE_TOTAL: &str = "gql_result_cache_store_unavailable_total";
const METRIC_COALESCED_TOTAL: &str = "gql_result_cache_inflight_coalesced_total";
const METRIC_RESOLVE_MS: &str = "gql_result_cache_resolve_ms";

/// A resolver's result together with the tags its computation depends on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolved {
    pub value: Value,
    pub tags: HashSet<Tag>,
}

impl Resolved {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            tags: HashSet::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<Tag>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.tags.extend(tags);
        self
    }
}

/// A cacheable query resolver supplied by the host.
#[async_trait]
pub trait Resolver: Send + Sync {
    type Error: Send;

    fn identity(&self) -> ResolverIdentity;

    async fn resolve(
        &self,
        arguments: &Value,
        context: &ContextDiscriminators,
    ) -> Result<Resolved, Self::Error>;
}

/// Serves resolver results from cache, resolving and populating on misses.
pub struct ResultCache {
    config: CacheConfig,
    keys: KeyBuilder,
    hydrators: Arc<HydratorRegistry>,
    store: Arc<dyn CacheBackend>,
    in_flight: InFlight,
    cache_type_tag: Tag,
}

impl ResultCache {
    /// Keys are prefixed with `config.key_prefix`, overriding the builder's own.
    pub fn new(
        config: CacheConfig,
        keys: KeyBuilder,
        hydrators: Arc<HydratorRegistry>,
        store: Arc<dyn CacheBackend>,
    ) -> Self {
        let keys = keys.with_prefix(config.key_prefix.clone());
        Self {
            config,
            keys,
            hydrators,
            store,
            in_flight: InFlight::new(),
            cache_type_tag: Tag::new(CACHE_TYPE_TAG),
        }
    }

    /// A cache backed by a [`MemoryStore`] sized from `config`.
    pub fn in_memory(
        config: CacheConfig,
        keys: KeyBuilder,
        hydrators: Arc<HydratorRegistry>,
    ) -> Self {
        let store = Arc::new(MemoryStore::new(&config));
        Self::new(config, keys, hydrators, store)
    }

    /// Resolve through the cache.
    #[instrument(skip_all, fields(resolver = %resolver.identity()))]
    pub async fn resolve<R>(
        &self,
        resolver: &R,
        arguments: &Value,
        context: &ContextDiscriminators,
    ) -> Result<Value, R::Error>
    where
        R: Resolver + ?Sized,
    {
        if !self.config.enabled {
            return self.resolve_uncached(resolver, arguments, context).await;
        }

        let identity = resolver.identity();
        let key = match self.keys.build(&identity, arguments, context) {
            Ok(key) => key,
            Err(error) => {
                warn!(
                    cache = "resolver",
                    outcome = "uncached",
                    error = %error,
                    "cache key build failed, resolving without cache"
                );
                counter!(METRIC_UNCACHED_TOTAL).increment(1);
                return self.resolve_uncached(resolver, arguments, context).await;
            }
        };

        loop {
            if let Some(value) = self.lookup(&identity, &key).await {
                return Ok(value);
            }

            if !self.config.dedupe_in_flight {
                let result = self
                    .resolve_and_store(resolver, &identity, &key, arguments, context)
                    .await?;
                return Ok(into_value(result));
            }

            match self.in_flight.join(&key) {
                Flight::Leader(guard) => {
                    // The previous leader may have stored the entry between
                    // our lookup and join.
                    if let Some(value) = self.lookup(&identity, &key).await {
                        return Ok(value);
                    }
                    let result = self
                        .resolve_and_store(resolver, &identity, &key, arguments, context)
                        .await?;
                    guard.complete(Arc::clone(&result));
                    return Ok(into_value(result));
                }
                Flight::Follower(receiver) => {
                    counter!(METRIC_COALESCED_TOTAL).increment(1);
                    debug!(
                        cache = "resolver",
                        outcome = "coalesced",
                        key = %key,
                        "waiting for in-flight resolution"
                    );
                    if let Some(result) = flight::wait_for_leader(receiver).await {
                        deps::record_all(result.tags.iter().cloned());
                        return Ok(result.value.clone());
                    }
                    debug!(key = %key, "in-flight resolution abandoned, retrying");
                }
            }
        }
    }

    /// Remove every entry tagged with `tag`.
    #[instrument(skip(self), fields(tag = %tag))]
    pub async fn invalidate_by_tag(&self, tag: &Tag) -> Result<usize, StoreUnavailableError> {
        match self.store.invalidate_by_tag(tag).await {
            Ok(removed) => {
                info!(removed, "cache entries invalidated");
                Ok(removed)
            }
            Err(error) => {
                warn!(
                    op = "invalidate_by_tag",
                    error = %error,
                    "cache backend unavailable, invalidation not applied"
                );
                counter!(METRIC_STORE_UNAVAILABLE_TOTAL, "op" => "invalidate").increment(1);
                Err(error)
            }
        }
    }

    /// Remove every entry written by this cache type.
    pub async fn flush(&self) -> Result<usize, StoreUnavailableError> {
        let tag = self.cache_type_tag.clone();
        self.invalidate_by_tag(&tag).await
    }

    /// Eagerly drop expired entries.
    pub async fn sweep_expired(&self) -> Result<usize, StoreUnavailableError> {
        let removed = self.store.sweep_expired().await?;
        if removed > 0 {
            debug!(removed, "expired cache entries swept");
        }
        Ok(removed)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn key_builder(&self) -> &KeyBuilder {
        &self.keys
    }

    pub fn hydrators(&self) -> &Arc<HydratorRegistry> {
        &self.hydrators
    }

    pub fn store(&self) -> &Arc<dyn CacheBackend> {
        &self.store
    }

    pub fn cache_type_tag(&self) -> &Tag {
        &self.cache_type_tag
    }

    /// Number of keys with a resolution currently in progress.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    async fn lookup(&self, identity: &ResolverIdentity, key: &CacheKey) -> Option<Value> {
        let entry = match self.store.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(error) => {
                warn!(
                    cache = "resolver",
                    outcome = "store_unavailable",
                    op = "get",
                    error = %error,
                    "cache backend unavailable, treating as miss"
                );
                counter!(METRIC_STORE_UNAVAILABLE_TOTAL, "op" => "get").increment(1);
                return None;
            }
        };

        match self.hydrate(identity, &entry.payload) {
            Ok(value) => {
                counter!(METRIC_HIT_TOTAL).increment(1);
                debug!(cache = "resolver", outcome = "hit", key = %key, "serving cached result");
                deps::record_all(entry.tags);
                Some(value)
            }
            Err(error) => {
                warn!(
                    cache = "resolver",
                    outcome = "hydration_failed",
                    key = %key,
                    error = %error,
                    "discarding cached entry that failed to hydrate"
                );
                counter!(METRIC_HYDRATION_ERROR_TOTAL).increment(1);
                if let Err(error) = self.store.remove(key).await {
                    warn!(op = "remove", key = %key, error = %error, "failed to discard entry");
                }
                None
            }
        }
    }

    fn hydrate(&self, identity: &ResolverIdentity, payload: &[u8]) -> Result<Value, HydrationError> {
        let decoded: Value = serde_json::from_slice(payload)?;
        match self.hydrators.get_for_resolver(identity) {
            Some(hydrator) => hydrator.hydrate(decoded),
            None => Ok(decoded),
        }
    }

    async fn resolve_and_store<R>(
        &self,
        resolver: &R,
        identity: &ResolverIdentity,
        key: &CacheKey,
        arguments: &Value,
        context: &ContextDiscriminators,
    ) -> Result<Arc<FlightResult>, R::Error>
    where
        R: Resolver + ?Sized,
    {
        counter!(METRIC_MISS_TOTAL).increment(1);
        debug!(cache = "resolver", outcome = "miss", key = %key, "cache miss, invoking resolver");

        let since = self.invalidation_epoch(key).await;
        let started_at = Instant::now();
        let (outcome, recorded) = deps::with_collector(resolver.resolve(arguments, context)).await;
        histogram!(METRIC_RESOLVE_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        let Resolved { value, mut tags } = outcome?;
        tags.extend(recorded);
        // Outer resolutions depend on everything this one touched.
        deps::record_all(tags.iter().cloned());
        tags.insert(self.cache_type_tag.clone());

        if let Some(since) = since {
            self.store_result(identity, key, &value, &tags, since).await;
        }

        Ok(Arc::new(FlightResult { value, tags }))
    }

    async fn store_result(
        &self,
        identity: &ResolverIdentity,
        key: &CacheKey,
        value: &Value,
        tags: &HashSet<Tag>,
        since: Epoch,
    ) {
        let encoded = match self.hydrators.get_dehydrator_for_resolver(identity) {
            Some(dehydrator) => serde_json::to_vec(&dehydrator.dehydrate(value)),
            None => serde_json::to_vec(value),
        };
        let payload = match encoded {
            Ok(bytes) => Bytes::from(bytes),
            Err(error) => {
                warn!(key = %key, error = %error, "result could not be serialized, not caching");
                return;
            }
        };

        let stored = self
            .store
            .put_if_fresh(
                key.clone(),
                payload,
                tags.clone(),
                self.config.default_ttl(),
                since,
            )
            .await;
        match stored {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    cache = "resolver",
                    outcome = "invalidated_in_flight",
                    key = %key,
                    "tags invalidated during resolution, result not cached"
                );
            }
            Err(error) => {
                warn!(
                    cache = "resolver",
                    outcome = "store_unavailable",
                    op = "put",
                    key = %key,
                    error = %error,
                    "cache backend unavailable, result not cached"
                );
                counter!(METRIC_STORE_UNAVAILABLE_TOTAL, "op" => "put").increment(1);
            }
        }
    }

    // `None` when the backend is unreachable; the result is then not stored.
    async fn invalidation_epoch(&self, key: &CacheKey) -> Option<Epoch> {
        match self.store.invalidation_epoch().await {
            Ok(epoch) => Some(epoch),
            Err(error) => {
                warn!(
                    cache = "resolver",
                    outcome = "store_unavailable",
                    op = "epoch",
                    key = %key,
                    error = %error,
                    "cache backend unavailable, result will not be cached"
                );
                counter!(METRIC_STORE_UNAVAILABLE_TOTAL, "op" => "epoch").increment(1);
                None
            }
        }
    }

    async fn resolve_uncached<R>(
        &self,
        resolver: &R,
        arguments: &Value,
        context: &ContextDiscriminators,
    ) -> Result<Value, R::Error>
    where
        R: Resolver + ?Sized,
    {
        let Resolved { value, tags } = resolver.resolve(arguments, context).await?;
        deps::record_all(tags);
        Ok(value)
    }
}

fn into_value(result: Arc<FlightResult>) -> Value {
    match Arc::try_unwrap(result) {
        Ok(result) => result.value,
        Err(shared) => shared.value.clone(),
    }
}
