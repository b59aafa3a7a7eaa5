//! GraphQL resolver result cache.
//!
//! Caches the output of query resolvers keyed by resolver identity, normalized
//! arguments and request context, and invalidates entries by tag when the
//! entities they were derived from change.
//!
//! ## Configuration
//!
//! Cache behavior is controlled via the `[cache]` table of
//! `gql-result-cache.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! max_entries = 10000
//! default_ttl_secs = 3600
//! dedupe_in_flight = true
//! # ... see config.rs for all options
//! ```

mod config;
mod consumer;
pub mod deps;
mod events;
mod flight;
mod hydrator;
mod identity;
mod keys;
mod lock;
pub mod maintenance;
mod orchestrator;
mod planner;
mod registry;
mod store;
mod trigger;

pub use config::CacheConfig;
pub use consumer::InvalidationConsumer;
pub use events::{EventKind, EventQueue, InvalidationEvent};
pub use hydrator::{
    CompositeHydrator, Dehydrator, HydrationError, Hydrator, HydratorRegistry,
    HydratorRegistryBuilder, RegistryError,
};
pub use identity::{ResolverIdentity, Tag};
pub use keys::{
    CacheKey, ContextDiscriminators, DEFAULT_KEY_PREFIX, Discriminator, KeyBuildError, KeyBuilder,
    normalize,
};
pub use maintenance::MaintenanceHandle;
pub use orchestrator::{CACHE_TYPE_TAG, Resolved, Resolver, ResultCache};
pub use planner::InvalidationPlan;
pub use registry::{Epoch, TagRegistry};
pub use store::{CacheBackend, CacheEntry, MemoryStore, StoreUnavailableError};
pub use trigger::CacheTrigger;
