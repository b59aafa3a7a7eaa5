//! Cache configuration.
//!
//! Controls the resolver result cache via the `[cache]` table of
//! `gql-result-cache.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

use super::keys::DEFAULT_KEY_PREFIX;

// Default values for cache configuration
const DEFAULT_MAX_ENTRIES: usize = 10_000;
const DEFAULT_TTL_SECS: u64 = 3600;
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 30_000;
const DEFAULT_AUTO_CONSUME_INTERVAL_MS: u64 = 5000;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;
const DEFAULT_EVENT_QUEUE_LIMIT: usize = 10_000;

/// Resolver result cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache type switch; when off every resolver runs uncached.
    pub enabled: bool,
    /// Maximum entries held before least-recently-used eviction.
    pub max_entries: usize,
    /// Entry lifetime in seconds; 0 keeps entries until invalidated or evicted.
    pub default_ttl_secs: u64,
    /// Collapse concurrent misses on one key into a single resolution.
    pub dedupe_in_flight: bool,
    /// Interval (ms) between eager sweeps of expired entries.
    pub sweep_interval_ms: u64,
    /// Auto-consume interval (ms) for queued invalidation events.
    pub auto_consume_interval_ms: u64,
    /// Maximum events per consumption batch.
    pub consume_batch_limit: usize,
    /// Pending events kept before the queue collapses into a full flush.
    pub event_queue_limit: usize,
    /// Prefix of every generated cache key.
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: DEFAULT_MAX_ENTRIES,
            default_ttl_secs: DEFAULT_TTL_SECS,
            dedupe_in_flight: true,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            auto_consume_interval_ms: DEFAULT_AUTO_CONSUME_INTERVAL_MS,
            consume_batch_limit: DEFAULT_CONSUME_BATCH_LIMIT,
            event_queue_limit: DEFAULT_EVENT_QUEUE_LIMIT,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl CacheConfig {
    /// Returns the entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }

    /// Lifetime applied to new entries, `None` when entries never expire.
    pub fn default_ttl(&self) -> Option<Duration> {
        (self.default_ttl_secs > 0).then(|| Duration::from_secs(self.default_ttl_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn auto_consume_interval(&self) -> Duration {
        Duration::from_millis(self.auto_consume_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert!(config.dedupe_in_flight);
        assert_eq!(config.max_entries, 10_000);
        assert_eq!(config.default_ttl(), Some(Duration::from_secs(3600)));
        assert_eq!(config.consume_batch_limit, 100);
        assert_eq!(config.event_queue_limit, 10_000);
        assert_eq!(config.key_prefix, "gql_resolver");
    }

    #[test]
    fn zero_ttl_disables_expiry() {
        let config = CacheConfig {
            default_ttl_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.default_ttl(), None);
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            max_entries: 0,
            ..Default::default()
        };
        assert_eq!(config.max_entries_non_zero().get(), 1);
    }

    #[test]
    fn deserializes_partial_table() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"max_entries": 5, "dedupe_in_flight": false}"#)
                .expect("partial config deserializes");
        assert_eq!(config.max_entries, 5);
        assert!(!config.dedupe_in_flight);
        assert!(config.enabled);
    }
}
