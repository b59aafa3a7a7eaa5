use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};
use crate::error::AppError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), AppError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| AppError::telemetry(format!("failed to install tracing subscriber: {err}")))
}

/// Register descriptions for every metric the cache emits.
///
/// Descriptions go to whichever recorder is installed; call after installing
/// one. Only the first call has an effect.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "gql_result_cache_hit_total",
            Unit::Count,
            "Resolver results served from cache."
        );
        describe_counter!(
            "gql_result_cache_miss_total",
            Unit::Count,
            "Resolver invocations caused by a cache miss."
        );
        describe_counter!(
            "gql_result_cache_uncached_total",
            Unit::Count,
            "Resolutions that bypassed the cache because no key could be built."
        );
        describe_counter!(
            "gql_result_cache_evict_total",
            Unit::Count,
            "Entries evicted due to capacity."
        );
        describe_counter!(
            "gql_result_cache_expired_total",
            Unit::Count,
            "Entries removed after their ttl elapsed."
        );
        describe_counter!(
            "gql_result_cache_invalidated_total",
            Unit::Count,
            "Entries removed by tag invalidation."
        );
        describe_counter!(
            "gql_result_cache_hydration_error_total",
            Unit::Count,
            "Cached entries discarded because hydration failed."
        );
        describe_counter!(
            "gql_result_cache_store_unavailable_total",
            Unit::Count,
            "Cache backend operations that failed and degraded to uncached behavior."
        );
        describe_counter!(
            "gql_result_cache_inflight_coalesced_total",
            Unit::Count,
            "Requests that waited on an in-flight resolution instead of resolving."
        );
        describe_gauge!(
            "gql_result_cache_event_queue_len",
            Unit::Count,
            "Current number of pending invalidation events."
        );
        describe_counter!(
            "gql_result_cache_event_dropped_total",
            Unit::Count,
            "Invalidation events collapsed into a full flush due to queue overflow."
        );
        describe_histogram!(
            "gql_result_cache_resolve_ms",
            Unit::Milliseconds,
            "Resolver latency on cache misses in milliseconds."
        );
        describe_histogram!(
            "gql_result_cache_consume_ms",
            Unit::Milliseconds,
            "Invalidation consumption latency in milliseconds."
        );
    });
}
