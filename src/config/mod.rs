//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::str::FromStr;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::CacheConfig;

mod cli;

pub use cli::{CliArgs, Command, Overrides, SimulateArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "gql-result-cache";
const ENV_PREFIX: &str = "GQL_RESULT_CACHE";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    max_entries: Option<usize>,
    default_ttl_secs: Option<u64>,
    dedupe_in_flight: Option<bool>,
    sweep_interval_ms: Option<u64>,
    auto_consume_interval_ms: Option<u64>,
    consume_batch_limit: Option<usize>,
    event_queue_limit: Option<usize>,
    key_prefix: Option<String>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }

        let cache = &mut self.cache;
        if let Some(enabled) = overrides.cache_enabled {
            cache.enabled = Some(enabled);
        }
        if let Some(limit) = overrides.cache_max_entries {
            cache.max_entries = Some(limit);
        }
        if let Some(secs) = overrides.cache_default_ttl_secs {
            cache.default_ttl_secs = Some(secs);
        }
        if let Some(dedupe) = overrides.cache_dedupe_in_flight {
            cache.dedupe_in_flight = Some(dedupe);
        }
        if let Some(ms) = overrides.cache_sweep_interval_ms {
            cache.sweep_interval_ms = Some(ms);
        }
        if let Some(ms) = overrides.cache_auto_consume_interval_ms {
            cache.auto_consume_interval_ms = Some(ms);
        }
        if let Some(limit) = overrides.cache_consume_batch_limit {
            cache.consume_batch_limit = Some(limit);
        }
        if let Some(limit) = overrides.cache_event_queue_limit {
            cache.event_queue_limit = Some(limit);
        }
        if let Some(prefix) = overrides.cache_key_prefix.as_ref() {
            cache.key_prefix = Some(prefix.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { logging, cache } = raw;

        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;

        Ok(Self { logging, cache })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();

    let max_entries = non_zero(
        cache.max_entries.unwrap_or(defaults.max_entries),
        "cache.max_entries",
    )?;
    let consume_batch_limit = non_zero(
        cache
            .consume_batch_limit
            .unwrap_or(defaults.consume_batch_limit),
        "cache.consume_batch_limit",
    )?;
    let event_queue_limit = non_zero(
        cache.event_queue_limit.unwrap_or(defaults.event_queue_limit),
        "cache.event_queue_limit",
    )?;
    let sweep_interval_ms = non_zero_ms(
        cache.sweep_interval_ms.unwrap_or(defaults.sweep_interval_ms),
        "cache.sweep_interval_ms",
    )?;
    let auto_consume_interval_ms = non_zero_ms(
        cache
            .auto_consume_interval_ms
            .unwrap_or(defaults.auto_consume_interval_ms),
        "cache.auto_consume_interval_ms",
    )?;

    let key_prefix = cache
        .key_prefix
        .map(|prefix| prefix.trim().to_string())
        .unwrap_or(defaults.key_prefix);
    if key_prefix.is_empty() {
        return Err(LoadError::invalid("cache.key_prefix", "must not be empty"));
    }

    Ok(CacheConfig {
        enabled: cache.enabled.unwrap_or(defaults.enabled),
        max_entries,
        default_ttl_secs: cache.default_ttl_secs.unwrap_or(defaults.default_ttl_secs),
        dedupe_in_flight: cache.dedupe_in_flight.unwrap_or(defaults.dedupe_in_flight),
        sweep_interval_ms,
        auto_consume_interval_ms,
        consume_batch_limit,
        event_queue_limit,
        key_prefix,
    })
}

fn non_zero(value: usize, key: &'static str) -> Result<usize, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(value)
}

fn non_zero_ms(value: u64, key: &'static str) -> Result<u64, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests;
