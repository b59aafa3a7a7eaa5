use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the gql-result-cache binary.
#[derive(Debug, Parser)]
#[command(
    name = "gql-result-cache",
    version,
    about = "GraphQL resolver result cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "GQL_RESULT_CACHE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Load configuration and print the effective settings.
    Check,
    /// Run a synthetic request stampede against an in-memory cache.
    Simulate(SimulateArgs),
}

#[derive(Debug, Args, Clone)]
pub struct SimulateArgs {
    /// Concurrent requests per key in each round.
    #[arg(long, default_value_t = 32, value_parser = clap::value_parser!(usize))]
    pub concurrency: usize,

    /// Distinct argument sets requested.
    #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(usize))]
    pub keys: usize,

    /// Rounds; every round after the first invalidates one entity first.
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(usize))]
    pub rounds: usize,

    /// Simulated resolver latency.
    #[arg(long = "resolve-latency-ms", default_value_t = 20, value_name = "MS")]
    pub resolve_latency_ms: u64,
}

impl Default for SimulateArgs {
    fn default() -> Self {
        Self {
            concurrency: 32,
            keys: 8,
            rounds: 3,
            resolve_latency_ms: 20,
        }
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Enable or disable the resolver result cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub cache_enabled: Option<bool>,

    /// Override the maximum number of cached entries.
    #[arg(long = "cache-max-entries", value_name = "COUNT", global = true)]
    pub cache_max_entries: Option<usize>,

    /// Override the entry lifetime in seconds (0 disables expiry).
    #[arg(long = "cache-default-ttl-secs", value_name = "SECONDS", global = true)]
    pub cache_default_ttl_secs: Option<u64>,

    /// Toggle in-flight de-duplication of concurrent misses.
    #[arg(
        long = "cache-dedupe-in-flight",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub cache_dedupe_in_flight: Option<bool>,

    /// Override the ttl sweep interval in milliseconds.
    #[arg(long = "cache-sweep-interval-ms", value_name = "MS", global = true)]
    pub cache_sweep_interval_ms: Option<u64>,

    /// Override the invalidation auto-consume interval in milliseconds.
    #[arg(long = "cache-auto-consume-interval-ms", value_name = "MS", global = true)]
    pub cache_auto_consume_interval_ms: Option<u64>,

    /// Override the invalidation consume batch limit.
    #[arg(long = "cache-consume-batch-limit", value_name = "COUNT", global = true)]
    pub cache_consume_batch_limit: Option<usize>,

    /// Override the maximum invalidation queue length.
    #[arg(long = "cache-event-queue-limit", value_name = "COUNT", global = true)]
    pub cache_event_queue_limit: Option<usize>,

    /// Override the cache key prefix.
    #[arg(long = "cache-key-prefix", value_name = "PREFIX", global = true)]
    pub cache_key_prefix: Option<String>,
}
