use std::{
    convert::Infallible,
    process,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use futures::future::join_all;
use gql_result_cache::{
    cache::{
        self, CacheTrigger, ContextDiscriminators, Discriminator, EventQueue, HydrationError,
        HydratorRegistry, InvalidationConsumer, KeyBuilder, Resolved, Resolver, ResolverIdentity,
        ResultCache, Tag,
    },
    config,
    error::AppError,
    telemetry,
};
use serde_json::{Value, json};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

const SYNTHETIC_RESOLVER: &str = "Synthetic\\Resolver\\Product";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    match cli_args.command.unwrap_or(config::Command::Check) {
        config::Command::Check => run_check(&settings),
        config::Command::Simulate(args) => run_simulate(settings, args).await,
    }
}

fn run_check(settings: &config::Settings) -> Result<(), AppError> {
    let cache = &settings.cache;
    info!(
        enabled = cache.enabled,
        max_entries = cache.max_entries,
        default_ttl_secs = cache.default_ttl_secs,
        dedupe_in_flight = cache.dedupe_in_flight,
        key_prefix = %cache.key_prefix,
        "Configuration loaded"
    );
    println!("{settings:#?}");
    Ok(())
}

/// Resolver with a fixed latency that counts its invocations.
struct SyntheticProductResolver {
    calls: AtomicUsize,
    latency: Duration,
}

#[async_trait]
impl Resolver for SyntheticProductResolver {
    type Error = Infallible;

    fn identity(&self) -> ResolverIdentity {
        ResolverIdentity::new(SYNTHETIC_RESOLVER)
    }

    async fn resolve(
        &self,
        arguments: &Value,
        context: &ContextDiscriminators,
    ) -> Result<Resolved, Self::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;

        let index = arguments["index"].as_u64().unwrap_or_default();
        cache::deps::record("catalog_product_list");
        Ok(Resolved::new(json!({
            "sku": format!("SKU-{index:04}"),
            "price": 19.99 + index as f64,
            "currency": context.get(&Discriminator::Currency),
        }))
        .with_tag(Tag::entity("product", index)))
    }
}

fn synthetic_hydrators() -> Result<HydratorRegistry, AppError> {
    let registry = HydratorRegistry::builder()
        .dehydrator(SYNTHETIC_RESOLVER, |value: &Value| {
            let mut stored = value.clone();
            if let Some(price) = value["price"].as_f64() {
                stored["price"] = json!((price * 100.0).round() as i64);
            }
            stored
        })
        .hydrator(
            SYNTHETIC_RESOLVER,
            |mut value: Value| -> Result<Value, HydrationError> {
                let cents = value["price"]
                    .as_i64()
                    .ok_or_else(|| HydrationError::rejected("price is not stored in cents"))?;
                value["price"] = json!(cents as f64 / 100.0);
                Ok(value)
            },
        )
        .build()?;
    Ok(registry)
}

async fn run_simulate(
    settings: config::Settings,
    args: config::SimulateArgs,
) -> Result<(), AppError> {
    if args.concurrency == 0 || args.keys == 0 || args.rounds == 0 {
        return Err(AppError::validation(
            "simulate requires --concurrency, --keys and --rounds to be at least 1",
        ));
    }

    let config = settings.cache;
    let keys = KeyBuilder::default()
        .require(SYNTHETIC_RESOLVER, [Discriminator::Store, Discriminator::Currency]);
    let queue = Arc::new(EventQueue::new_with_limit(config.event_queue_limit));
    let result_cache = Arc::new(ResultCache::in_memory(
        config,
        keys,
        Arc::new(synthetic_hydrators()?),
    ));
    let consumer = Arc::new(InvalidationConsumer::new(Arc::clone(&result_cache), queue));
    let trigger = CacheTrigger::new(Arc::clone(&consumer));
    let maintenance = cache::maintenance::spawn(Arc::clone(&consumer));

    let resolver = SyntheticProductResolver {
        calls: AtomicUsize::new(0),
        latency: Duration::from_millis(args.resolve_latency_ms),
    };
    let context = ContextDiscriminators::new()
        .with_store("default")
        .with_currency("USD");

    info!(
        concurrency = args.concurrency,
        keys = args.keys,
        rounds = args.rounds,
        "Simulation starting"
    );

    let started_at = Instant::now();
    let mut requests = 0usize;

    for round in 0..args.rounds {
        if round > 0 {
            trigger.entity_changed("product", round % args.keys).await;
        }

        let mut pending = Vec::with_capacity(args.keys * args.concurrency);
        for index in 0..args.keys {
            let arguments = json!({ "index": index, "filter": { "in_stock": true } });
            for _ in 0..args.concurrency {
                let arguments = arguments.clone();
                let cache = &result_cache;
                let resolver = &resolver;
                let context = &context;
                pending.push(async move { cache.resolve(resolver, &arguments, context).await });
            }
        }

        requests += pending.len();
        for outcome in join_all(pending).await {
            match outcome {
                Ok(_) => {}
                Err(never) => match never {},
            }
        }
    }

    maintenance.shutdown().await;

    let resolutions = resolver.calls.load(Ordering::SeqCst);
    let elapsed_ms = started_at.elapsed().as_millis() as u64;
    info!(requests, resolutions, elapsed_ms, "Simulation complete");
    println!(
        "requests={requests} resolutions={resolutions} expected_with_dedupe={} elapsed_ms={elapsed_ms}",
        args.keys + args.rounds - 1
    );

    Ok(())
}
