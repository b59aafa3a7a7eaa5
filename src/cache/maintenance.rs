//! Background maintenance.
//!
//! One task ticks two intervals: the eager ttl sweep and the auto-consume of
//! queued invalidation events.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use super::consumer::InvalidationConsumer;

/// Handle to a running maintenance task.
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Stop the task after its current tick and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(error) = self.task.await {
            warn!(error = %error, "cache maintenance task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn the maintenance loop for `consumer`'s cache.
///
/// Must be called from within a tokio runtime.
pub fn spawn(consumer: Arc<InvalidationConsumer>) -> MaintenanceHandle {
    let (shutdown, mut stop) = watch::channel(false);
    let config = consumer.cache().config().clone();

    let task = tokio::spawn(async move {
        let mut sweep = interval(config.sweep_interval());
        let mut consume = interval(config.auto_consume_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        consume.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first ticks.
        sweep.tick().await;
        consume.tick().await;

        info!(
            sweep_interval_ms = config.sweep_interval_ms,
            auto_consume_interval_ms = config.auto_consume_interval_ms,
            "cache maintenance started"
        );

        loop {
            tokio::select! {
                _ = sweep.tick() => {
                    match consumer.cache().sweep_expired().await {
                        Ok(removed) => debug!(removed, "ttl sweep finished"),
                        Err(error) => warn!(error = %error, "ttl sweep skipped, store unavailable"),
                    }
                }
                _ = consume.tick() => {
                    consumer.consume().await;
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        info!("cache maintenance stopped");
    });

    MaintenanceHandle { shutdown, task }
}
