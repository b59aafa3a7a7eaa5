//! In-flight resolution tracking.
//!
//! At most one resolution runs per cache key. The first caller becomes the
//! leader and holds a [`FlightGuard`]; later callers subscribe to the leader's
//! watch channel and suspend until it publishes a result. Dropping the guard
//! without completing (resolver error, cancellation, timeout) releases the
//! marker and closes the channel, which wakes the followers so they can retry.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::watch;

use super::identity::Tag;
use super::keys::CacheKey;

/// Result published by a leader to its followers.
#[derive(Debug)]
pub struct FlightResult {
    pub value: Value,
    pub tags: HashSet<Tag>,
}

type Slot = watch::Sender<Option<Arc<FlightResult>>>;

pub enum Flight {
    Leader(FlightGuard),
    Follower(watch::Receiver<Option<Arc<FlightResult>>>),
}

/// Tracks cache keys that currently have a resolution in progress.
#[derive(Default, Clone)]
pub struct InFlight {
    calls: Arc<DashMap<CacheKey, (u64, Slot)>>,
    generation: Arc<AtomicU64>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Become the leader for `key`, or subscribe to the current leader.
    pub fn join(&self, key: &CacheKey) -> Flight {
        match self.calls.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let (sender, _) = watch::channel(None);
                vacant.insert((generation, sender));
                Flight::Leader(FlightGuard {
                    key: key.clone(),
                    generation,
                    calls: Arc::clone(&self.calls),
                    completed: false,
                })
            }
            Entry::Occupied(occupied) => Flight::Follower(occupied.get().1.subscribe()),
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.calls.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Leader's claim on a key. Released on drop.
pub struct FlightGuard {
    key: CacheKey,
    generation: u64,
    calls: Arc<DashMap<CacheKey, (u64, Slot)>>,
    completed: bool,
}

impl FlightGuard {
    /// Release the key and hand `result` to every follower.
    pub fn complete(mut self, result: Arc<FlightResult>) {
        self.completed = true;
        if let Some((_, (_, sender))) = self.release() {
            sender.send_replace(Some(result));
        }
    }

    fn release(&self) -> Option<(CacheKey, (u64, Slot))> {
        // A newer leader may already own the key; only our own slot is removed.
        self.calls
            .remove_if(&self.key, |_, (generation, _)| *generation == self.generation)
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if !self.completed {
            self.release();
        }
    }
}

/// Wait for the leader behind `receiver`.
///
/// Returns `None` if the leader gave up without a result.
pub async fn wait_for_leader(
    mut receiver: watch::Receiver<Option<Arc<FlightResult>>>,
) -> Option<Arc<FlightResult>> {
    match receiver.wait_for(Option::is_some).await {
        Ok(result) => (*result).clone(),
        Err(_) => None,
    }
}
