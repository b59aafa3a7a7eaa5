//! Task-local tag collector.
//!
//! Resolvers call [`record`] for every entity they read; the orchestrator runs
//! each resolution inside [`with_collector`] and stores the collected tags
//! with the entry. Collection is scoped to the current task: work moved onto
//! another task with `tokio::spawn` must report its tags through
//! [`Resolved`](super::orchestrator::Resolved) instead.

use std::cell::RefCell;
use std::collections::HashSet;
use std::future::Future;

use super::identity::Tag;

tokio::task_local! {
    static TAGS: RefCell<HashSet<Tag>>;
}

/// Record a tag the current resolution depends on.
///
/// If no collector is active, the call is silently ignored.
pub fn record(tag: impl Into<Tag>) {
    let tag = tag.into();
    let _ = TAGS.try_with(|tags| {
        tags.borrow_mut().insert(tag);
    });
}

/// Record several tags at once.
pub fn record_all(tags: impl IntoIterator<Item = Tag>) {
    let _ = TAGS.try_with(|collected| {
        collected.borrow_mut().extend(tags);
    });
}

/// Tags recorded so far in the active collector; empty if none is active.
pub fn collect() -> HashSet<Tag> {
    TAGS.try_with(|tags| tags.borrow().clone())
        .unwrap_or_default()
}

/// Run `f` with a fresh collector and return its output with the recorded tags.
///
/// Collectors nest: an inner collector shadows the outer one, so callers that
/// want the outer scope to see inner tags must re-record them.
pub async fn with_collector<F>(f: F) -> (F::Output, HashSet<Tag>)
where
    F: Future,
{
    TAGS.scope(RefCell::new(HashSet::new()), async move {
        let output = f.await;
        (output, collect())
    })
    .await
}
