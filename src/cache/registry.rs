//! Bidirectional tag registry.
//!
//! Tracks tag → cache keys and cache key → tags so that invalidating a tag
//! finds every affected entry and removing an entry leaves no dangling edges.
//!
//! The registry also versions invalidations. A writer snapshots the current
//! [`Epoch`] before computing a result and checks [`TagRegistry::invalidated_since`]
//! before storing it, so a tag invalidated while the result was being computed
//! cannot be re-populated with the pre-invalidation value.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::identity::Tag;
use super::keys::CacheKey;
use super::lock::{rw_read, rw_write};

const COMPONENT: &str = "cache::registry";

// Tags remembered before the log folds into its floor.
const INVALIDATION_LOG_LIMIT: usize = 4096;

/// Monotonic invalidation version of a [`TagRegistry`].
pub type Epoch = u64;

#[derive(Default)]
struct InvalidationLog {
    current: Epoch,
    /// Snapshots older than this are stale regardless of their tags.
    floor: Epoch,
    last: HashMap<Tag, Epoch>,
}

impl InvalidationLog {
    fn mark(&mut self, tag: &Tag) {
        self.current += 1;
        self.last.insert(tag.clone(), self.current);
        if self.last.len() > INVALIDATION_LOG_LIMIT {
            self.last.clear();
            self.floor = self.current;
        }
    }

    fn mark_all(&mut self) {
        self.current += 1;
        self.last.clear();
        self.floor = self.current;
    }

    fn touched_since<'a>(&self, tags: impl IntoIterator<Item = &'a Tag>, since: Epoch) -> bool {
        since < self.floor
            || tags
                .into_iter()
                .any(|tag| self.last.get(tag).is_some_and(|epoch| *epoch > since))
    }
}

#[derive(Default)]
struct Edges {
    tag_to_keys: HashMap<Tag, HashSet<CacheKey>>,
    key_to_tags: HashMap<CacheKey, HashSet<Tag>>,
    invalidations: InvalidationLog,
}

impl Edges {
    fn detach(&mut self, cache_key: &CacheKey) -> bool {
        let Some(tags) = self.key_to_tags.remove(cache_key) else {
            return false;
        };
        for tag in tags {
            if let Some(keys) = self.tag_to_keys.get_mut(&tag) {
                keys.remove(cache_key);
                if keys.is_empty() {
                    self.tag_to_keys.remove(&tag);
                }
            }
        }
        true
    }
}

/// Many-to-many mapping between cache keys and invalidation tags.
///
/// Both directions live behind one lock, so a reader observes either the
/// state before or after any mutation, never a half-cleaned one.
#[derive(Default)]
pub struct TagRegistry {
    edges: RwLock<Edges>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `cache_key` with `tags`, merging with any existing tags.
    pub fn associate(&self, cache_key: &CacheKey, tags: impl IntoIterator<Item = Tag>) {
        let mut edges = rw_write(&self.edges, COMPONENT, "associate");
        let Edges {
            tag_to_keys,
            key_to_tags,
            ..
        } = &mut *edges;

        let known = key_to_tags.entry(cache_key.clone()).or_default();
        for tag in tags {
            tag_to_keys
                .entry(tag.clone())
                .or_default()
                .insert(cache_key.clone());
            known.insert(tag);
        }
    }

    /// Cache keys currently associated with `tag`.
    pub fn entries_for_tag(&self, tag: &Tag) -> HashSet<CacheKey> {
        rw_read(&self.edges, COMPONENT, "entries_for_tag")
            .tag_to_keys
            .get(tag)
            .cloned()
            .unwrap_or_default()
    }

    /// Tags currently associated with `cache_key`.
    pub fn tags_for_entry(&self, cache_key: &CacheKey) -> HashSet<Tag> {
        rw_read(&self.edges, COMPONENT, "tags_for_entry")
            .key_to_tags
            .get(cache_key)
            .cloned()
            .unwrap_or_default()
    }

    /// Remove `cache_key` from every tag. Returns false if it was unknown.
    pub fn remove(&self, cache_key: &CacheKey) -> bool {
        rw_write(&self.edges, COMPONENT, "remove").detach(cache_key)
    }

    /// Remove several keys in one critical section.
    pub fn remove_many<'a>(&self, cache_keys: impl IntoIterator<Item = &'a CacheKey>) -> usize {
        let mut edges = rw_write(&self.edges, COMPONENT, "remove_many");
        cache_keys
            .into_iter()
            .filter(|cache_key| edges.detach(cache_key))
            .count()
    }

    /// Detach every key associated with `tag` and record the invalidation.
    ///
    /// Returns the detached keys.
    pub fn invalidate(&self, tag: &Tag) -> HashSet<CacheKey> {
        let mut edges = rw_write(&self.edges, COMPONENT, "invalidate");
        edges.invalidations.mark(tag);
        let keys = edges.tag_to_keys.get(tag).cloned().unwrap_or_default();
        for cache_key in &keys {
            edges.detach(cache_key);
        }
        keys
    }

    /// Current invalidation epoch.
    pub fn epoch(&self) -> Epoch {
        rw_read(&self.edges, COMPONENT, "epoch").invalidations.current
    }

    /// Whether any of `tags` was invalidated after the `since` snapshot.
    ///
    /// May report false positives once old invalidations have been folded
    /// away; never false negatives.
    pub fn invalidated_since<'a>(&self, tags: impl IntoIterator<Item = &'a Tag>, since: Epoch) -> bool {
        rw_read(&self.edges, COMPONENT, "invalidated_since")
            .invalidations
            .touched_since(tags, since)
    }

    /// Drop every edge. Counts as an invalidation of every tag.
    pub fn clear(&self) {
        let mut edges = rw_write(&self.edges, COMPONENT, "clear");
        edges.tag_to_keys.clear();
        edges.key_to_tags.clear();
        edges.invalidations.mark_all();
    }

    /// Number of tags with at least one entry.
    pub fn tag_count(&self) -> usize {
        rw_read(&self.edges, COMPONENT, "tag_count").tag_to_keys.len()
    }

    /// Number of tracked cache keys.
    pub fn key_count(&self) -> usize {
        rw_read(&self.edges, COMPONENT, "key_count").key_to_tags.len()
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    fn tags(names: &[&str]) -> Vec<Tag> {
        names.iter().map(|name| Tag::from(*name)).collect()
    }

    #[test]
    fn associate_and_lookup_both_directions() {
        let registry = TagRegistry::new();
        let key = CacheKey::from("A");

        registry.associate(&key, tags(&["product_1", "category_3"]));

        assert!(registry.entries_for_tag(&Tag::from("product_1")).contains(&key));
        assert!(registry.entries_for_tag(&Tag::from("category_3")).contains(&key));
        assert_eq!(registry.tags_for_entry(&key).len(), 2);
    }

    #[test]
    fn associate_merges_instead_of_replacing() {
        let registry = TagRegistry::new();
        let key = CacheKey::from("A");

        registry.associate(&key, tags(&["t1", "t2"]));
        registry.associate(&key, tags(&["t2", "t3"]));

        let found = registry.tags_for_entry(&key);
        assert_eq!(found.len(), 3);
        assert!(found.contains(&Tag::from("t1")));
        assert!(registry.entries_for_tag(&Tag::from("t1")).contains(&key));
    }

    #[test]
    fn remove_leaves_no_dangling_edges() {
        let registry = TagRegistry::new();
        let a = CacheKey::from("A");
        let b = CacheKey::from("B");

        registry.associate(&a, tags(&["t1"]));
        registry.associate(&b, tags(&["t1", "t2"]));

        assert!(registry.remove(&b));
        assert!(!registry.remove(&b));

        assert!(registry.entries_for_tag(&Tag::from("t2")).is_empty());
        assert_eq!(registry.entries_for_tag(&Tag::from("t1")).len(), 1);
        assert_eq!(registry.tag_count(), 1);
        assert_eq!(registry.key_count(), 1);
    }

    #[test]
    fn remove_many_counts_known_keys() {
        let registry = TagRegistry::new();
        let a = CacheKey::from("A");
        let b = CacheKey::from("B");
        let unknown = CacheKey::from("C");

        registry.associate(&a, tags(&["t1"]));
        registry.associate(&b, tags(&["t1"]));

        assert_eq!(registry.remove_many([&a, &b, &unknown]), 2);
        assert_eq!(registry.tag_count(), 0);
        assert_eq!(registry.key_count(), 0);
    }

    #[test]
    fn clear_removes_all_edges() {
        let registry = TagRegistry::new();
        registry.associate(&CacheKey::from("A"), tags(&["t1"]));
        registry.clear();
        assert_eq!(registry.tag_count(), 0);
        assert_eq!(registry.key_count(), 0);
    }

    #[test]
    fn invalidate_detaches_keys_and_advances_epoch() {
        let registry = TagRegistry::new();
        let a = CacheKey::from("A");
        let b = CacheKey::from("B");
        registry.associate(&a, tags(&["t1"]));
        registry.associate(&b, tags(&["t1", "t2"]));

        let before = registry.epoch();
        let detached = registry.invalidate(&Tag::from("t1"));

        assert_eq!(detached, HashSet::from([a, b]));
        assert!(registry.entries_for_tag(&Tag::from("t2")).is_empty());
        assert!(registry.epoch() > before);
    }

    #[test]
    fn invalidated_since_only_flags_later_invalidations() {
        let registry = TagRegistry::new();
        let product = Tag::from("product_1");
        let category = Tag::from("category_3");

        registry.invalidate(&product);
        let snapshot = registry.epoch();
        assert!(!registry.invalidated_since([&product, &category], snapshot));

        registry.invalidate(&category);
        assert!(registry.invalidated_since([&product, &category], snapshot));
        assert!(!registry.invalidated_since([&product], snapshot));
    }

    #[test]
    fn folded_log_treats_older_snapshots_as_stale() {
        let registry = TagRegistry::new();
        let snapshot = registry.epoch();

        for id in 0..=INVALIDATION_LOG_LIMIT {
            registry.invalidate(&Tag::entity("product", id));
        }

        let untouched = Tag::from("category_3");
        assert!(registry.invalidated_since([&untouched], snapshot));
        assert!(!registry.invalidated_since([&untouched], registry.epoch()));
    }

    #[test]
    fn clear_invalidates_every_snapshot() {
        let registry = TagRegistry::new();
        let snapshot = registry.epoch();
        registry.clear();
        assert!(registry.invalidated_since([&Tag::from("anything")], snapshot));
    }

    #[test]
    fn registry_recovers_from_poisoned_lock() {
        let registry = TagRegistry::new();

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = registry.edges.write().expect("edges lock should be acquired");
            panic!("poison edges lock");
        }));

        registry.associate(&CacheKey::from("A"), tags(&["t1"]));
        assert_eq!(registry.key_count(), 1);
    }
}
