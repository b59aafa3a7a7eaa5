//! Invalidation plan generation.
//!
//! Merges a batch of events into the set of tags to invalidate.

use std::collections::HashSet;
use std::fmt;

use uuid::Uuid;

use super::events::{EventKind, InvalidationEvent};
use super::identity::Tag;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct InvalidationPlan {
    /// Tags to invalidate; empty when `flush_all` is set.
    pub tags: HashSet<Tag>,
    /// Drop everything this cache type wrote.
    pub flush_all: bool,
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InvalidationPlan {{ tags: {}, flush_all: {} }}",
            self.tags.len(),
            self.flush_all
        )
    }
}

impl InvalidationPlan {
    /// Merge events into a plan.
    ///
    /// Events are deduplicated by id. A flush subsumes every tag.
    pub fn from_events(events: impl IntoIterator<Item = InvalidationEvent>) -> Self {
        let mut plan = Self::default();
        let mut seen_ids: HashSet<Uuid> = HashSet::new();

        for event in events.into_iter().filter(|e| seen_ids.insert(e.id)) {
            match event.kind {
                EventKind::FlushAll => plan.flush_all = true,
                _ if plan.flush_all => {}
                EventKind::TagsInvalidated { tags } => plan.tags.extend(tags),
                EventKind::EntityChanged { entity_type, id } => {
                    plan.tags.insert(Tag::entity(&entity_type, id));
                }
            }
        }

        if plan.flush_all {
            plan.tags.clear();
        }
        plan
    }

    pub fn is_empty(&self) -> bool {
        !self.flush_all && self.tags.is_empty()
    }
}
