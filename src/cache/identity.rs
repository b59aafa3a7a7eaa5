//! Identifiers shared by every cache component.

use std::fmt;
use std::sync::Arc;

/// Names a query resolver, typically its fully-qualified type path.
///
/// Cheap to clone; the name is immutable once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolverIdentity(Arc<str>);

impl ResolverIdentity {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ResolverIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResolverIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResolverIdentity {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

/// An invalidation grouping such as `product_123` or `catalog_price_rule`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(Arc<str>);

impl Tag {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Tag for a single entity, rendered as `{entity_type}_{id}`.
    pub fn entity(entity_type: &str, id: impl fmt::Display) -> Self {
        Self::new(format!("{entity_type}_{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tag {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Tag {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_tag_format() {
        assert_eq!(Tag::entity("product", 123).as_str(), "product_123");
        assert_eq!(Tag::entity("category", "men"), Tag::from("category_men"));
    }

    #[test]
    fn blank_identity_is_empty() {
        assert!(ResolverIdentity::new("  ").is_empty());
        assert!(!ResolverIdentity::new("Catalog\\Products").is_empty());
    }
}
