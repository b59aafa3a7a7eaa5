//! Cache key derivation.
//!
//! A [`CacheKey`] is a SHA-256 digest over the resolver identity, the
//! normalized argument set and the context discriminators. Argument objects
//! are normalized (keys sorted, recursively) before hashing, so two argument
//! sets that differ only in serialization order produce the same key.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::identity::ResolverIdentity;

pub const DEFAULT_KEY_PREFIX: &str = "gql_resolver";

/// A context factor that can change a resolver's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Discriminator {
    /// Store view / scope code.
    Store,
    Locale,
    Currency,
    CustomerGroup,
    /// Host-defined factor, e.g. `customer_tax_rate` or `is_logged_in`.
    Custom(String),
}

impl Discriminator {
    pub fn name(&self) -> &str {
        match self {
            Self::Store => "store",
            Self::Locale => "locale",
            Self::Currency => "currency",
            Self::CustomerGroup => "customer_group",
            Self::Custom(name) => name,
        }
    }

    // Hashed ahead of the name so `Custom("store")` cannot alias `Store`.
    fn namespace(&self) -> &'static str {
        match self {
            Self::Custom(_) => "custom",
            _ => "builtin",
        }
    }
}

impl fmt::Display for Discriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Context factors supplied by the caller for one resolver invocation.
///
/// The caller must supply every factor the resolver's output depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextDiscriminators {
    factors: BTreeMap<Discriminator, String>,
}

impl ContextDiscriminators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, discriminator: Discriminator, value: impl Into<String>) -> Self {
        self.insert(discriminator, value);
        self
    }

    pub fn with_store(self, store: impl Into<String>) -> Self {
        self.with(Discriminator::Store, store)
    }

    pub fn with_locale(self, locale: impl Into<String>) -> Self {
        self.with(Discriminator::Locale, locale)
    }

    pub fn with_currency(self, currency: impl Into<String>) -> Self {
        self.with(Discriminator::Currency, currency)
    }

    pub fn with_customer_group(self, group: impl Into<String>) -> Self {
        self.with(Discriminator::CustomerGroup, group)
    }

    pub fn insert(&mut self, discriminator: Discriminator, value: impl Into<String>) {
        self.factors.insert(discriminator, value.into());
    }

    pub fn get(&self, discriminator: &Discriminator) -> Option<&str> {
        self.factors.get(discriminator).map(String::as_str)
    }

    pub fn contains(&self, discriminator: &Discriminator) -> bool {
        self.factors.contains_key(discriminator)
    }

    /// Factors in a stable (sorted) order.
    pub fn iter(&self) -> impl Iterator<Item = (&Discriminator, &str)> {
        self.factors.iter().map(|(d, v)| (d, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }
}

/// Stable identity of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

#[derive(Debug, Error)]
pub enum KeyBuildError {
    #[error("resolver identity must not be empty")]
    EmptyIdentity,
    #[error("arguments for `{resolver}` are not serializable: {source}")]
    Serialize {
        resolver: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("resolver `{resolver}` requires the `{discriminator}` context discriminator")]
    MissingDiscriminator {
        resolver: String,
        discriminator: String,
    },
}

/// Derives cache keys.
///
/// Required discriminators are declared while building; the finished builder
/// is read-only and can be shared across request tasks.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    prefix: String,
    required: HashMap<ResolverIdentity, Vec<Discriminator>>,
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

impl KeyBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            required: HashMap::new(),
        }
    }

    /// Declare the discriminators `resolver`'s output depends on.
    ///
    /// Repeated declarations for the same resolver accumulate.
    pub fn require(
        mut self,
        resolver: impl Into<ResolverIdentity>,
        discriminators: impl IntoIterator<Item = Discriminator>,
    ) -> Self {
        let entry = self.required.entry(resolver.into()).or_default();
        for discriminator in discriminators {
            if !entry.contains(&discriminator) {
                entry.push(discriminator);
            }
        }
        self
    }

    pub fn required_for(&self, resolver: &ResolverIdentity) -> &[Discriminator] {
        self.required
            .get(resolver)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Replace the prefix, keeping the declared requirements.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build the key for one resolver invocation.
    pub fn build<A>(
        &self,
        resolver: &ResolverIdentity,
        arguments: &A,
        context: &ContextDiscriminators,
    ) -> Result<CacheKey, KeyBuildError>
    where
        A: Serialize + ?Sized,
    {
        if resolver.is_empty() {
            return Err(KeyBuildError::EmptyIdentity);
        }

        if let Some(missing) = self
            .required_for(resolver)
            .iter()
            .find(|discriminator| !context.contains(discriminator))
        {
            return Err(KeyBuildError::MissingDiscriminator {
                resolver: resolver.to_string(),
                discriminator: missing.to_string(),
            });
        }

        let arguments = serde_json::to_value(arguments)
            .map(normalize)
            .and_then(|value| serde_json::to_vec(&value))
            .map_err(|source| KeyBuildError::Serialize {
                resolver: resolver.to_string(),
                source,
            })?;

        let mut hasher = Sha256::new();
        update_field(&mut hasher, resolver.as_str().as_bytes());
        update_field(&mut hasher, &arguments);
        for (discriminator, value) in context.iter() {
            update_field(&mut hasher, discriminator.namespace().as_bytes());
            update_field(&mut hasher, discriminator.name().as_bytes());
            update_field(&mut hasher, value.as_bytes());
        }
        let digest = hex::encode(hasher.finalize());

        Ok(CacheKey(Arc::from(format!("{}:{digest}", self.prefix))))
    }
}

// Length-prefixing keeps field boundaries unambiguous.
fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Recursively sort object keys.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut sorted = Map::with_capacity(entries.len());
            for (key, value) in entries {
                sorted.insert(key, normalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        other => other,
    }
}
