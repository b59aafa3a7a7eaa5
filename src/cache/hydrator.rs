//! Hydration strategies keyed by resolver.
//!
//! A resolver may register one [`Hydrator`], which rebuilds its native result
//! from the stored payload on a cache hit, and one [`Dehydrator`], which
//! rewrites the native result before it is serialized on a miss. Resolvers
//! without a hydrator are cached as opaque JSON and returned unchanged.
//!
//! Registration happens once through [`HydratorRegistryBuilder`]; the built
//! [`HydratorRegistry`] has no mutating methods.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use super::identity::ResolverIdentity;

#[derive(Debug, Error)]
pub enum HydrationError {
    #[error("stored payload could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("hydrator rejected payload: {reason}")]
    Rejected { reason: String },
}

impl HydrationError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

/// Rebuilds a resolver's native result from its cached form.
pub trait Hydrator: Send + Sync {
    fn hydrate(&self, payload: Value) -> Result<Value, HydrationError>;
}

impl<F> Hydrator for F
where
    F: Fn(Value) -> Result<Value, HydrationError> + Send + Sync,
{
    fn hydrate(&self, payload: Value) -> Result<Value, HydrationError> {
        self(payload)
    }
}

/// Prepares a resolver's native result for storage.
pub trait Dehydrator: Send + Sync {
    fn dehydrate(&self, value: &Value) -> Value;
}

impl<F> Dehydrator for F
where
    F: Fn(&Value) -> Value + Send + Sync,
{
    fn dehydrate(&self, value: &Value) -> Value {
        self(value)
    }
}

/// Runs several hydrators in ascending sort order as one hydrator.
#[derive(Default)]
pub struct CompositeHydrator {
    chain: Vec<(i32, Arc<dyn Hydrator>)>,
}

impl CompositeHydrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a step. Steps with equal sort order run in insertion order.
    pub fn with(mut self, sort_order: i32, hydrator: impl Hydrator + 'static) -> Self {
        self.chain.push((sort_order, Arc::new(hydrator)));
        self.chain.sort_by_key(|(order, _)| *order);
        self
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

impl Hydrator for CompositeHydrator {
    fn hydrate(&self, payload: Value) -> Result<Value, HydrationError> {
        self.chain
            .iter()
            .try_fold(payload, |value, (_, hydrator)| hydrator.hydrate(value))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("resolver `{resolver}` already has a hydrator")]
    DuplicateHydrator { resolver: String },
    #[error("resolver `{resolver}` already has a dehydrator")]
    DuplicateDehydrator { resolver: String },
}

/// Declarative registration list for a [`HydratorRegistry`].
#[derive(Default)]
pub struct HydratorRegistryBuilder {
    hydrators: Vec<(ResolverIdentity, Arc<dyn Hydrator>)>,
    dehydrators: Vec<(ResolverIdentity, Arc<dyn Dehydrator>)>,
}

impl HydratorRegistryBuilder {
    pub fn hydrator(
        mut self,
        resolver: impl Into<ResolverIdentity>,
        hydrator: impl Hydrator + 'static,
    ) -> Self {
        self.hydrators.push((resolver.into(), Arc::new(hydrator)));
        self
    }

    pub fn dehydrator(
        mut self,
        resolver: impl Into<ResolverIdentity>,
        dehydrator: impl Dehydrator + 'static,
    ) -> Self {
        self.dehydrators.push((resolver.into(), Arc::new(dehydrator)));
        self
    }

    /// Freeze the registrations. A resolver registered twice is an error.
    pub fn build(self) -> Result<HydratorRegistry, RegistryError> {
        let mut hydrators = HashMap::with_capacity(self.hydrators.len());
        for (resolver, hydrator) in self.hydrators {
            match hydrators.entry(resolver) {
                Entry::Vacant(vacant) => {
                    vacant.insert(hydrator);
                }
                Entry::Occupied(occupied) => {
                    return Err(RegistryError::DuplicateHydrator {
                        resolver: occupied.key().to_string(),
                    });
                }
            }
        }

        let mut dehydrators = HashMap::with_capacity(self.dehydrators.len());
        for (resolver, dehydrator) in self.dehydrators {
            match dehydrators.entry(resolver) {
                Entry::Vacant(vacant) => {
                    vacant.insert(dehydrator);
                }
                Entry::Occupied(occupied) => {
                    return Err(RegistryError::DuplicateDehydrator {
                        resolver: occupied.key().to_string(),
                    });
                }
            }
        }

        Ok(HydratorRegistry {
            hydrators,
            dehydrators,
        })
    }
}

/// Read-only resolver → strategy lookup.
#[derive(Default)]
pub struct HydratorRegistry {
    hydrators: HashMap<ResolverIdentity, Arc<dyn Hydrator>>,
    dehydrators: HashMap<ResolverIdentity, Arc<dyn Dehydrator>>,
}

impl HydratorRegistry {
    pub fn builder() -> HydratorRegistryBuilder {
        HydratorRegistryBuilder::default()
    }

    /// A registry with no strategies; every resolver is cached as raw data.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Hydrator for `resolver`, `None` if none is configured.
    pub fn get_for_resolver(&self, resolver: &ResolverIdentity) -> Option<Arc<dyn Hydrator>> {
        self.hydrators.get(resolver).cloned()
    }

    /// Dehydrator for `resolver`, `None` if none is configured.
    pub fn get_dehydrator_for_resolver(
        &self,
        resolver: &ResolverIdentity,
    ) -> Option<Arc<dyn Dehydrator>> {
        self.dehydrators.get(resolver).cloned()
    }

    pub fn len(&self) -> usize {
        self.hydrators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hydrators.is_empty() && self.dehydrators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn products() -> ResolverIdentity {
        ResolverIdentity::new("Catalog\\Resolver\\Products")
    }

    /// Stores `price` as integer cents and restores the `{amount, currency}` shape.
    fn price_pair() -> (
        impl Fn(&Value) -> Value + Send + Sync,
        impl Fn(Value) -> Result<Value, HydrationError> + Send + Sync,
    ) {
        let dehydrate = |value: &Value| {
            let mut stored = value.clone();
            if let Some(price) = stored.get("price").cloned() {
                stored["price_cents"] = price["amount"].as_f64().map_or(Value::Null, |amount| {
                    json!((amount * 100.0).round() as i64)
                });
                stored["price_currency"] = price["currency"].clone();
                if let Some(object) = stored.as_object_mut() {
                    object.remove("price");
                }
            }
            stored
        };
        let hydrate = |mut payload: Value| -> Result<Value, HydrationError> {
            let cents = payload["price_cents"]
                .as_i64()
                .ok_or_else(|| HydrationError::rejected("missing price_cents"))?;
            let currency = payload["price_currency"].clone();
            let object = payload
                .as_object_mut()
                .ok_or_else(|| HydrationError::rejected("payload is not an object"))?;
            object.remove("price_cents");
            object.remove("price_currency");
            object.insert(
                "price".to_string(),
                json!({"amount": cents as f64 / 100.0, "currency": currency}),
            );
            Ok(payload)
        };
        (dehydrate, hydrate)
    }

    #[test]
    fn missing_hydrator_is_none() {
        let registry = HydratorRegistry::empty();
        assert!(registry.get_for_resolver(&products()).is_none());
        assert!(registry.get_dehydrator_for_resolver(&products()).is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let result = HydratorRegistry::builder()
            .hydrator(products(), |value: Value| Ok::<_, HydrationError>(value))
            .hydrator(products(), |value: Value| Ok::<_, HydrationError>(value))
            .build();
        assert!(matches!(
            result,
            Err(RegistryError::DuplicateHydrator { .. })
        ));
    }

    #[test]
    fn hydrate_reverses_dehydrate() {
        let (dehydrate, hydrate) = price_pair();
        let registry = HydratorRegistry::builder()
            .hydrator(products(), hydrate)
            .dehydrator(products(), dehydrate)
            .build()
            .expect("unique registrations");

        let native = json!({
            "sku": "24-MB01",
            "price": {"amount": 34.0, "currency": "USD"}
        });

        let dehydrator = registry
            .get_dehydrator_for_resolver(&products())
            .expect("dehydrator");
        let stored = serde_json::to_vec(&dehydrator.dehydrate(&native)).expect("serializable");

        let hydrator = registry.get_for_resolver(&products()).expect("hydrator");
        let decoded: Value = serde_json::from_slice(&stored).expect("decodable");
        assert_eq!(hydrator.hydrate(decoded).expect("hydrated"), native);
    }

    #[test]
    fn composite_runs_in_sort_order() {
        let composite = CompositeHydrator::new()
            .with(20, |mut value: Value| {
                let trail = format!("{}-second", value["trail"].as_str().unwrap_or(""));
                value["trail"] = json!(trail);
                Ok::<_, HydrationError>(value)
            })
            .with(10, |mut value: Value| {
                value["trail"] = json!("first");
                Ok::<_, HydrationError>(value)
            });

        assert_eq!(composite.len(), 2);
        let hydrated = composite.hydrate(json!({})).expect("hydrated");
        assert_eq!(hydrated["trail"], "first-second");
    }

    #[test]
    fn composite_stops_at_first_failure() {
        let composite = CompositeHydrator::new()
            .with(1, |_: Value| -> Result<Value, HydrationError> {
                Err(HydrationError::rejected("corrupt"))
            })
            .with(2, |_: Value| Ok::<_, HydrationError>(json!("unreachable")));

        assert!(matches!(
            composite.hydrate(json!({})),
            Err(HydrationError::Rejected { .. })
        ));
    }
}
