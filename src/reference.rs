//! Immutable handles to registered service providers.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::properties::{PropertyMap, PropertyValue, SERVICE_ID, SERVICE_RANKING};

/// Identity of a registered service, assigned by the registry.
///
/// Two views of the same registration always carry the same id, however many
/// property transformations sit between them and the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceId(pub i64);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque handle to a service provider with immutable properties.
///
/// References are cheap to clone (`Arc`-shared). Equality and hashing go by
/// [`ServiceId`]; the natural ordering is the standard registry rule: higher
/// `service.ranking` first, ties broken by lower `service.id` so that older
/// registrations win.
///
/// # Examples
///
/// ```rust
/// use rivet::{PropertyMap, ServiceId, ServiceReference};
///
/// let low = ServiceReference::new(ServiceId(1), PropertyMap::new());
/// let high = ServiceReference::new(
///     ServiceId(2),
///     PropertyMap::new().with("service.ranking", 10i64),
/// );
/// assert!(high < low); // best-first ordering
/// ```
#[derive(Clone)]
pub struct ServiceReference {
    inner: Arc<Inner>,
}

struct Inner {
    id: ServiceId,
    properties: PropertyMap,
}

impl ServiceReference {
    /// Creates a reference. The `service.id` property is forced to `id`.
    pub fn new(id: ServiceId, properties: PropertyMap) -> Self {
        let properties = properties.with(SERVICE_ID, id.0);
        ServiceReference {
            inner: Arc::new(Inner { id, properties }),
        }
    }

    /// The registry-assigned identity.
    pub fn id(&self) -> ServiceId {
        self.inner.id
    }

    /// Looks a property up by key.
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.inner.properties.get(key)
    }

    /// The full property map.
    pub fn properties(&self) -> &PropertyMap {
        &self.inner.properties
    }

    /// The provider ranking. Absent or non-integer values read as 0.
    pub fn ranking(&self) -> i64 {
        ranking_of(self.inner.properties.get(SERVICE_RANKING))
    }
}

/// Reads a ranking value, defaulting to 0 when absent or not an integer.
pub(crate) fn ranking_of(value: Option<&PropertyValue>) -> i64 {
    value.and_then(PropertyValue::as_int).unwrap_or(0)
}

/// Best-first ordering: rank descending, then id ascending.
pub(crate) fn rank_then_id(rank_a: i64, id_a: ServiceId, rank_b: i64, id_b: ServiceId) -> Ordering {
    rank_b.cmp(&rank_a).then_with(|| id_a.cmp(&id_b))
}

impl PartialEq for ServiceReference {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ServiceReference {}

impl std::hash::Hash for ServiceReference {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl PartialOrd for ServiceReference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServiceReference {
    fn cmp(&self, other: &Self) -> Ordering {
        rank_then_id(self.ranking(), self.id(), other.ranking(), other.id())
    }
}

impl fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceReference")
            .field("id", &self.inner.id.0)
            .field("properties", &self.inner.properties)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(id: i64, rank: i64) -> ServiceReference {
        ServiceReference::new(
            ServiceId(id),
            PropertyMap::new().with(SERVICE_RANKING, rank),
        )
    }

    #[test]
    fn equality_is_by_id() {
        let a = ServiceReference::new(ServiceId(1), PropertyMap::new().with("x", "1"));
        let b = ServiceReference::new(ServiceId(1), PropertyMap::new().with("x", "2"));
        assert_eq!(a, b);
        assert_ne!(a, ServiceReference::new(ServiceId(2), PropertyMap::new()));
    }

    #[test]
    fn natural_order_prefers_rank_then_age() {
        let old_low = reference(1, 0);
        let new_high = reference(2, 10);
        let new_low = reference(3, 0);

        let mut refs = vec![new_low.clone(), old_low.clone(), new_high.clone()];
        refs.sort();
        assert_eq!(refs, vec![new_high, old_low, new_low]);
    }

    #[test]
    fn ranking_defaults_to_zero() {
        let no_rank = ServiceReference::new(ServiceId(1), PropertyMap::new());
        assert_eq!(no_rank.ranking(), 0);
        let bad_rank = ServiceReference::new(
            ServiceId(2),
            PropertyMap::new().with(SERVICE_RANKING, "high"),
        );
        assert_eq!(bad_rank.ranking(), 0);
    }

    #[test]
    fn service_id_property_is_forced() {
        let sneaky = ServiceReference::new(
            ServiceId(7),
            PropertyMap::new().with(SERVICE_ID, 99i64),
        );
        assert_eq!(sneaky.property(SERVICE_ID).and_then(|v| v.as_int()), Some(7));
    }
}
