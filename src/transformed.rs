//! Property-overlay views over registry references.
//!
//! Tracking interceptors never mutate a registry reference; they rewrite a
//! [`TransformedReference`], a view holding an overlay map consulted before
//! the underlying properties. Removals are tombstones in the overlay so that
//! `keys()` correctly omits them.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt;

use once_cell::sync::Lazy;

use crate::error::{BindError, BindResult};
use crate::properties::{PropertyMap, PropertyValue, INSTANCE_NAME, SERVICE_ID, SERVICE_PID, SERVICE_RANKING};
use crate::reference::{rank_then_id, ranking_of, ServiceId, ServiceReference};

/// Properties that interceptors may never overlay or remove: they carry the
/// identity of the provider through every transformation.
pub static FORBIDDEN_KEYS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| [SERVICE_ID, SERVICE_PID, INSTANCE_NAME].into_iter().collect());

/// A transformed view of a [`ServiceReference`].
///
/// Lookup consults the overlay first, then the underlying reference. Equality
/// and hashing are by `service.id`, so a transformed view and its origin (or
/// two differently-transformed views of the same registration) compare equal.
/// The ordering uses the *effective* ranking, so an interceptor that overlays
/// `service.ranking` reorders the reference for every ranking consumer.
///
/// # Examples
///
/// ```rust
/// use rivet::{PropertyMap, ServiceId, ServiceReference, TransformedReference};
///
/// let origin = ServiceReference::new(
///     ServiceId(1),
///     PropertyMap::new().with("hidden", "x"),
/// );
/// let mut view = TransformedReference::new(origin);
/// view.add_property("location", "kitchen").unwrap();
/// view.remove_property("hidden").unwrap();
///
/// assert_eq!(view.get("location").and_then(|v| v.as_str()), Some("kitchen"));
/// assert!(view.get("hidden").is_none());
/// assert!(view.add_property("service.id", 9i64).is_err());
/// ```
#[derive(Clone)]
pub struct TransformedReference {
    origin: ServiceReference,
    overlay: BTreeMap<String, Option<PropertyValue>>,
}

impl TransformedReference {
    /// Wraps a registry reference with an empty overlay.
    pub fn new(origin: ServiceReference) -> Self {
        TransformedReference {
            origin,
            overlay: BTreeMap::new(),
        }
    }

    /// The registry-native reference, as required for service borrowing.
    pub fn initial_reference(&self) -> &ServiceReference {
        &self.origin
    }

    /// The identity of the underlying registration.
    pub fn id(&self) -> ServiceId {
        self.origin.id()
    }

    /// Looks a property up; the overlay wins and tombstones read as absent.
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        match self.overlay.get(key) {
            Some(Some(value)) => Some(value),
            Some(None) => None,
            None => self.origin.property(key),
        }
    }

    /// Does the view expose the given property?
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Overlays a property. Idempotent; rejects [`FORBIDDEN_KEYS`].
    pub fn add_property(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> BindResult<&mut Self> {
        let key = key.into();
        if FORBIDDEN_KEYS.contains(key.as_str()) {
            return Err(BindError::IllegalPropertyChange(key));
        }
        self.overlay.insert(key, Some(value.into()));
        Ok(self)
    }

    /// Overlays a property only when the view does not already expose it.
    pub fn add_property_if_absent(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> BindResult<&mut Self> {
        let key = key.into();
        if !self.contains(&key) {
            return self.add_property(key, value);
        }
        Ok(self)
    }

    /// Removes a property by storing a tombstone. Rejects [`FORBIDDEN_KEYS`].
    pub fn remove_property(&mut self, key: &str) -> BindResult<&mut Self> {
        if FORBIDDEN_KEYS.contains(key) {
            return Err(BindError::IllegalPropertyChange(key.to_string()));
        }
        self.overlay.insert(key.to_string(), None);
        Ok(self)
    }

    /// The exposed keys: underlying keys plus overlay keys, minus tombstones.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .origin
            .properties()
            .keys()
            .filter(|k| !matches!(self.overlay.get(k.as_str()), Some(None)))
            .cloned()
            .collect();
        for (key, value) in &self.overlay {
            if value.is_some() && !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys.sort();
        keys
    }

    /// Materialises the view into a plain property map, as needed for filter
    /// evaluation.
    pub fn effective_properties(&self) -> PropertyMap {
        self.keys()
            .into_iter()
            .filter_map(|key| self.get(&key).cloned().map(|value| (key, value)))
            .collect()
    }

    /// The effective ranking, honouring a `service.ranking` overlay.
    pub fn ranking(&self) -> i64 {
        ranking_of(self.get(SERVICE_RANKING))
    }
}

/// Strict equality: both views expose exactly the same key set with
/// pairwise-equal values. This, not identity, decides whether a modification
/// is propagated to the component.
pub fn strictly_equal(a: &TransformedReference, b: &TransformedReference) -> bool {
    let keys_a = a.keys();
    if keys_a != b.keys() {
        return false;
    }
    keys_a.iter().all(|key| a.get(key) == b.get(key))
}

impl From<ServiceReference> for TransformedReference {
    fn from(origin: ServiceReference) -> Self {
        TransformedReference::new(origin)
    }
}

impl PartialEq for TransformedReference {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for TransformedReference {}

impl PartialEq<ServiceReference> for TransformedReference {
    fn eq(&self, other: &ServiceReference) -> bool {
        self.id() == other.id()
    }
}

impl std::hash::Hash for TransformedReference {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl PartialOrd for TransformedReference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TransformedReference {
    fn cmp(&self, other: &Self) -> Ordering {
        rank_then_id(self.ranking(), self.id(), other.ranking(), other.id())
    }
}

impl fmt::Debug for TransformedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformedReference")
            .field("id", &self.id().0)
            .field("properties", &self.effective_properties())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> ServiceReference {
        ServiceReference::new(
            ServiceId(1),
            PropertyMap::new().with("lang", "en").with("hidden", "x"),
        )
    }

    #[test]
    fn overlay_wins_and_tombstones_hide() {
        let mut view = TransformedReference::new(origin());
        view.add_property("lang", "fr").unwrap();
        view.remove_property("hidden").unwrap();

        assert_eq!(view.get("lang").and_then(|v| v.as_str()), Some("fr"));
        assert!(view.get("hidden").is_none());
        assert!(!view.contains("hidden"));
        assert!(!view.keys().contains(&"hidden".to_string()));
    }

    #[test]
    fn set_then_remove_restores_key_set() {
        let mut view = TransformedReference::new(origin());
        let before = view.keys();
        view.add_property("location", "kitchen").unwrap();
        view.remove_property("location").unwrap();
        assert_eq!(view.keys(), before);
    }

    #[test]
    fn forbidden_keys_are_rejected() {
        let mut view = TransformedReference::new(origin());
        for key in [SERVICE_ID, SERVICE_PID, INSTANCE_NAME] {
            assert_eq!(
                view.add_property(key, "nope").unwrap_err(),
                BindError::IllegalPropertyChange(key.to_string())
            );
            assert_eq!(
                view.remove_property(key).unwrap_err(),
                BindError::IllegalPropertyChange(key.to_string())
            );
        }
    }

    #[test]
    fn add_if_absent_is_a_no_op_on_existing_keys() {
        let mut view = TransformedReference::new(origin());
        view.add_property_if_absent("lang", "fr").unwrap();
        assert_eq!(view.get("lang").and_then(|v| v.as_str()), Some("en"));
        view.add_property_if_absent("location", "kitchen").unwrap();
        assert_eq!(view.get("location").and_then(|v| v.as_str()), Some("kitchen"));
    }

    #[test]
    fn equality_survives_rewrites() {
        let plain = TransformedReference::new(origin());
        let mut rewritten = TransformedReference::new(origin());
        rewritten.add_property("location", "kitchen").unwrap();
        assert_eq!(plain, rewritten);
        assert_eq!(rewritten, origin());
    }

    #[test]
    fn ordering_uses_overridden_ranking() {
        let a = TransformedReference::new(ServiceReference::new(
            ServiceId(1),
            PropertyMap::new().with(SERVICE_RANKING, 0i64),
        ));
        let mut b = TransformedReference::new(ServiceReference::new(
            ServiceId(2),
            PropertyMap::new().with(SERVICE_RANKING, 0i64),
        ));
        assert!(a < b); // same rank, older id wins
        b.add_property(SERVICE_RANKING, 10i64).unwrap();
        assert!(b < a);
    }

    #[test]
    fn strict_equality_detects_property_changes() {
        let a = TransformedReference::new(origin());
        let b = TransformedReference::new(origin());
        assert!(strictly_equal(&a, &b));

        let mut c = TransformedReference::new(origin());
        c.add_property("location", "kitchen").unwrap();
        assert!(!strictly_equal(&a, &c));

        let mut d = TransformedReference::new(origin());
        d.add_property("lang", "fr").unwrap();
        assert!(!strictly_equal(&a, &d));

        let mut e = TransformedReference::new(origin());
        e.remove_property("hidden").unwrap();
        assert!(!strictly_equal(&a, &e));
    }

    #[test]
    fn effective_properties_materialise_the_view() {
        let mut view = TransformedReference::new(origin());
        view.add_property("location", "kitchen").unwrap();
        view.remove_property("hidden").unwrap();
        let props = view.effective_properties();
        assert_eq!(props.get("location").and_then(|v| v.as_str()), Some("kitchen"));
        assert!(props.get("hidden").is_none());
        assert_eq!(props.get(SERVICE_ID).and_then(|v| v.as_int()), Some(1));
    }
}
