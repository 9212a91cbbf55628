//! Pluggable transforms over the matching and selected sets.
//!
//! Two distinct capabilities exist. A [`TrackingInterceptor`] gates and
//! rewrites references on their way into the matching set; interceptors
//! compose into an ordered chain applied left-to-right, and returning `None`
//! from `accept` drops the reference. A [`RankingInterceptor`] is the single
//! authority producing the selected set from the matching set; exactly one is
//! installed at any time.
//!
//! Third-party interceptors are discovered as registry services published
//! under [`TRACKING_INTERCEPTOR_INTERFACE`] / [`RANKING_INTERCEPTOR_INTERFACE`]
//! through the downcastable wrapper types [`TrackingInterceptorService`] and
//! [`RankingInterceptorService`], and are attached only to dependencies whose
//! identity satisfies the interceptor's `target` LDAP property.

mod ranking;
mod tracking;

pub use ranking::{ComparatorRanking, NaturalOrderRanking, OsgiRankingComparator, ReferenceComparator};
pub use tracking::{DefaultTrackingInterceptor, FilterTrackingInterceptor};

use std::sync::Arc;

use tracing::warn;

use crate::component::ServicePayload;
use crate::description::DependencyDescription;
use crate::ldap::LdapFilter;
use crate::properties::TARGET;
use crate::reference::ServiceReference;
use crate::transformed::TransformedReference;

/// Interface name tracking interceptors are published under.
pub const TRACKING_INTERCEPTOR_INTERFACE: &str = "rivet.interceptor.tracking";
/// Interface name ranking interceptors are published under.
pub const RANKING_INTERCEPTOR_INTERFACE: &str = "rivet.interceptor.ranking";

/// Gates and rewrites references entering the matching set.
///
/// `accept` receives the view produced by the preceding interceptor in the
/// chain; views compose left-to-right. Lifecycle hooks (`open`/`close`) and
/// service-object hooks (`get_service`/`unget_service`) are never invoked
/// with a dependency lock held.
pub trait TrackingInterceptor: Send + Sync {
    /// The interceptor was attached to a dependency.
    fn open(&self, _dependency: &DependencyDescription) {}

    /// Accept, transform, or drop a reference. `None` drops it and
    /// interrupts the chain.
    fn accept(
        &self,
        dependency: &DependencyDescription,
        reference: TransformedReference,
    ) -> Option<TransformedReference>;

    /// The interceptor was detached from a dependency.
    fn close(&self, _dependency: &DependencyDescription) {}

    /// A service object was borrowed; the interceptor may proxy or decorate
    /// it.
    fn get_service(
        &self,
        _dependency: &DependencyDescription,
        service: ServicePayload,
        _reference: &TransformedReference,
    ) -> ServicePayload {
        service
    }

    /// A service object was released. `last_use` is `true` when the release
    /// dropped the final borrow of the reference.
    fn unget_service(
        &self,
        _dependency: &DependencyDescription,
        _last_use: bool,
        _reference: &TransformedReference,
    ) {
    }
}

/// Produces the selected set from the matching set.
///
/// Every method must return a stable permutation of (a subset of) `matching`.
pub trait RankingInterceptor: Send + Sync {
    /// The interceptor was attached to a dependency.
    fn open(&self, _dependency: &DependencyDescription) {}

    /// Ranks the whole matching set.
    fn get_service_references(
        &self,
        dependency: &DependencyDescription,
        matching: &[TransformedReference],
    ) -> Vec<TransformedReference>;

    /// A reference arrived in the matching set.
    fn on_service_arrival(
        &self,
        dependency: &DependencyDescription,
        matching: &[TransformedReference],
        _arrival: &TransformedReference,
    ) -> Vec<TransformedReference> {
        self.get_service_references(dependency, matching)
    }

    /// A reference left the matching set.
    fn on_service_departure(
        &self,
        dependency: &DependencyDescription,
        matching: &[TransformedReference],
        _departure: &TransformedReference,
    ) -> Vec<TransformedReference> {
        self.get_service_references(dependency, matching)
    }

    /// A reference in the matching set changed.
    fn on_service_modified(
        &self,
        dependency: &DependencyDescription,
        matching: &[TransformedReference],
        _modified: &TransformedReference,
    ) -> Vec<TransformedReference> {
        self.get_service_references(dependency, matching)
    }

    /// The interceptor was detached from a dependency.
    fn close(&self, _dependency: &DependencyDescription) {}
}

/// Registry payload wrapper for publishing a [`TrackingInterceptor`].
///
/// Registry payloads are type-erased; publishing through this concrete
/// wrapper lets the resolver downcast the service object back to the
/// interceptor.
pub struct TrackingInterceptorService(pub Arc<dyn TrackingInterceptor>);

/// Registry payload wrapper for publishing a [`RankingInterceptor`].
pub struct RankingInterceptorService(pub Arc<dyn RankingInterceptor>);

/// Does an interceptor registration target the given dependency?
///
/// A missing `target` property attaches the interceptor to every dependency;
/// an unparsable one attaches it to none.
pub(crate) fn matches_target(
    reference: &ServiceReference,
    description: &DependencyDescription,
) -> bool {
    let Some(value) = reference.property(TARGET) else {
        return true;
    };
    let Some(text) = value.as_str() else {
        warn!(id = %reference.id(), "interceptor target property is not a string");
        return false;
    };
    match LdapFilter::parse(text) {
        Ok(filter) => filter.matches(&description.properties()),
        Err(error) => {
            warn!(id = %reference.id(), %error, "ignoring interceptor with malformed target");
            false
        }
    }
}
