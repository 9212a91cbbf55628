//! The service registry interface consumed by the resolver.
//!
//! The registry itself is an external collaborator: it owns service
//! registrations, evaluates listener filters, and hands out service objects.
//! The resolver only depends on the small surface below, so any framework
//! registry can be adapted. [`crate::InMemoryRegistry`] is the reference
//! implementation used by the tests and demos.

use std::fmt;
use std::sync::Arc;

use crate::component::{ComponentHandle, ServiceObjectFactory, ServicePayload};
use crate::error::BindResult;
use crate::reference::ServiceReference;

/// A registered service payload: either a shared object or a per-consumer
/// factory.
#[derive(Clone)]
pub enum ServiceObject {
    /// One object shared by every consumer.
    Instance(ServicePayload),
    /// A factory producing one object per consuming component instance.
    Factory(Arc<dyn ServiceObjectFactory>),
}

impl ServiceObject {
    /// Resolves the payload a specific consumer should see.
    pub fn resolve(&self, instance: &dyn ComponentHandle) -> ServicePayload {
        match self {
            ServiceObject::Instance(payload) => payload.clone(),
            ServiceObject::Factory(factory) => factory.get_service(instance),
        }
    }

    /// Is this a per-consumer factory?
    pub fn is_factory(&self) -> bool {
        matches!(self, ServiceObject::Factory(_))
    }
}

impl fmt::Debug for ServiceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceObject::Instance(_) => f.write_str("ServiceObject::Instance"),
            ServiceObject::Factory(_) => f.write_str("ServiceObject::Factory"),
        }
    }
}

/// Kind of a registry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEventKind {
    /// A service was registered.
    Registered,
    /// The properties of a registered service changed.
    Modified,
    /// A service is being unregistered.
    Unregistering,
}

/// A registry event delivered to service listeners.
#[derive(Debug, Clone)]
pub struct ServiceEvent {
    /// What happened.
    pub kind: ServiceEventKind,
    /// The reference the event is about.
    pub reference: ServiceReference,
}

/// Observer of registry events.
///
/// Events may be delivered on arbitrary threads; implementations must be
/// prepared for concurrent delivery of events about *different* references.
/// Events about a single reference are delivered in causal order.
pub trait ServiceListener: Send + Sync {
    /// A registry event occurred.
    fn service_changed(&self, event: &ServiceEvent);
}

/// Opaque handle identifying a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// A dynamic registry of service providers.
///
/// Filters are LDAP expressions evaluated against the property map of each
/// reference (never against the reference handle itself; some registry
/// implementations expose composite references whose native match entry
/// points are unusable).
pub trait Registry: Send + Sync {
    /// Subscribes a listener, optionally filtered by an LDAP expression over
    /// the reference properties.
    fn add_service_listener(
        &self,
        listener: Arc<dyn ServiceListener>,
        filter: Option<&str>,
    ) -> BindResult<ListenerId>;

    /// Removes a previously registered listener. Unknown ids are ignored.
    fn remove_service_listener(&self, id: ListenerId);

    /// The best reference currently published under the interface, by the
    /// natural ordering, or `None`.
    fn get_service_reference(&self, interface: &str) -> Option<ServiceReference>;

    /// All references published under the interface and matching the filter.
    fn get_service_references(
        &self,
        interface: &str,
        filter: Option<&str>,
    ) -> BindResult<Vec<ServiceReference>>;

    /// All references matching the filter, regardless of visibility rules;
    /// `interface` of `None` spans every registration.
    fn get_all_service_references(
        &self,
        interface: Option<&str>,
        filter: Option<&str>,
    ) -> BindResult<Vec<ServiceReference>>;

    /// Borrows the service object behind a reference. Returns `None` when the
    /// registration is gone.
    fn get_service(&self, reference: &ServiceReference) -> Option<ServiceObject>;

    /// Releases one borrow. Returns `true` when a borrow was actually
    /// released.
    fn unget_service(&self, reference: &ServiceReference) -> bool;
}
