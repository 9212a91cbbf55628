//! In-memory [`Registry`] implementation.
//!
//! The reference registry used by the test suites and demos: monotonic
//! `service.id` assignment, synchronous listener dispatch (outside the
//! registry lock), and per-reference borrow counting.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::BindResult;
use crate::ldap::LdapFilter;
use crate::properties::{PropertyMap, OBJECTCLASS};
use crate::reference::{ServiceId, ServiceReference};
use crate::registry::{
    ListenerId, Registry, ServiceEvent, ServiceEventKind, ServiceListener, ServiceObject,
};

/// An in-memory service registry.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use rivet::{InMemoryRegistry, PropertyMap, Registry, ServiceObject};
///
/// let registry = InMemoryRegistry::new();
/// let payload: Arc<dyn std::any::Any + Send + Sync> = Arc::new("hello".to_string());
/// let reg = registry.register(
///     &["org.example.Greeter"],
///     PropertyMap::new().with("lang", "en"),
///     ServiceObject::Instance(payload),
/// );
///
/// let found = registry.get_service_reference("org.example.Greeter").unwrap();
/// assert_eq!(found.id(), reg.reference().id());
/// reg.unregister();
/// assert!(registry.get_service_reference("org.example.Greeter").is_none());
/// ```
pub struct InMemoryRegistry {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    services: BTreeMap<ServiceId, Registered>,
    listeners: Vec<ListenerEntry>,
    next_service_id: i64,
    next_listener_id: u64,
}

struct Registered {
    reference: ServiceReference,
    object: ServiceObject,
    borrows: usize,
}

struct ListenerEntry {
    id: ListenerId,
    filter: Option<LdapFilter>,
    listener: Arc<dyn ServiceListener>,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(InMemoryRegistry {
            state: Mutex::new(State::default()),
        })
    }

    /// Registers a service under the given interface names.
    ///
    /// The returned handle updates properties (firing `Modified`) and
    /// unregisters (firing `Unregistering`). Dropping the handle does *not*
    /// unregister the service.
    pub fn register(
        self: &Arc<Self>,
        interfaces: &[&str],
        properties: PropertyMap,
        object: ServiceObject,
    ) -> ServiceRegistration {
        let classes: Vec<String> = interfaces.iter().map(|s| s.to_string()).collect();
        let (reference, plan) = {
            let mut state = self.state.lock();
            let id = ServiceId(state.next_service_id);
            state.next_service_id += 1;
            let reference =
                ServiceReference::new(id, properties.with(OBJECTCLASS, classes.clone()));
            state.services.insert(
                id,
                Registered {
                    reference: reference.clone(),
                    object,
                    borrows: 0,
                },
            );
            let plan = state.dispatch_plan(&reference);
            (reference, plan)
        };
        deliver(
            plan,
            ServiceEvent {
                kind: ServiceEventKind::Registered,
                reference: reference.clone(),
            },
        );
        ServiceRegistration {
            registry: Arc::downgrade(self),
            reference: Mutex::new(reference),
            interfaces: classes,
        }
    }

    fn update_properties(&self, id: ServiceId, properties: PropertyMap, classes: &[String]) -> Option<ServiceReference> {
        let (reference, plan) = {
            let mut state = self.state.lock();
            let record = state.services.get_mut(&id)?;
            let reference =
                ServiceReference::new(id, properties.with(OBJECTCLASS, classes.to_vec()));
            record.reference = reference.clone();
            let plan = state.dispatch_plan(&reference);
            (reference, plan)
        };
        deliver(
            plan,
            ServiceEvent {
                kind: ServiceEventKind::Modified,
                reference: reference.clone(),
            },
        );
        Some(reference)
    }

    fn remove(&self, id: ServiceId) {
        let removed = {
            let mut state = self.state.lock();
            state.services.remove(&id).map(|record| {
                let plan = state.dispatch_plan(&record.reference);
                (record.reference, plan)
            })
        };
        if let Some((reference, plan)) = removed {
            deliver(
                plan,
                ServiceEvent {
                    kind: ServiceEventKind::Unregistering,
                    reference,
                },
            );
        }
    }

    fn references_matching(
        &self,
        interface: Option<&str>,
        filter: Option<&LdapFilter>,
    ) -> Vec<ServiceReference> {
        let state = self.state.lock();
        let mut refs: Vec<ServiceReference> = state
            .services
            .values()
            .filter(|record| {
                interface
                    .map(|interface| provides(&record.reference, interface))
                    .unwrap_or(true)
            })
            .filter(|record| {
                filter
                    .map(|f| f.matches(record.reference.properties()))
                    .unwrap_or(true)
            })
            .map(|record| record.reference.clone())
            .collect();
        refs.sort();
        refs
    }
}

impl State {
    /// Snapshots the listeners interested in a reference so they can be
    /// notified after the lock is released.
    fn dispatch_plan(&self, reference: &ServiceReference) -> Vec<Arc<dyn ServiceListener>> {
        self.listeners
            .iter()
            .filter(|entry| {
                entry
                    .filter
                    .as_ref()
                    .map(|f| f.matches(reference.properties()))
                    .unwrap_or(true)
            })
            .map(|entry| entry.listener.clone())
            .collect()
    }
}

fn deliver(plan: Vec<Arc<dyn ServiceListener>>, event: ServiceEvent) {
    for listener in plan {
        listener.service_changed(&event);
    }
}

fn provides(reference: &ServiceReference, interface: &str) -> bool {
    reference
        .property(OBJECTCLASS)
        .and_then(|v| v.as_str_list())
        .map(|classes| classes.iter().any(|c| c == interface))
        .unwrap_or(false)
}

impl Registry for InMemoryRegistry {
    fn add_service_listener(
        &self,
        listener: Arc<dyn ServiceListener>,
        filter: Option<&str>,
    ) -> BindResult<ListenerId> {
        let filter = filter.map(LdapFilter::parse).transpose()?;
        let mut state = self.state.lock();
        let id = ListenerId(state.next_listener_id);
        state.next_listener_id += 1;
        state.listeners.push(ListenerEntry {
            id,
            filter,
            listener,
        });
        Ok(id)
    }

    fn remove_service_listener(&self, id: ListenerId) {
        self.state.lock().listeners.retain(|entry| entry.id != id);
    }

    fn get_service_reference(&self, interface: &str) -> Option<ServiceReference> {
        self.references_matching(Some(interface), None)
            .into_iter()
            .next()
    }

    fn get_service_references(
        &self,
        interface: &str,
        filter: Option<&str>,
    ) -> BindResult<Vec<ServiceReference>> {
        let filter = filter.map(LdapFilter::parse).transpose()?;
        Ok(self.references_matching(Some(interface), filter.as_ref()))
    }

    fn get_all_service_references(
        &self,
        interface: Option<&str>,
        filter: Option<&str>,
    ) -> BindResult<Vec<ServiceReference>> {
        let filter = filter.map(LdapFilter::parse).transpose()?;
        Ok(self.references_matching(interface, filter.as_ref()))
    }

    fn get_service(&self, reference: &ServiceReference) -> Option<ServiceObject> {
        let mut state = self.state.lock();
        let record = state.services.get_mut(&reference.id())?;
        record.borrows += 1;
        Some(record.object.clone())
    }

    fn unget_service(&self, reference: &ServiceReference) -> bool {
        let mut state = self.state.lock();
        match state.services.get_mut(&reference.id()) {
            Some(record) if record.borrows > 0 => {
                record.borrows -= 1;
                true
            }
            _ => false,
        }
    }
}

/// Handle to a live registration in an [`InMemoryRegistry`].
pub struct ServiceRegistration {
    registry: Weak<InMemoryRegistry>,
    reference: Mutex<ServiceReference>,
    interfaces: Vec<String>,
}

impl ServiceRegistration {
    /// The current reference of this registration.
    pub fn reference(&self) -> ServiceReference {
        self.reference.lock().clone()
    }

    /// The identity of the registration.
    pub fn id(&self) -> ServiceId {
        self.reference.lock().id()
    }

    /// Replaces the service properties, firing a `Modified` event. The
    /// interface list and `service.id` are preserved.
    pub fn set_properties(&self, properties: PropertyMap) {
        if let Some(registry) = self.registry.upgrade() {
            let id = self.id();
            if let Some(reference) = registry.update_properties(id, properties, &self.interfaces) {
                *self.reference.lock() = reference;
            }
        }
    }

    /// Unregisters the service, firing an `Unregistering` event. Idempotent.
    pub fn unregister(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id());
        }
    }
}
