//! Intercepting façade over the registry.
//!
//! Component code resolving services by hand (instead of through injected
//! bindings) goes through an [`InterceptableContext`], so the tracking
//! interceptors attached to the dependency also shape what raw queries and
//! listeners see: references are wrapped as transformed views, run through
//! the accept chain, and only the accepted ones surface.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::component::ServicePayload;
use crate::dependency::DependencyModel;
use crate::error::BindResult;
use crate::reference::ServiceReference;
use crate::registry::{ListenerId, Registry, ServiceEvent, ServiceEventKind, ServiceListener};
use crate::transformed::TransformedReference;

/// A service event as seen through the interceptor chain.
#[derive(Debug, Clone)]
pub struct WrappedServiceEvent {
    kind: ServiceEventKind,
    reference: TransformedReference,
}

impl WrappedServiceEvent {
    /// What happened.
    pub fn kind(&self) -> ServiceEventKind {
        self.kind
    }

    /// The transformed view of the reference.
    pub fn reference(&self) -> &TransformedReference {
        &self.reference
    }

    /// The registry-native reference.
    pub fn original_reference(&self) -> &ServiceReference {
        self.reference.initial_reference()
    }
}

/// Observer of registry events filtered through a dependency's interceptor
/// chain.
pub trait ContextServiceListener: Send + Sync {
    /// An accepted registry event occurred.
    fn service_changed(&self, event: &WrappedServiceEvent);
}

/// Filters every registry event through the dependency's accept chain before
/// forwarding it.
struct AcceptGuard {
    dependency: Weak<DependencyModel>,
    listener: Arc<dyn ContextServiceListener>,
}

impl ServiceListener for AcceptGuard {
    fn service_changed(&self, event: &ServiceEvent) {
        let Some(dependency) = self.dependency.upgrade() else {
            return;
        };
        let view = TransformedReference::new(event.reference.clone());
        if let Some(accepted) = dependency.accept_view(view) {
            self.listener.service_changed(&WrappedServiceEvent {
                kind: event.kind,
                reference: accepted,
            });
        }
    }
}

struct GuardRegistration {
    id: ListenerId,
    listener: Arc<dyn ContextServiceListener>,
}

/// Registry façade bound to one dependency.
///
/// Created through
/// [`InterceptableContext::new`] from a started or unstarted dependency; the
/// context holds no strong reference to it.
pub struct InterceptableContext {
    registry: Arc<dyn Registry>,
    dependency: Weak<DependencyModel>,
    guards: Mutex<Vec<GuardRegistration>>,
}

impl InterceptableContext {
    /// Creates a context over the dependency's registry.
    pub fn new(dependency: &Arc<DependencyModel>) -> Self {
        InterceptableContext {
            registry: dependency.registry(),
            dependency: Arc::downgrade(dependency),
            guards: Mutex::new(Vec::new()),
        }
    }

    fn accept(&self, reference: ServiceReference) -> Option<TransformedReference> {
        let dependency = self.dependency.upgrade()?;
        dependency.accept_view(TransformedReference::new(reference))
    }

    /// The best accepted reference under the interface, or `None`.
    pub fn get_service_reference(&self, interface: &str) -> Option<TransformedReference> {
        // The best *accepted* reference may not be the registry's best.
        self.get_service_references(interface, None)
            .ok()
            .and_then(|refs| refs.into_iter().next())
    }

    /// The accepted references under the interface matching the filter.
    pub fn get_service_references(
        &self,
        interface: &str,
        filter: Option<&str>,
    ) -> BindResult<Vec<TransformedReference>> {
        let references = self.registry.get_service_references(interface, filter)?;
        Ok(references
            .into_iter()
            .filter_map(|reference| self.accept(reference))
            .collect())
    }

    /// The accepted references matching the filter, spanning every interface
    /// when `interface` is `None`.
    pub fn get_all_service_references(
        &self,
        interface: Option<&str>,
        filter: Option<&str>,
    ) -> BindResult<Vec<TransformedReference>> {
        let references = self.registry.get_all_service_references(interface, filter)?;
        Ok(references
            .into_iter()
            .filter_map(|reference| self.accept(reference))
            .collect())
    }

    /// Borrows a service object, unwrapping the transformed reference to the
    /// registry-native one and running the chain's `get_service` hooks.
    pub fn get_service(&self, reference: &TransformedReference) -> Option<ServicePayload> {
        let payload = self
            .registry
            .get_service(reference.initial_reference())?;
        let dependency = self.dependency.upgrade()?;
        let resolved = payload.resolve(&*dependency.component_instance());
        Some(dependency.decorate_service(resolved, reference))
    }

    /// Releases a borrow taken through [`get_service`](Self::get_service).
    pub fn unget_service(&self, reference: &TransformedReference) -> bool {
        self.registry.unget_service(reference.initial_reference())
    }

    /// Subscribes a listener behind an accept guard: only events whose
    /// reference passes the chain are forwarded, carrying the transformed
    /// view.
    pub fn add_service_listener(
        &self,
        listener: Arc<dyn ContextServiceListener>,
        filter: Option<&str>,
    ) -> BindResult<()> {
        let guard = Arc::new(AcceptGuard {
            dependency: self.dependency.clone(),
            listener: listener.clone(),
        });
        let id = self.registry.add_service_listener(guard, filter)?;
        self.guards.lock().push(GuardRegistration { id, listener });
        Ok(())
    }

    /// Unsubscribes a listener. Unknown listeners are ignored.
    pub fn remove_service_listener(&self, listener: &Arc<dyn ContextServiceListener>) {
        let removed: Vec<ListenerId> = {
            let mut guards = self.guards.lock();
            let mut ids = Vec::new();
            guards.retain(|guard| {
                if Arc::ptr_eq(&guard.listener, listener) {
                    ids.push(guard.id);
                    false
                } else {
                    true
                }
            });
            ids
        };
        for id in removed {
            self.registry.remove_service_listener(id);
        }
    }
}

impl Drop for InterceptableContext {
    fn drop(&mut self) {
        for guard in self.guards.lock().drain(..) {
            self.registry.remove_service_listener(guard.id);
        }
    }
}
