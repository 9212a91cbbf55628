//! The per-dependency state machine and policy layer.
//!
//! A [`DependencyModel`] watches one service specification through a
//! [`RegistryTracker`], delegates set computation to the
//! [`SelectedServicesManager`](crate::manager::SelectedServicesManager), and
//! reconciles the bound set against the binding policy whenever a
//! [`ChangeSet`] arrives. Listener callbacks, interceptor lifecycle hooks,
//! and instance restarts always run outside the model's lock: every entry
//! point mutates under the write lock, snapshots the callback plan into
//! locals, releases, and only then calls out.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::component::{ComponentHandle, ServicePayload};
use crate::description::DependencyDescription;
use crate::error::{BindError, BindResult};
use crate::interceptors::{
    matches_target, OsgiRankingComparator, RankingInterceptor, RankingInterceptorService,
    ReferenceComparator, TrackingInterceptor, TrackingInterceptorService,
    RANKING_INTERCEPTOR_INTERFACE, TRACKING_INTERCEPTOR_INTERFACE,
};
use crate::ldap::LdapFilter;
use crate::manager::{run_accept_chain, ChangeSet, SelectedServicesManager};
use crate::reference::{ServiceId, ServiceReference};
use crate::registry::{Registry, ServiceObject};
use crate::tracker::{RegistryTracker, TrackerCustomizer};
use crate::transformed::TransformedReference;

/// How a dependency reacts to providers coming and going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingPolicy {
    /// Providers may be rebound freely while the current one is not in use.
    Dynamic,
    /// Losing a bound provider breaks the dependency; the instance must be
    /// recreated.
    Static,
    /// Any better provider is re-injected immediately, even mid-use.
    DynamicPriority,
}

impl BindingPolicy {
    /// Parses a policy literal: `dynamic`, `static` or `dynamic-priority`
    /// (case-insensitive).
    pub fn parse(literal: &str) -> BindResult<BindingPolicy> {
        if literal.eq_ignore_ascii_case("dynamic") {
            Ok(BindingPolicy::Dynamic)
        } else if literal.eq_ignore_ascii_case("static") {
            Ok(BindingPolicy::Static)
        } else if literal.eq_ignore_ascii_case("dynamic-priority") {
            Ok(BindingPolicy::DynamicPriority)
        } else {
            Err(BindError::UnknownPolicy(literal.to_string()))
        }
    }

    /// The configuration literal of the policy.
    pub fn as_str(self) -> &'static str {
        match self {
            BindingPolicy::Dynamic => "dynamic",
            BindingPolicy::Static => "static",
            BindingPolicy::DynamicPriority => "dynamic-priority",
        }
    }
}

impl Default for BindingPolicy {
    fn default() -> Self {
        BindingPolicy::Dynamic
    }
}

/// State of a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyState {
    /// Not optional and no matching provider.
    Unresolved,
    /// Optional, or at least one matching provider.
    Resolved,
    /// A bound provider left under the static policy. Terminal until the
    /// dependency is stopped and started again.
    Broken,
}

impl DependencyState {
    /// Numeric state code, as exposed in targeting properties.
    pub fn code(self) -> i64 {
        match self {
            DependencyState::Broken => -1,
            DependencyState::Unresolved => 0,
            DependencyState::Resolved => 1,
        }
    }
}

/// Receiver of dependency lifecycle and binding events.
///
/// Callbacks are never invoked while the model holds a lock, so
/// implementations may freely call back into the dependency (a `validate`
/// callback typically reads the bound set).
pub trait DependencyListener: Send + Sync {
    /// The dependency became resolved.
    fn validate(&self, dependency: &DependencyModel);

    /// The dependency became unresolved or broken.
    fn invalidate(&self, dependency: &DependencyModel);

    /// A reference was bound.
    fn on_service_arrival(&self, reference: &TransformedReference);

    /// A bound reference was unbound.
    fn on_service_departure(&self, reference: &TransformedReference);

    /// A bound reference changed its properties.
    fn on_service_modification(&self, reference: &TransformedReference);

    /// A reconfiguration changed the matching set.
    fn on_dependency_reconfiguration(
        &self,
        _departures: &[TransformedReference],
        _arrivals: &[TransformedReference],
    ) {
    }
}

struct CachedService {
    object: ServiceObject,
    payload: ServicePayload,
}

struct Inner {
    aggregate: bool,
    optional: bool,
    frozen: bool,
    /// Set while `stop()` drains the trackers so synthesized departures do
    /// not break a static dependency that is going away anyway.
    stopping: bool,
    state: DependencyState,
    /// References currently injected in the component, in selection order.
    bound: Vec<TransformedReference>,
    /// Borrowed service objects, released on unbind or stop.
    service_objects: HashMap<ServiceId, CachedService>,
    manager: SelectedServicesManager,
}

#[derive(Default)]
struct Trackers {
    main: Option<Arc<RegistryTracker>>,
    tracking_interceptors: Option<Arc<RegistryTracker>>,
    ranking_interceptors: Option<Arc<RegistryTracker>>,
}

/// A service dependency of a component instance.
///
/// Create one through [`DependencyBuilder`], then [`start`](Self::start) it to
/// open tracking. See the crate documentation for a complete example.
pub struct DependencyModel {
    listener: Arc<dyn DependencyListener>,
    instance: Arc<dyn ComponentHandle>,
    id: Option<String>,
    registry: RwLock<Arc<dyn Registry>>,
    specification: RwLock<String>,
    policy: RwLock<BindingPolicy>,
    inner: RwLock<Inner>,
    trackers: Mutex<Trackers>,
}

impl DependencyModel {
    fn new(
        registry: Arc<dyn Registry>,
        instance: Arc<dyn ComponentHandle>,
        listener: Arc<dyn DependencyListener>,
        specification: String,
        id: Option<String>,
        aggregate: bool,
        optional: bool,
        filter: Option<LdapFilter>,
        comparator: Option<Arc<dyn ReferenceComparator>>,
        policy: BindingPolicy,
    ) -> Arc<DependencyModel> {
        Arc::new(DependencyModel {
            listener,
            instance,
            id,
            registry: RwLock::new(registry),
            specification: RwLock::new(specification),
            policy: RwLock::new(policy),
            inner: RwLock::new(Inner {
                aggregate,
                optional,
                frozen: false,
                stopping: false,
                state: DependencyState::Unresolved,
                bound: Vec::new(),
                service_objects: HashMap::new(),
                manager: SelectedServicesManager::new(filter, comparator),
            }),
            trackers: Mutex::new(Trackers::default()),
        })
    }

    /// The dependency id: the specification name unless configured otherwise.
    pub fn id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| self.specification.read().clone())
    }

    /// The tracked service specification.
    pub fn specification(&self) -> String {
        self.specification.read().clone()
    }

    /// The binding policy.
    pub fn binding_policy(&self) -> BindingPolicy {
        *self.policy.read()
    }

    /// The current state.
    pub fn state(&self) -> DependencyState {
        self.inner.read().state
    }

    /// Does the dependency bind several providers?
    pub fn is_aggregate(&self) -> bool {
        self.inner.read().aggregate
    }

    /// Is the dependency satisfied without any provider?
    pub fn is_optional(&self) -> bool {
        self.inner.read().optional
    }

    /// Is tracking open?
    pub fn is_started(&self) -> bool {
        self.trackers.lock().main.is_some()
    }

    /// The configured filter, in source form.
    pub fn filter(&self) -> Option<String> {
        self.inner
            .read()
            .manager
            .filter()
            .map(|f| f.as_str().to_string())
    }

    /// The configured comparator, if any.
    pub fn comparator(&self) -> Option<Arc<dyn ReferenceComparator>> {
        self.inner.read().manager.comparator()
    }

    /// The bound references, in selection order.
    pub fn bound(&self) -> Vec<TransformedReference> {
        self.inner.read().bound.clone()
    }

    /// The first bound reference.
    pub fn first_bound(&self) -> Option<TransformedReference> {
        self.inner.read().bound.first().cloned()
    }

    /// Number of bound references.
    pub fn size(&self) -> usize {
        self.inner.read().bound.len()
    }

    /// The matching set.
    pub fn matching(&self) -> Vec<TransformedReference> {
        self.inner.read().manager.matching()
    }

    /// The selected set, in ranking order.
    pub fn selected(&self) -> Vec<TransformedReference> {
        self.inner.read().manager.selected()
    }

    /// Bound references whose service object is currently borrowed. A scalar
    /// dependency reports at most its first bound reference.
    pub fn used_references(&self) -> Vec<TransformedReference> {
        let inner = self.inner.read();
        let mut used: Vec<TransformedReference> = inner
            .bound
            .iter()
            .filter(|r| inner.service_objects.contains_key(&r.id()))
            .cloned()
            .collect();
        if !inner.aggregate {
            used.truncate(1);
        }
        used
    }

    /// Stops admitting new references at the tracker gate.
    pub fn freeze(&self) {
        self.inner.write().frozen = true;
    }

    /// Re-admits references after a freeze.
    pub fn unfreeze(&self) {
        self.inner.write().frozen = false;
    }

    /// Is the reference set frozen?
    pub fn is_frozen(&self) -> bool {
        self.inner.read().frozen
    }

    /// A snapshot of the dependency identity, as interceptors see it.
    pub fn description(&self) -> DependencyDescription {
        let state = self.inner.read().state;
        DependencyDescription {
            id: self.id(),
            specification: self.specification.read().clone(),
            state,
            instance_name: self.instance.instance_name().to_string(),
            instance_state: self.instance.instance_state(),
            factory_name: self.instance.factory_name().to_string(),
            bundle_symbolic_name: self.instance.bundle_symbolic_name().to_string(),
            bundle_version: self.instance.bundle_version().to_string(),
        }
    }

    /// The component instance owning this dependency.
    pub fn component_instance(&self) -> Arc<dyn ComponentHandle> {
        self.instance.clone()
    }

    pub(crate) fn registry(&self) -> Arc<dyn Registry> {
        self.registry.read().clone()
    }

    fn main_tracker(&self) -> Option<Arc<RegistryTracker>> {
        self.trackers.lock().main.clone()
    }

    fn tracked_snapshot(&self) -> Vec<ServiceReference> {
        self.main_tracker()
            .map(|t| t.current())
            .unwrap_or_default()
    }

    // ---------------------------------------------------------------------
    // Lifecycle

    /// Opens tracking: interceptor discovery first, then the specification
    /// tracker, then an initial state computation.
    pub fn start(self: &Arc<Self>) -> BindResult<()> {
        if self.is_started() {
            return Ok(());
        }
        self.inner.write().state = DependencyState::Unresolved;
        let registry = self.registry();

        let tracking_host = Arc::new(TrackingInterceptorHost {
            dependency: Arc::downgrade(self),
            tracker: OnceLock::new(),
        });
        let tracking_tracker = RegistryTracker::new(
            registry.clone(),
            TRACKING_INTERCEPTOR_INTERFACE,
            tracking_host.clone(),
        );
        let _ = tracking_host.tracker.set(tracking_tracker.clone());

        let ranking_host = Arc::new(RankingInterceptorHost {
            dependency: Arc::downgrade(self),
            tracker: OnceLock::new(),
        });
        let ranking_tracker = RegistryTracker::new(
            registry.clone(),
            RANKING_INTERCEPTOR_INTERFACE,
            ranking_host.clone(),
        );
        let _ = ranking_host.tracker.set(ranking_tracker.clone());

        let main = RegistryTracker::new(
            registry,
            self.specification.read().clone(),
            self.clone() as Arc<dyn TrackerCustomizer>,
        );
        {
            let mut trackers = self.trackers.lock();
            trackers.main = Some(main.clone());
            trackers.tracking_interceptors = Some(tracking_tracker.clone());
            trackers.ranking_interceptors = Some(ranking_tracker.clone());
        }

        tracking_tracker.open()?;
        ranking_tracker.open()?;
        main.open()?;

        self.recompute_state();
        Ok(())
    }

    /// Closes tracking. Every tracked reference departs, every interceptor is
    /// closed, every borrowed service object is released, and the state
    /// returns to [`DependencyState::Unresolved`].
    pub fn stop(&self) {
        let trackers = {
            let mut trackers = self.trackers.lock();
            std::mem::take(&mut *trackers)
        };
        let Some(main) = trackers.main else {
            return;
        };
        self.inner.write().stopping = true;

        // Departures for every tracked reference flow through the normal
        // change protocol.
        main.close();
        if let Some(tracker) = trackers.tracking_interceptors {
            tracker.close();
        }
        if let Some(tracker) = trackers.ranking_interceptors {
            tracker.close();
        }

        let (chain, cached) = {
            let mut inner = self.inner.write();
            inner.bound.clear();
            inner.frozen = false;
            inner.stopping = false;
            inner.state = DependencyState::Unresolved;
            let (chain, _ranking) = inner.manager.clear();
            let cached: Vec<CachedService> =
                inner.service_objects.drain().map(|(_, v)| v).collect();
            (chain, cached)
        };
        let description = self.description();
        for interceptor in chain {
            interceptor.close(&description);
        }
        for service in cached {
            if let ServiceObject::Factory(factory) = &service.object {
                factory.unget_service(&*self.instance, service.payload.clone());
            }
        }
    }

    // ---------------------------------------------------------------------
    // Change propagation

    /// Reconciles the bound set against a selection change. This is the
    /// single entry point through which every set change reaches the
    /// component.
    pub fn on_change(&self, set: ChangeSet) {
        let policy = self.binding_policy();
        let mut fire_departures: Vec<TransformedReference> = Vec::new();
        let mut fire_arrivals: Vec<TransformedReference> = Vec::new();
        let mut fire_modified: Option<TransformedReference> = None;
        let mut state_change: Option<DependencyState> = None;
        let mut broken = false;
        {
            let mut inner = self.inner.write();

            // A bound provider leaving under the static policy breaks the
            // dependency; the instance is recreated and nothing else from
            // this change is reconciled.
            if policy == BindingPolicy::Static
                && inner.state != DependencyState::Broken
                && !inner.stopping
                && set.departures.iter().any(|r| inner.bound.contains(r))
            {
                inner.state = DependencyState::Broken;
                broken = true;
            }

            if !broken {
                for reference in &set.departures {
                    if let Some(idx) = inner.bound.iter().position(|b| b == reference) {
                        inner.bound.remove(idx);
                        fire_departures.push(reference.clone());
                    }
                }

                if inner.aggregate {
                    // When nothing is in use (or under dynamic-priority) the
                    // bindings mirror the selection order exactly.
                    if inner.service_objects.is_empty()
                        || policy == BindingPolicy::DynamicPriority
                    {
                        inner.bound = set.selected.clone();
                    }
                    for reference in &set.arrivals {
                        if !inner.bound.contains(reference) {
                            inner.bound.push(reference.clone());
                        }
                        fire_arrivals.push(reference.clone());
                    }
                } else if let Some(best) = set.selected.first() {
                    if inner.bound.is_empty() {
                        inner.bound.push(best.clone());
                        fire_arrivals.push(best.clone());
                    } else {
                        let current = inner.bound[0].clone();
                        let rebind = match policy {
                            BindingPolicy::DynamicPriority => current != *best,
                            // Only an unused binding may be switched.
                            _ => {
                                !inner.service_objects.contains_key(&current.id())
                                    && current != *best
                            }
                        };
                        if rebind {
                            inner.bound.clear();
                            inner.bound.push(best.clone());
                            fire_departures.push(current);
                            fire_arrivals.push(best.clone());
                        }
                    }
                }

                // Bindings that stayed selected pick up their current view,
                // so property rewrites reach the component.
                for binding in inner.bound.iter_mut() {
                    if let Some(current) = set.selected.iter().find(|s| s.id() == binding.id()) {
                        *binding = current.clone();
                    }
                }

                if inner.state != DependencyState::Broken {
                    let satisfied = inner.optional || !inner.manager.matching_is_empty();
                    if satisfied && inner.state == DependencyState::Unresolved {
                        inner.state = DependencyState::Resolved;
                        state_change = Some(DependencyState::Resolved);
                    } else if !satisfied && inner.state == DependencyState::Resolved {
                        inner.state = DependencyState::Unresolved;
                        state_change = Some(DependencyState::Unresolved);
                    }
                }

                if let Some(modified) = &set.modified {
                    if inner.bound.contains(modified) {
                        fire_modified = Some(modified.clone());
                    }
                }
            }
        }

        if broken {
            warn!(dependency = %self.id(), "static dependency broken, restarting the instance");
            self.listener.invalidate(self);
            self.instance.stop();
            self.unfreeze();
            self.instance.start();
            return;
        }

        for reference in &fire_departures {
            self.listener.on_service_departure(reference);
        }
        for reference in &fire_arrivals {
            self.listener.on_service_arrival(reference);
        }
        match state_change {
            Some(DependencyState::Resolved) => self.listener.validate(self),
            Some(DependencyState::Unresolved) => self.listener.invalidate(self),
            _ => {}
        }
        if let Some(modified) = &fire_modified {
            self.listener.on_service_modification(modified);
        }
    }

    fn recompute_state(&self) {
        let transition = {
            let mut inner = self.inner.write();
            if inner.state == DependencyState::Broken {
                None
            } else {
                let satisfied = inner.optional || !inner.manager.matching_is_empty();
                if satisfied && inner.state == DependencyState::Unresolved {
                    inner.state = DependencyState::Resolved;
                    Some(DependencyState::Resolved)
                } else if !satisfied && inner.state == DependencyState::Resolved {
                    inner.state = DependencyState::Unresolved;
                    Some(DependencyState::Unresolved)
                } else {
                    None
                }
            }
        };
        match transition {
            Some(DependencyState::Resolved) => self.listener.validate(self),
            Some(DependencyState::Unresolved) => self.listener.invalidate(self),
            _ => {}
        }
    }

    // ---------------------------------------------------------------------
    // Interceptor management

    /// Attaches a tracking interceptor at the head of the chain and replays
    /// the tracked set through the new chain.
    pub fn add_tracking_interceptor(&self, interceptor: Arc<dyn TrackingInterceptor>) {
        let description = self.description();
        interceptor.open(&description);
        let tracked = self.tracked_snapshot();
        let set = {
            let mut inner = self.inner.write();
            inner
                .manager
                .add_tracking_interceptor(&description, interceptor, &tracked)
        };
        debug!(dependency = %description.id, "tracking interceptor attached");
        self.on_change(set);
    }

    /// Detaches a tracking interceptor and replays the tracked set.
    pub fn remove_tracking_interceptor(&self, interceptor: &Arc<dyn TrackingInterceptor>) {
        let description = self.description();
        let tracked = self.tracked_snapshot();
        let set = {
            let mut inner = self.inner.write();
            inner
                .manager
                .remove_tracking_interceptor(&description, interceptor, &tracked)
        };
        if let Some(set) = set {
            interceptor.close(&description);
            debug!(dependency = %description.id, "tracking interceptor detached");
            self.on_change(set);
        }
    }

    /// Installs a ranking interceptor as the sole ranking authority.
    pub fn set_ranking_interceptor(&self, interceptor: Arc<dyn RankingInterceptor>) {
        let description = self.description();
        info!(dependency = %description.id, "dependency is getting a new ranking interceptor");
        interceptor.open(&description);
        let set = {
            let mut inner = self.inner.write();
            inner.manager.install_ranking(&description, interceptor)
        };
        self.on_change(set);
    }

    fn restore_default_ranking(&self) {
        let description = self.description();
        let set = {
            let mut inner = self.inner.write();
            inner.manager.restore_default_ranking(&description)
        };
        self.on_change(set);
    }

    fn ranking_is(&self, other: &Arc<dyn RankingInterceptor>) -> bool {
        Arc::ptr_eq(&self.inner.read().manager.ranking(), other)
    }

    // ---------------------------------------------------------------------
    // Service objects

    /// Borrows the service object behind a bound reference, running the
    /// tracking chain's `get_service` hooks so interceptors may proxy it.
    /// The borrow is cached for release on unbind or stop.
    pub fn get_service(&self, reference: &TransformedReference) -> Option<ServicePayload> {
        self.get_service_with_store(reference, true)
    }

    /// [`get_service`](Self::get_service) with control over caching.
    pub fn get_service_with_store(
        &self,
        reference: &TransformedReference,
        store: bool,
    ) -> Option<ServicePayload> {
        let tracker = self.main_tracker()?;
        let object = tracker.get_service(reference.initial_reference())?;
        let mut payload = object.resolve(&*self.instance);

        let description = self.description();
        let chain = self.inner.read().manager.chain_snapshot();
        for interceptor in &chain {
            let hooked = catch_unwind(AssertUnwindSafe(|| {
                interceptor.get_service(&description, payload.clone(), reference)
            }));
            match hooked {
                Ok(decorated) => payload = decorated,
                Err(_) => warn!(
                    dependency = %description.id,
                    "interceptor panicked in get_service; passing the object through"
                ),
            }
        }

        if store {
            self.inner.write().service_objects.insert(
                reference.id(),
                CachedService {
                    object,
                    payload: payload.clone(),
                },
            );
        }
        Some(payload)
    }

    /// Releases a borrowed service object: the cache entry first, then the
    /// registry borrow.
    pub fn unget_service(&self, reference: &TransformedReference) {
        let cached = self.inner.write().service_objects.remove(&reference.id());
        if let Some(cached) = cached {
            if let ServiceObject::Factory(factory) = &cached.object {
                factory.unget_service(&*self.instance, cached.payload.clone());
            }
        }
        if let Some(tracker) = self.main_tracker() {
            let last_use = tracker.unget_service(reference.initial_reference());
            let description = self.description();
            let chain = self.inner.read().manager.chain_snapshot();
            for interceptor in &chain {
                let _ = catch_unwind(AssertUnwindSafe(|| {
                    interceptor.unget_service(&description, last_use, reference)
                }));
            }
        }
    }

    pub(crate) fn accept_view(
        &self,
        reference: TransformedReference,
    ) -> Option<TransformedReference> {
        let description = self.description();
        let chain = self.inner.read().manager.chain_snapshot();
        run_accept_chain(&chain, &description, reference)
    }

    pub(crate) fn decorate_service(
        &self,
        mut payload: ServicePayload,
        reference: &TransformedReference,
    ) -> ServicePayload {
        let description = self.description();
        let chain = self.inner.read().manager.chain_snapshot();
        for interceptor in &chain {
            if let Ok(decorated) = catch_unwind(AssertUnwindSafe(|| {
                interceptor.get_service(&description, payload.clone(), reference)
            })) {
                payload = decorated;
            }
        }
        payload
    }

    // ---------------------------------------------------------------------
    // Reconfiguration

    /// Replaces the filter. The new filter is compiled before anything
    /// mutates, so a syntax error leaves the dependency untouched.
    pub fn set_filter(&self, filter: Option<&str>) -> BindResult<()> {
        let compiled = filter.map(LdapFilter::parse).transpose()?;
        let description = self.description();
        let tracked = if self.is_started() {
            Some(self.tracked_snapshot())
        } else {
            None
        };
        let set = {
            let mut inner = self.inner.write();
            inner
                .manager
                .set_filter(&description, compiled, tracked.as_deref())
        };
        if tracked.is_some() {
            self.apply_reconfiguration(set);
        }
        Ok(())
    }

    /// Replaces the comparator; `None` restores the natural order.
    pub fn set_comparator(&self, comparator: Option<Arc<dyn ReferenceComparator>>) {
        let description = self.description();
        let set = {
            let mut inner = self.inner.write();
            inner.manager.set_comparator(&description, comparator)
        };
        if self.is_started() {
            self.apply_reconfiguration(set);
        }
    }

    /// Changes the aggregate attribute. While started, becoming aggregate
    /// binds every selected-but-unbound reference and becoming scalar unbinds
    /// everything but the first binding.
    pub fn set_aggregate(&self, aggregate: bool) {
        if !self.is_started() {
            self.inner.write().aggregate = aggregate;
            return;
        }
        let mut arrivals: Vec<TransformedReference> = Vec::new();
        let mut departures: Vec<TransformedReference> = Vec::new();
        {
            let mut inner = self.inner.write();
            if inner.aggregate == aggregate {
                return;
            }
            inner.aggregate = aggregate;
            if inner.state == DependencyState::Resolved {
                if aggregate {
                    for reference in inner.manager.selected() {
                        if !inner.bound.contains(&reference) {
                            inner.bound.push(reference.clone());
                            arrivals.push(reference);
                        }
                    }
                } else {
                    while inner.bound.len() > 1 {
                        departures.push(inner.bound.remove(1));
                    }
                }
            }
        }
        for reference in &departures {
            self.listener.on_service_departure(reference);
        }
        for reference in &arrivals {
            self.listener.on_service_arrival(reference);
        }
    }

    /// Changes the optionality attribute and recomputes the state.
    pub fn set_optionality(&self, optional: bool) {
        self.inner.write().optional = optional;
        if self.is_started() {
            self.recompute_state();
        }
    }

    /// Changes the binding policy. Only supported before `start()`. Switching
    /// to dynamic-priority without a comparator installs the standard one.
    pub fn set_binding_policy(&self, policy: BindingPolicy) -> BindResult<()> {
        if self.is_started() {
            return Err(BindError::UnsupportedReconfiguration(
                "binding policy cannot change while tracking is open",
            ));
        }
        *self.policy.write() = policy;
        if policy == BindingPolicy::DynamicPriority {
            let description = self.description();
            let mut inner = self.inner.write();
            if inner.manager.comparator().is_none() {
                inner
                    .manager
                    .set_comparator(&description, Some(Arc::new(OsgiRankingComparator)));
            }
        }
        Ok(())
    }

    /// Replaces the registry. Only supported before `start()`.
    pub fn set_registry(&self, registry: Arc<dyn Registry>) -> BindResult<()> {
        if self.is_started() {
            return Err(BindError::UnsupportedReconfiguration(
                "registry cannot change while tracking is open",
            ));
        }
        *self.registry.write() = registry;
        Ok(())
    }

    /// Replaces the specification. Only supported before `start()`.
    pub fn set_specification(&self, specification: impl Into<String>) -> BindResult<()> {
        if self.is_started() {
            return Err(BindError::UnsupportedReconfiguration(
                "specification cannot change while tracking is open",
            ));
        }
        *self.specification.write() = specification.into();
        Ok(())
    }

    /// Runs a reconfiguration diff through the change protocol, then notifies
    /// the reconfiguration callback.
    fn apply_reconfiguration(&self, set: ChangeSet) {
        let departures = set.departures.clone();
        let arrivals = set.arrivals.clone();
        self.on_change(set);
        self.listener
            .on_dependency_reconfiguration(&departures, &arrivals);
    }
}

impl TrackerCustomizer for DependencyModel {
    fn adding(&self, _reference: &ServiceReference) -> bool {
        let inner = self.inner.read();
        !(inner.state == DependencyState::Broken || inner.frozen)
    }

    fn added(&self, reference: &ServiceReference) {
        let description = self.description();
        let set = {
            let mut inner = self.inner.write();
            inner.manager.on_added(&description, reference)
        };
        if let Some(set) = set {
            self.on_change(set);
        }
    }

    fn modified(&self, reference: &ServiceReference, _service: Option<&ServiceObject>) {
        let description = self.description();
        let set = {
            let mut inner = self.inner.write();
            inner.manager.on_modified(&description, reference)
        };
        if let Some(set) = set {
            self.on_change(set);
        }
    }

    fn removed(&self, reference: &ServiceReference, _service: Option<&ServiceObject>) {
        let description = self.description();
        let set = {
            let mut inner = self.inner.write();
            inner.manager.on_removed(&description, reference)
        };
        if let Some(set) = set {
            self.on_change(set);
        }
    }
}

/// Discovers tracking interceptors published in the registry and attaches the
/// ones targeting this dependency.
struct TrackingInterceptorHost {
    dependency: Weak<DependencyModel>,
    tracker: OnceLock<Arc<RegistryTracker>>,
}

impl TrackerCustomizer for TrackingInterceptorHost {
    fn adding(&self, reference: &ServiceReference) -> bool {
        self.dependency
            .upgrade()
            .map(|dependency| matches_target(reference, &dependency.description()))
            .unwrap_or(false)
    }

    fn added(&self, reference: &ServiceReference) {
        let Some(dependency) = self.dependency.upgrade() else {
            return;
        };
        let Some(tracker) = self.tracker.get() else {
            return;
        };
        match tracker.get_service(reference) {
            Some(ServiceObject::Instance(payload)) => {
                match payload.downcast::<TrackingInterceptorService>() {
                    Ok(service) => dependency.add_tracking_interceptor(service.0.clone()),
                    Err(_) => warn!(
                        id = %reference.id(),
                        "cannot retrieve the tracking interceptor object from the service reference"
                    ),
                }
            }
            _ => warn!(
                id = %reference.id(),
                "cannot retrieve the tracking interceptor object from the service reference"
            ),
        }
    }

    fn modified(&self, _reference: &ServiceReference, _service: Option<&ServiceObject>) {
        // Target changes of live interceptors are not supported.
    }

    fn removed(&self, _reference: &ServiceReference, service: Option<&ServiceObject>) {
        let Some(ServiceObject::Instance(payload)) = service else {
            return;
        };
        let Ok(interceptor) = payload.clone().downcast::<TrackingInterceptorService>() else {
            return;
        };
        if let Some(dependency) = self.dependency.upgrade() {
            dependency.remove_tracking_interceptor(&interceptor.0);
        }
    }
}

/// Discovers ranking interceptors published in the registry. The most
/// recently attached one is the ranking authority; when it leaves, another
/// published interceptor, the configured comparator, or the natural order
/// takes over, in that order.
struct RankingInterceptorHost {
    dependency: Weak<DependencyModel>,
    tracker: OnceLock<Arc<RegistryTracker>>,
}

impl TrackerCustomizer for RankingInterceptorHost {
    fn adding(&self, reference: &ServiceReference) -> bool {
        self.dependency
            .upgrade()
            .map(|dependency| matches_target(reference, &dependency.description()))
            .unwrap_or(false)
    }

    fn added(&self, reference: &ServiceReference) {
        let Some(dependency) = self.dependency.upgrade() else {
            return;
        };
        let Some(tracker) = self.tracker.get() else {
            return;
        };
        match tracker.get_service(reference) {
            Some(ServiceObject::Instance(payload)) => {
                match payload.downcast::<RankingInterceptorService>() {
                    Ok(service) => dependency.set_ranking_interceptor(service.0.clone()),
                    Err(_) => warn!(
                        id = %reference.id(),
                        "cannot retrieve the ranking interceptor object from the service reference"
                    ),
                }
            }
            _ => warn!(
                id = %reference.id(),
                "cannot retrieve the ranking interceptor object from the service reference"
            ),
        }
    }

    fn modified(&self, _reference: &ServiceReference, _service: Option<&ServiceObject>) {
        // Target changes of live interceptors are not supported.
    }

    fn removed(&self, _reference: &ServiceReference, service: Option<&ServiceObject>) {
        let Some(ServiceObject::Instance(payload)) = service else {
            return;
        };
        let Ok(departed) = payload.clone().downcast::<RankingInterceptorService>() else {
            return;
        };
        let Some(dependency) = self.dependency.upgrade() else {
            return;
        };
        if !dependency.ranking_is(&departed.0) {
            return;
        }
        departed.0.close(&dependency.description());

        // Another published interceptor takes over if one targets us.
        if let Some(tracker) = self.tracker.get() {
            for candidate in tracker.current() {
                if let Some(ServiceObject::Instance(payload)) = tracker.get_service(&candidate) {
                    if let Ok(service) = payload.downcast::<RankingInterceptorService>() {
                        dependency.set_ranking_interceptor(service.0.clone());
                        return;
                    }
                }
            }
        }
        dependency.restore_default_ranking();
    }
}

/// Builder for [`DependencyModel`].
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use rivet::{BindingPolicy, DependencyBuilder, DependencyListener, DependencyModel,
///             ComponentHandle, InMemoryRegistry, InstanceState, TransformedReference};
///
/// struct Component;
/// impl ComponentHandle for Component {
///     fn instance_name(&self) -> &str { "consumer" }
///     fn instance_state(&self) -> InstanceState { InstanceState::Valid }
///     fn factory_name(&self) -> &str { "factory" }
///     fn bundle_symbolic_name(&self) -> &str { "bundle" }
///     fn bundle_version(&self) -> &str { "1.0.0" }
///     fn stop(&self) {}
///     fn start(&self) {}
/// }
///
/// struct Quiet;
/// impl DependencyListener for Quiet {
///     fn validate(&self, _: &DependencyModel) {}
///     fn invalidate(&self, _: &DependencyModel) {}
///     fn on_service_arrival(&self, _: &TransformedReference) {}
///     fn on_service_departure(&self, _: &TransformedReference) {}
///     fn on_service_modification(&self, _: &TransformedReference) {}
/// }
///
/// let registry = InMemoryRegistry::new();
/// let dependency = DependencyBuilder::new(registry, Arc::new(Component), Arc::new(Quiet))
///     .specification("org.example.Hello")
///     .optional(true)
///     .policy(BindingPolicy::Dynamic)
///     .build()
///     .unwrap();
/// dependency.start().unwrap();
/// assert!(dependency.is_started());
/// dependency.stop();
/// ```
pub struct DependencyBuilder {
    registry: Arc<dyn Registry>,
    instance: Arc<dyn ComponentHandle>,
    listener: Arc<dyn DependencyListener>,
    specification: Option<String>,
    id: Option<String>,
    aggregate: bool,
    optional: bool,
    filter: Option<String>,
    comparator: Option<Arc<dyn ReferenceComparator>>,
    policy: BindingPolicy,
}

impl DependencyBuilder {
    /// Starts a builder from the required collaborators.
    pub fn new(
        registry: Arc<dyn Registry>,
        instance: Arc<dyn ComponentHandle>,
        listener: Arc<dyn DependencyListener>,
    ) -> Self {
        DependencyBuilder {
            registry,
            instance,
            listener,
            specification: None,
            id: None,
            aggregate: false,
            optional: false,
            filter: None,
            comparator: None,
            policy: BindingPolicy::default(),
        }
    }

    /// The service specification to track. Required.
    pub fn specification(mut self, specification: impl Into<String>) -> Self {
        self.specification = Some(specification.into());
        self
    }

    /// A dependency id other than the specification name.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Bind several providers instead of one.
    pub fn aggregate(mut self, aggregate: bool) -> Self {
        self.aggregate = aggregate;
        self
    }

    /// Stay resolved without any provider.
    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// An LDAP filter over provider properties.
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// A comparator ordering the selected set.
    pub fn comparator(mut self, comparator: Arc<dyn ReferenceComparator>) -> Self {
        self.comparator = Some(comparator);
        self
    }

    /// The binding policy.
    pub fn policy(mut self, policy: BindingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builds the dependency. Fails on a missing specification or a
    /// malformed filter; under dynamic-priority the standard comparator is
    /// installed when none is configured.
    pub fn build(self) -> BindResult<Arc<DependencyModel>> {
        let specification = self
            .specification
            .filter(|s| !s.is_empty())
            .ok_or_else(|| BindError::UnloadableSpecification("(unspecified)".to_string()))?;
        let filter = self.filter.as_deref().map(LdapFilter::parse).transpose()?;
        let mut comparator = self.comparator;
        if self.policy == BindingPolicy::DynamicPriority && comparator.is_none() {
            comparator = Some(Arc::new(OsgiRankingComparator));
        }
        Ok(DependencyModel::new(
            self.registry,
            self.instance,
            self.listener,
            specification,
            self.id,
            self.aggregate,
            self.optional,
            filter,
            comparator,
            self.policy,
        ))
    }
}
