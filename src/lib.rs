//! # rivet
//!
//! Service dependency resolution for dynamic component runtimes.
//!
//! A component instance declares service dependencies; each dependency
//! watches a registry of providers and keeps a stable, correctly-ranked set
//! of bindings as providers come, go, and change. The pipeline has three
//! stages:
//!
//! - **tracked**: every reference the registry reports for the
//!   specification, maintained by a [`RegistryTracker`];
//! - **matching**: tracked references accepted (and possibly rewritten) by
//!   the chain of [`TrackingInterceptor`]s, with the configured LDAP filter
//!   as the terminal link;
//! - **selected**: the matching set permuted and pruned by the single
//!   [`RankingInterceptor`].
//!
//! The [`DependencyModel`] reconciles the *bound* set (what the component
//! actually sees) against the selected set according to its
//! [`BindingPolicy`], and notifies a [`DependencyListener`] of every arrival,
//! departure, modification, and state transition. Listener callbacks never
//! run under internal locks, so they may freely call back into the
//! dependency.
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use rivet::{
//!     ComponentHandle, DependencyBuilder, DependencyListener, DependencyModel,
//!     InMemoryRegistry, InstanceState, PropertyMap, ServiceObject, TransformedReference,
//! };
//!
//! // The component owning the dependency.
//! struct Consumer;
//! impl ComponentHandle for Consumer {
//!     fn instance_name(&self) -> &str { "greeter-consumer" }
//!     fn instance_state(&self) -> InstanceState { InstanceState::Valid }
//!     fn factory_name(&self) -> &str { "greeter.factory" }
//!     fn bundle_symbolic_name(&self) -> &str { "org.example.app" }
//!     fn bundle_version(&self) -> &str { "1.0.0" }
//!     fn stop(&self) {}
//!     fn start(&self) {}
//! }
//!
//! // Record binding events.
//! #[derive(Default)]
//! struct Bindings(Mutex<Vec<String>>);
//! impl DependencyListener for Bindings {
//!     fn validate(&self, _: &DependencyModel) { self.0.lock().push("validate".into()); }
//!     fn invalidate(&self, _: &DependencyModel) { self.0.lock().push("invalidate".into()); }
//!     fn on_service_arrival(&self, r: &TransformedReference) {
//!         self.0.lock().push(format!("arrival:{}", r.id()));
//!     }
//!     fn on_service_departure(&self, r: &TransformedReference) {
//!         self.0.lock().push(format!("departure:{}", r.id()));
//!     }
//!     fn on_service_modification(&self, _: &TransformedReference) {}
//! }
//!
//! let registry = InMemoryRegistry::new();
//! let listener = Arc::new(Bindings::default());
//!
//! let dependency = DependencyBuilder::new(registry.clone(), Arc::new(Consumer), listener.clone())
//!     .specification("org.example.Greeter")
//!     .build()
//!     .unwrap();
//! dependency.start().unwrap();
//!
//! // A provider appears and is bound.
//! let payload: Arc<dyn std::any::Any + Send + Sync> = Arc::new("hello".to_string());
//! let registration = registry.register(
//!     &["org.example.Greeter"],
//!     PropertyMap::new(),
//!     ServiceObject::Instance(payload),
//! );
//! assert_eq!(dependency.bound().len(), 1);
//!
//! // Borrow the service object through the dependency.
//! let bound = dependency.first_bound().unwrap();
//! let greeting = dependency.get_service(&bound).unwrap();
//! assert_eq!(greeting.downcast_ref::<String>().unwrap(), "hello");
//!
//! dependency.stop();
//! assert_eq!(
//!     *listener.0.lock(),
//!     vec![
//!         format!("arrival:{}", registration.id()),
//!         "validate".to_string(),
//!         format!("departure:{}", registration.id()),
//!         "invalidate".to_string(),
//!     ]
//! );
//! ```
//!
//! ## Interceptors
//!
//! Interceptors attach in two ways: directly through
//! [`DependencyModel::add_tracking_interceptor`] /
//! [`DependencyModel::set_ranking_interceptor`], or by publishing
//! [`TrackingInterceptorService`] / [`RankingInterceptorService`] wrappers in
//! the registry under [`TRACKING_INTERCEPTOR_INTERFACE`] /
//! [`RANKING_INTERCEPTOR_INTERFACE`], optionally scoped with a `target` LDAP
//! property over the dependency's identity.

pub mod component;
pub mod config;
pub mod context;
pub mod dependency;
pub mod description;
pub mod error;
pub mod interceptors;
pub mod ldap;
pub mod manager;
pub mod memory;
pub mod properties;
pub mod reference;
pub mod registry;
pub mod tracker;
pub mod transformed;

pub use component::{ComponentHandle, InstanceState, ServiceObjectFactory, ServicePayload};
pub use config::{ComparatorRegistry, DependencyConfig, SpecificationRegistry, OSGI_COMPARATOR};
pub use context::{ContextServiceListener, InterceptableContext, WrappedServiceEvent};
pub use dependency::{
    BindingPolicy, DependencyBuilder, DependencyListener, DependencyModel, DependencyState,
};
pub use description::DependencyDescription;
pub use error::{BindError, BindResult};
pub use interceptors::{
    ComparatorRanking, DefaultTrackingInterceptor, FilterTrackingInterceptor, NaturalOrderRanking,
    OsgiRankingComparator, RankingInterceptor, RankingInterceptorService, ReferenceComparator,
    TrackingInterceptor, TrackingInterceptorService, RANKING_INTERCEPTOR_INTERFACE,
    TRACKING_INTERCEPTOR_INTERFACE,
};
pub use ldap::LdapFilter;
pub use manager::ChangeSet;
pub use memory::{InMemoryRegistry, ServiceRegistration};
pub use properties::{
    PropertyMap, PropertyValue, INSTANCE_NAME, OBJECTCLASS, SERVICE_ID, SERVICE_PID,
    SERVICE_RANKING, TARGET,
};
pub use reference::{ServiceId, ServiceReference};
pub use registry::{
    ListenerId, Registry, ServiceEvent, ServiceEventKind, ServiceListener, ServiceObject,
};
pub use tracker::{RegistryTracker, TrackerCustomizer};
pub use transformed::{strictly_equal, TransformedReference, FORBIDDEN_KEYS};
