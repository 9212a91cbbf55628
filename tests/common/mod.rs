#![allow(dead_code)]

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;
use rivet::{
    ComponentHandle, DependencyListener, DependencyModel, InMemoryRegistry, InstanceState,
    PropertyMap, ServiceObject, ServiceRegistration, TransformedReference, SERVICE_RANKING,
};

/// Component handle recording stop/start calls.
#[derive(Default)]
pub struct TestComponent {
    pub lifecycle: Mutex<Vec<&'static str>>,
}

impl TestComponent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lifecycle(&self) -> Vec<&'static str> {
        self.lifecycle.lock().clone()
    }
}

impl ComponentHandle for TestComponent {
    fn instance_name(&self) -> &str {
        "consumer"
    }

    fn instance_state(&self) -> InstanceState {
        InstanceState::Valid
    }

    fn factory_name(&self) -> &str {
        "consumer.factory"
    }

    fn bundle_symbolic_name(&self) -> &str {
        "org.example.tests"
    }

    fn bundle_version(&self) -> &str {
        "1.0.0"
    }

    fn stop(&self) {
        self.lifecycle.lock().push("stop");
    }

    fn start(&self) {
        self.lifecycle.lock().push("start");
    }
}

/// Listener recording every callback in order.
#[derive(Default)]
pub struct EventLog(pub Mutex<Vec<String>>);

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.0.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

impl DependencyListener for EventLog {
    fn validate(&self, _dependency: &DependencyModel) {
        self.0.lock().push("validate".to_string());
    }

    fn invalidate(&self, _dependency: &DependencyModel) {
        self.0.lock().push("invalidate".to_string());
    }

    fn on_service_arrival(&self, reference: &TransformedReference) {
        self.0.lock().push(format!("arrival:{}", reference.id()));
    }

    fn on_service_departure(&self, reference: &TransformedReference) {
        self.0.lock().push(format!("departure:{}", reference.id()));
    }

    fn on_service_modification(&self, reference: &TransformedReference) {
        self.0.lock().push(format!("modified:{}", reference.id()));
    }

    fn on_dependency_reconfiguration(
        &self,
        departures: &[TransformedReference],
        arrivals: &[TransformedReference],
    ) {
        self.0
            .lock()
            .push(format!("reconfigured:{}/{}", departures.len(), arrivals.len()));
    }
}

pub fn payload(value: &str) -> ServiceObject {
    let object: Arc<dyn Any + Send + Sync> = Arc::new(value.to_string());
    ServiceObject::Instance(object)
}

pub fn provider(
    registry: &Arc<InMemoryRegistry>,
    interface: &str,
    rank: i64,
) -> ServiceRegistration {
    registry.register(
        &[interface],
        PropertyMap::new().with(SERVICE_RANKING, rank),
        payload("service"),
    )
}

pub fn provider_with(
    registry: &Arc<InMemoryRegistry>,
    interface: &str,
    properties: PropertyMap,
) -> ServiceRegistration {
    registry.register(&[interface], properties, payload("service"))
}

pub fn bound_ids(dependency: &DependencyModel) -> Vec<i64> {
    dependency.bound().iter().map(|r| r.id().0).collect()
}

pub fn selected_ids(dependency: &DependencyModel) -> Vec<i64> {
    dependency.selected().iter().map(|r| r.id().0).collect()
}
