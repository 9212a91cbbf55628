//! Component-side interfaces consumed by the resolver.
//!
//! The resolver never manages component lifecycles itself; it talks to the
//! owning instance through [`ComponentHandle`] (stop/restart on a broken
//! static dependency, identity properties for interceptor targeting) and
//! resolves per-instance service objects through [`ServiceObjectFactory`].

use std::any::Any;
use std::sync::Arc;

/// Type-erased service payload handed to components.
pub type ServicePayload = Arc<dyn Any + Send + Sync>;

/// Lifecycle state of a component instance, exposed to interceptor targeting
/// as the `instance.state` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// The instance was disposed and will never restart.
    Disposed,
    /// The instance is stopped.
    Stopped,
    /// The instance is started but has unresolved dependencies.
    Invalid,
    /// The instance is started and all dependencies are resolved.
    Valid,
}

impl InstanceState {
    /// The numeric lifecycle code used in targeting properties.
    pub fn code(self) -> i64 {
        match self {
            InstanceState::Disposed => -1,
            InstanceState::Stopped => 0,
            InstanceState::Invalid => 1,
            InstanceState::Valid => 2,
        }
    }
}

/// The component instance owning a dependency.
///
/// Identity getters feed interceptor targeting; `stop`/`start` are invoked
/// (never under a resolver lock) when a static dependency breaks and the
/// instance must be recreated.
pub trait ComponentHandle: Send + Sync {
    /// Name of the component instance.
    fn instance_name(&self) -> &str;

    /// Current lifecycle state of the instance.
    fn instance_state(&self) -> InstanceState;

    /// Name of the factory that created the instance.
    fn factory_name(&self) -> &str;

    /// Symbolic name of the bundle declaring the factory.
    fn bundle_symbolic_name(&self) -> &str;

    /// Version of the bundle declaring the factory.
    fn bundle_version(&self) -> &str;

    /// Stops the instance.
    fn stop(&self);

    /// Starts the instance.
    fn start(&self);
}

/// A provider-supplied factory creating one service object per consuming
/// component instance.
///
/// When a registration publishes a factory instead of a plain object, the
/// resolver asks it for the consumer-specific object on first borrow and
/// returns that object on release, so stateful providers can track their
/// consumers.
pub trait ServiceObjectFactory: Send + Sync {
    /// Creates (or returns) the service object for the given consumer.
    fn get_service(&self, instance: &dyn ComponentHandle) -> ServicePayload;

    /// Releases the service object previously created for the consumer.
    fn unget_service(&self, instance: &dyn ComponentHandle, object: ServicePayload);
}
