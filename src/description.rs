//! Dependency identity exposed to interceptors.

use crate::component::InstanceState;
use crate::dependency::DependencyState;
use crate::properties::{PropertyMap, INSTANCE_NAME};

/// A value snapshot of a dependency's identity, handed to interceptors.
///
/// Interceptors are matched to dependencies through their `target` LDAP
/// expression, evaluated against [`DependencyDescription::properties`]. The
/// snapshot is also what every interceptor hook receives instead of the model
/// itself, so no hook can re-enter the dependency's lock.
#[derive(Debug, Clone)]
pub struct DependencyDescription {
    /// Dependency id, the specification name unless configured otherwise.
    pub id: String,
    /// The tracked service specification.
    pub specification: String,
    /// Dependency state at snapshot time.
    pub state: DependencyState,
    /// Name of the owning component instance.
    pub instance_name: String,
    /// Lifecycle state of the owning instance.
    pub instance_state: InstanceState,
    /// Name of the factory that created the instance.
    pub factory_name: String,
    /// Symbolic name of the declaring bundle.
    pub bundle_symbolic_name: String,
    /// Version of the declaring bundle.
    pub bundle_version: String,
}

impl DependencyDescription {
    /// The identity properties interceptor targets are matched against.
    pub fn properties(&self) -> PropertyMap {
        PropertyMap::new()
            .with(INSTANCE_NAME, self.instance_name.clone())
            .with("instance.state", self.instance_state.code())
            .with("factory.name", self.factory_name.clone())
            .with("bundle.symbolic-name", self.bundle_symbolic_name.clone())
            .with("bundle.version", self.bundle_version.clone())
            .with("dependency.specification", self.specification.clone())
            .with("dependency.id", self.id.clone())
            .with("dependency.state", self.state.code())
    }
}
