//! Textual dependency configuration.
//!
//! Component descriptors configure dependencies with strings: a
//! specification name, an optional LDAP filter, a policy literal, and a
//! comparator name. This module resolves that surface into builder inputs,
//! failing with configuration faults before anything mutates.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::component::ComponentHandle;
use crate::dependency::{BindingPolicy, DependencyBuilder, DependencyListener};
use crate::error::{BindError, BindResult};
use crate::interceptors::{OsgiRankingComparator, ReferenceComparator};
use crate::registry::Registry;

/// The comparator name resolving to the standard registry ordering.
pub const OSGI_COMPARATOR: &str = "osgi";

/// Named comparators available to configuration.
///
/// Stands in for the original's class loading: descriptors name comparators,
/// deployments register the implementations.
#[derive(Default)]
pub struct ComparatorRegistry {
    entries: HashMap<String, Arc<dyn ReferenceComparator>>,
}

impl ComparatorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a comparator under a name, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, comparator: Arc<dyn ReferenceComparator>) {
        self.entries.insert(name.into(), comparator);
    }

    /// Resolves a comparator name. The literal `"osgi"` (any case) always
    /// resolves to the standard comparator.
    pub fn resolve(&self, name: &str) -> BindResult<Arc<dyn ReferenceComparator>> {
        if name.eq_ignore_ascii_case(OSGI_COMPARATOR) {
            return Ok(Arc::new(OsgiRankingComparator));
        }
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| BindError::UnloadableComparator(name.to_string()))
    }
}

/// The set of specifications a deployment can resolve.
///
/// An empty registry accepts any non-empty name; a populated one rejects
/// unknown names, mirroring the original's specification loading step.
#[derive(Default)]
pub struct SpecificationRegistry {
    known: HashSet<String>,
}

impl SpecificationRegistry {
    /// Creates an open registry accepting any non-empty specification.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a known specification, closing the registry to unknown ones.
    pub fn declare(&mut self, specification: impl Into<String>) {
        self.known.insert(specification.into());
    }

    /// Resolves a specification name.
    pub fn resolve(&self, specification: &str) -> BindResult<String> {
        if specification.is_empty() {
            return Err(BindError::UnloadableSpecification(
                "(unspecified)".to_string(),
            ));
        }
        if !self.known.is_empty() && !self.known.contains(specification) {
            return Err(BindError::UnloadableSpecification(
                specification.to_string(),
            ));
        }
        Ok(specification.to_string())
    }
}

/// The textual configuration of one dependency.
///
/// # Examples
///
/// ```rust
/// use rivet::{BindingPolicy, ComparatorRegistry, DependencyConfig};
///
/// let config = DependencyConfig {
///     specification: "org.example.Hello".to_string(),
///     policy: Some("dynamic-priority".to_string()),
///     comparator: Some("osgi".to_string()),
///     ..DependencyConfig::default()
/// };
/// assert_eq!(config.resolve_policy().unwrap(), BindingPolicy::DynamicPriority);
/// assert!(config.resolve_comparator(&ComparatorRegistry::new()).unwrap().is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct DependencyConfig {
    /// The required specification name.
    pub specification: String,
    /// Bind several providers?
    pub aggregate: bool,
    /// Satisfied without providers?
    pub optional: bool,
    /// LDAP filter source, if any.
    pub filter: Option<String>,
    /// Comparator name: `"osgi"` or a [`ComparatorRegistry`] entry.
    pub comparator: Option<String>,
    /// Policy literal; absent means dynamic.
    pub policy: Option<String>,
}

impl DependencyConfig {
    /// Resolves the policy literal, defaulting to dynamic.
    pub fn resolve_policy(&self) -> BindResult<BindingPolicy> {
        match &self.policy {
            None => Ok(BindingPolicy::Dynamic),
            Some(literal) => BindingPolicy::parse(literal),
        }
    }

    /// Resolves the comparator name against a registry.
    pub fn resolve_comparator(
        &self,
        comparators: &ComparatorRegistry,
    ) -> BindResult<Option<Arc<dyn ReferenceComparator>>> {
        match &self.comparator {
            None => Ok(None),
            Some(name) => comparators.resolve(name).map(Some),
        }
    }
}

impl DependencyBuilder {
    /// Builds a dependency builder from a textual configuration. Every
    /// resolution step fails before the builder is produced, so a faulty
    /// configuration has no side effects.
    pub fn from_config(
        registry: Arc<dyn Registry>,
        instance: Arc<dyn ComponentHandle>,
        listener: Arc<dyn DependencyListener>,
        config: &DependencyConfig,
        comparators: &ComparatorRegistry,
        specifications: &SpecificationRegistry,
    ) -> BindResult<DependencyBuilder> {
        let specification = specifications.resolve(&config.specification)?;
        let policy = config.resolve_policy()?;
        let comparator = config.resolve_comparator(comparators)?;

        let mut builder = DependencyBuilder::new(registry, instance, listener)
            .specification(specification)
            .aggregate(config.aggregate)
            .optional(config.optional)
            .policy(policy);
        if let Some(filter) = &config.filter {
            builder = builder.filter(filter.clone());
        }
        if let Some(comparator) = comparator {
            builder = builder.comparator(comparator);
        }
        Ok(builder)
    }
}
