//! Built-in tracking interceptors.

use crate::description::DependencyDescription;
use crate::interceptors::TrackingInterceptor;
use crate::ldap::LdapFilter;
use crate::transformed::TransformedReference;

/// Accepts every reference unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTrackingInterceptor;

impl TrackingInterceptor for DefaultTrackingInterceptor {
    fn accept(
        &self,
        _dependency: &DependencyDescription,
        reference: TransformedReference,
    ) -> Option<TransformedReference> {
        Some(reference)
    }
}

/// Accepts references matching an LDAP filter.
///
/// One of these sits at the end of every dependency's tracking chain when a
/// filter is configured, so dynamically attached interceptors run before the
/// filter and may rewrite the properties it sees.
#[derive(Debug, Clone)]
pub struct FilterTrackingInterceptor {
    filter: LdapFilter,
}

impl FilterTrackingInterceptor {
    /// Wraps a compiled filter.
    pub fn new(filter: LdapFilter) -> Self {
        FilterTrackingInterceptor { filter }
    }

    /// The wrapped filter.
    pub fn filter(&self) -> &LdapFilter {
        &self.filter
    }
}

impl TrackingInterceptor for FilterTrackingInterceptor {
    fn accept(
        &self,
        _dependency: &DependencyDescription,
        reference: TransformedReference,
    ) -> Option<TransformedReference> {
        // Match on the effective view: preceding interceptors may have
        // rewritten the properties the filter cares about.
        if self.filter.matches(&reference.effective_properties()) {
            Some(reference)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::InstanceState;
    use crate::dependency::DependencyState;
    use crate::properties::PropertyMap;
    use crate::reference::{ServiceId, ServiceReference};

    fn description() -> DependencyDescription {
        DependencyDescription {
            id: "s".to_string(),
            specification: "s".to_string(),
            state: DependencyState::Unresolved,
            instance_name: "i".to_string(),
            instance_state: InstanceState::Valid,
            factory_name: "f".to_string(),
            bundle_symbolic_name: "b".to_string(),
            bundle_version: "1.0.0".to_string(),
        }
    }

    fn view(lang: &str) -> TransformedReference {
        TransformedReference::new(ServiceReference::new(
            ServiceId(1),
            PropertyMap::new().with("lang", lang),
        ))
    }

    #[test]
    fn filter_gates_on_effective_properties() {
        let interceptor = FilterTrackingInterceptor::new(LdapFilter::parse("(lang=en)").unwrap());
        assert!(interceptor.accept(&description(), view("en")).is_some());
        assert!(interceptor.accept(&description(), view("fr")).is_none());

        // An upstream rewrite changes what the filter sees.
        let mut rewritten = view("fr");
        rewritten.add_property("lang", "en").unwrap();
        assert!(interceptor.accept(&description(), rewritten).is_some());
    }
}
