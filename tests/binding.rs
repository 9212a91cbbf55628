//! Arrival, ranking, and binding behaviour.

mod common;

use common::{bound_ids, provider, selected_ids, EventLog, TestComponent};
use rivet::{DependencyBuilder, DependencyState, InMemoryRegistry, Registry};

const SPEC: &str = "org.example.Hello";

#[test]
fn scalar_rebinds_to_a_better_unused_provider() {
    let registry = InMemoryRegistry::new();
    let log = EventLog::new();
    let dependency = DependencyBuilder::new(registry.clone(), TestComponent::new(), log.clone())
        .specification(SPEC)
        .build()
        .unwrap();
    dependency.start().unwrap();

    let a = provider(&registry, SPEC, 0);
    let b = provider(&registry, SPEC, 10);

    assert_eq!(bound_ids(&dependency), vec![b.id().0]);
    assert_eq!(
        log.events(),
        vec![
            format!("arrival:{}", a.id()),
            "validate".to_string(),
            format!("departure:{}", a.id()),
            format!("arrival:{}", b.id()),
        ]
    );
}

#[test]
fn scalar_keeps_a_borrowed_binding() {
    let registry = InMemoryRegistry::new();
    let log = EventLog::new();
    let dependency = DependencyBuilder::new(registry.clone(), TestComponent::new(), log.clone())
        .specification(SPEC)
        .build()
        .unwrap();
    dependency.start().unwrap();

    let a = provider(&registry, SPEC, 0);
    let bound = dependency.first_bound().unwrap();
    let service = dependency.get_service(&bound).unwrap();
    assert_eq!(service.downcast_ref::<String>().unwrap(), "service");

    // A better provider arrives, but the current binding is in use.
    let b = provider(&registry, SPEC, 10);
    assert_eq!(bound_ids(&dependency), vec![a.id().0]);
    assert_eq!(
        log.events(),
        vec![format!("arrival:{}", a.id()), "validate".to_string()]
    );

    // Selection still prefers the better provider.
    assert_eq!(selected_ids(&dependency)[0], b.id().0);
}

#[test]
fn aggregate_binds_in_ranking_order() {
    let registry = InMemoryRegistry::new();
    let log = EventLog::new();
    let dependency = DependencyBuilder::new(registry.clone(), TestComponent::new(), log.clone())
        .specification(SPEC)
        .aggregate(true)
        .build()
        .unwrap();
    dependency.start().unwrap();

    // Same rank: the older registration wins the tie.
    let b = provider(&registry, SPEC, 5);
    let a = provider(&registry, SPEC, 5);
    let c = provider(&registry, SPEC, 7);

    assert_eq!(selected_ids(&dependency), vec![c.id().0, b.id().0, a.id().0]);
    assert_eq!(bound_ids(&dependency), vec![c.id().0, b.id().0, a.id().0]);
    assert_eq!(log.count("arrival:"), 3);
}

#[test]
fn departure_unbinds_and_invalidates_when_empty() {
    let registry = InMemoryRegistry::new();
    let log = EventLog::new();
    let dependency = DependencyBuilder::new(registry.clone(), TestComponent::new(), log.clone())
        .specification(SPEC)
        .build()
        .unwrap();
    dependency.start().unwrap();

    let a = provider(&registry, SPEC, 0);
    assert_eq!(dependency.state(), DependencyState::Resolved);

    a.unregister();
    assert_eq!(dependency.state(), DependencyState::Unresolved);
    assert!(dependency.bound().is_empty());
    assert_eq!(
        log.events(),
        vec![
            format!("arrival:{}", a.id()),
            "validate".to_string(),
            format!("departure:{}", a.id()),
            "invalidate".to_string(),
        ]
    );
}

#[test]
fn scalar_falls_back_to_the_next_provider() {
    let registry = InMemoryRegistry::new();
    let log = EventLog::new();
    let dependency = DependencyBuilder::new(registry.clone(), TestComponent::new(), log.clone())
        .specification(SPEC)
        .build()
        .unwrap();
    dependency.start().unwrap();

    let a = provider(&registry, SPEC, 10);
    let b = provider(&registry, SPEC, 0);
    assert_eq!(bound_ids(&dependency), vec![a.id().0]);

    a.unregister();
    assert_eq!(bound_ids(&dependency), vec![b.id().0]);
    assert_eq!(dependency.state(), DependencyState::Resolved);
}

#[test]
fn optional_dependency_resolves_without_providers() {
    let registry = InMemoryRegistry::new();
    let log = EventLog::new();
    let dependency = DependencyBuilder::new(registry.clone(), TestComponent::new(), log.clone())
        .specification(SPEC)
        .optional(true)
        .build()
        .unwrap();
    dependency.start().unwrap();

    assert_eq!(dependency.state(), DependencyState::Resolved);
    assert_eq!(log.events(), vec!["validate".to_string()]);

    // Providers still bind and unbind, without state churn.
    let a = provider(&registry, SPEC, 0);
    a.unregister();
    assert_eq!(
        log.events(),
        vec![
            "validate".to_string(),
            format!("arrival:{}", a.id()),
            format!("departure:{}", a.id()),
        ]
    );
    assert_eq!(dependency.state(), DependencyState::Resolved);
}

#[test]
fn stop_departs_everything_and_releases_borrows() {
    let registry = InMemoryRegistry::new();
    let log = EventLog::new();
    let dependency = DependencyBuilder::new(registry.clone(), TestComponent::new(), log.clone())
        .specification(SPEC)
        .aggregate(true)
        .build()
        .unwrap();
    dependency.start().unwrap();

    let a = provider(&registry, SPEC, 0);
    let b = provider(&registry, SPEC, 5);
    let bound = dependency.first_bound().unwrap();
    dependency.get_service(&bound).unwrap();

    dependency.stop();
    assert!(dependency.bound().is_empty());
    assert!(!dependency.is_started());
    assert_eq!(dependency.state(), DependencyState::Unresolved);
    assert_eq!(log.count("departure:"), 2);
    // The registry borrow taken through the dependency was released.
    assert!(!registry.unget_service(&a.reference()));
    assert!(!registry.unget_service(&b.reference()));

    // A stopped dependency can be restarted.
    log.clear();
    dependency.start().unwrap();
    assert_eq!(bound_ids(&dependency).len(), 2);
    dependency.stop();
}

#[test]
fn used_references_report_borrowed_bindings() {
    let registry = InMemoryRegistry::new();
    let log = EventLog::new();
    let dependency = DependencyBuilder::new(registry.clone(), TestComponent::new(), log.clone())
        .specification(SPEC)
        .aggregate(true)
        .build()
        .unwrap();
    dependency.start().unwrap();

    provider(&registry, SPEC, 0);
    let b = provider(&registry, SPEC, 5);

    assert!(dependency.used_references().is_empty());
    let best = dependency.first_bound().unwrap();
    dependency.get_service(&best).unwrap();
    let used = dependency.used_references();
    assert_eq!(used.len(), 1);
    assert_eq!(used[0].id(), b.id());

    dependency.unget_service(&best);
    assert!(dependency.used_references().is_empty());
}
