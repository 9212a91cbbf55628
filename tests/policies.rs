//! Binding policies: dynamic, static, dynamic-priority.

mod common;

use common::{bound_ids, provider, EventLog, TestComponent};
use rivet::{BindingPolicy, DependencyBuilder, DependencyState, InMemoryRegistry};

const SPEC: &str = "org.example.Hello";

#[test]
fn static_policy_breaks_on_bound_departure() {
    let registry = InMemoryRegistry::new();
    let log = EventLog::new();
    let component = TestComponent::new();
    let dependency = DependencyBuilder::new(registry.clone(), component.clone(), log.clone())
        .specification(SPEC)
        .policy(BindingPolicy::Static)
        .build()
        .unwrap();
    dependency.start().unwrap();

    let a = provider(&registry, SPEC, 0);
    assert_eq!(bound_ids(&dependency), vec![a.id().0]);

    a.unregister();
    assert_eq!(dependency.state(), DependencyState::Broken);
    // Exactly one invalidate, and the instance was recreated.
    assert_eq!(log.count("invalidate"), 1);
    assert_eq!(component.lifecycle(), vec!["stop", "start"]);
    // The departure was not reconciled: broken is terminal.
    assert_eq!(log.count("departure:"), 0);
}

#[test]
fn broken_dependency_ignores_new_providers() {
    let registry = InMemoryRegistry::new();
    let log = EventLog::new();
    let dependency = DependencyBuilder::new(registry.clone(), TestComponent::new(), log.clone())
        .specification(SPEC)
        .policy(BindingPolicy::Static)
        .build()
        .unwrap();
    dependency.start().unwrap();

    provider(&registry, SPEC, 0).unregister();
    assert_eq!(dependency.state(), DependencyState::Broken);
    log.clear();

    provider(&registry, SPEC, 10);
    assert_eq!(dependency.state(), DependencyState::Broken);
    assert!(dependency.bound().is_empty());
    assert!(log.events().is_empty());
}

#[test]
fn broken_recovers_through_stop_and_start() {
    let registry = InMemoryRegistry::new();
    let log = EventLog::new();
    let dependency = DependencyBuilder::new(registry.clone(), TestComponent::new(), log.clone())
        .specification(SPEC)
        .policy(BindingPolicy::Static)
        .build()
        .unwrap();
    dependency.start().unwrap();

    provider(&registry, SPEC, 0).unregister();
    assert_eq!(dependency.state(), DependencyState::Broken);

    dependency.stop();
    assert_eq!(dependency.state(), DependencyState::Unresolved);
    let b = provider(&registry, SPEC, 0);
    dependency.start().unwrap();
    assert_eq!(bound_ids(&dependency), vec![b.id().0]);
    assert_eq!(dependency.state(), DependencyState::Resolved);
}

#[test]
fn static_policy_survives_unbound_departures() {
    let registry = InMemoryRegistry::new();
    let log = EventLog::new();
    let dependency = DependencyBuilder::new(registry.clone(), TestComponent::new(), log.clone())
        .specification(SPEC)
        .policy(BindingPolicy::Static)
        .build()
        .unwrap();
    dependency.start().unwrap();

    let a = provider(&registry, SPEC, 10);
    let b = provider(&registry, SPEC, 0);
    assert_eq!(bound_ids(&dependency), vec![a.id().0]);

    // The unbound provider leaving is harmless.
    b.unregister();
    assert_eq!(dependency.state(), DependencyState::Resolved);
    assert_eq!(bound_ids(&dependency), vec![a.id().0]);
}

#[test]
fn dynamic_priority_rebinds_even_in_use() {
    let registry = InMemoryRegistry::new();
    let log = EventLog::new();
    let dependency = DependencyBuilder::new(registry.clone(), TestComponent::new(), log.clone())
        .specification(SPEC)
        .policy(BindingPolicy::DynamicPriority)
        .build()
        .unwrap();
    dependency.start().unwrap();

    let a = provider(&registry, SPEC, 0);
    let bound = dependency.first_bound().unwrap();
    dependency.get_service(&bound).unwrap();

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
fn dynamic_priority_aggregate_mirrors_selection_order() {
    let registry = InMemoryRegistry::new();
    let log = EventLog::new();
    let dependency = DependencyBuilder::new(registry.clone(), TestComponent::new(), log.clone())
        .specification(SPEC)
        .policy(BindingPolicy::DynamicPriority)
        .aggregate(true)
        .build()
        .unwrap();
    dependency.start().unwrap();

    let a = provider(&registry, SPEC, 0);
    let bound = dependency.first_bound().unwrap();
    dependency.get_service(&bound).unwrap();

    // Even with a borrowed object, dynamic-priority reorders the bindings.
    let b = provider(&registry, SPEC, 10);
    assert_eq!(bound_ids(&dependency), vec![b.id().0, a.id().0]);
}

#[test]
fn frozen_dependency_admits_nothing_new() {
    let registry = InMemoryRegistry::new();
    let log = EventLog::new();
    let dependency = DependencyBuilder::new(registry.clone(), TestComponent::new(), log.clone())
        .specification(SPEC)
        .policy(BindingPolicy::Static)
        .build()
        .unwrap();
    dependency.start().unwrap();

    let a = provider(&registry, SPEC, 0);
    dependency.freeze();

    provider(&registry, SPEC, 10);
    assert_eq!(bound_ids(&dependency), vec![a.id().0]);
    assert_eq!(dependency.matching().len(), 1);

    dependency.unfreeze();
    let c = provider(&registry, SPEC, 20);
    assert_eq!(dependency.matching().len(), 2);
    assert_eq!(dependency.selected()[0].id(), c.id());
}
