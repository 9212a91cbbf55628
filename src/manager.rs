//! Selection of services: matching set, selected set, interceptor chains.
//!
//! The [`SelectedServicesManager`] owns the middle of the pipeline: it turns
//! tracked references into the matching set through the tracking-interceptor
//! chain, asks the ranking interceptor for the selected set, and describes
//! every change as a [`ChangeSet`] diff.
//!
//! Every entry point is called with the owning dependency's write lock held
//! and returns pure data; the manager never invokes listeners or interceptor
//! lifecycle hooks itself. That split is what keeps callbacks out of critical
//! sections.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::description::DependencyDescription;
use crate::interceptors::{
    ComparatorRanking, FilterTrackingInterceptor, NaturalOrderRanking, RankingInterceptor,
    ReferenceComparator, TrackingInterceptor,
};
use crate::ldap::LdapFilter;
use crate::reference::ServiceReference;
use crate::transformed::{strictly_equal, TransformedReference};

/// The atomic diff published to the dependency when the selected set changes.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// The new selected set, in ranking order.
    pub selected: Vec<TransformedReference>,
    /// References that left the selected set.
    pub departures: Vec<TransformedReference>,
    /// References that entered the selected set.
    pub arrivals: Vec<TransformedReference>,
    /// First selected reference before the change.
    pub old_first: Option<TransformedReference>,
    /// First selected reference after the change.
    pub new_first: Option<TransformedReference>,
    /// Set when a reference changed properties while staying selected.
    pub modified: Option<TransformedReference>,
}

struct RankingResult {
    departures: Vec<TransformedReference>,
    arrivals: Vec<TransformedReference>,
    selected: Vec<TransformedReference>,
}

/// Runs a tracking chain over a reference. `None` means some interceptor
/// dropped it. A panicking interceptor drops the reference too; the chain is
/// never aborted by one bad actor.
pub(crate) fn run_accept_chain(
    chain: &[Arc<dyn TrackingInterceptor>],
    dependency: &DependencyDescription,
    reference: TransformedReference,
) -> Option<TransformedReference> {
    let mut accumulator = reference;
    for interceptor in chain {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            interceptor.accept(dependency, accumulator.clone())
        }));
        match outcome {
            Ok(Some(accepted)) => accumulator = accepted,
            Ok(None) => {
                info!(
                    id = %accumulator.id(),
                    dependency = %dependency.id,
                    "service reference rejected by interceptor"
                );
                return None;
            }
            Err(_) => {
                warn!(
                    id = %accumulator.id(),
                    dependency = %dependency.id,
                    "interceptor panicked during accept; dropping the reference"
                );
                return None;
            }
        }
    }
    Some(accumulator)
}

/// Owner of the matching and selected sets of one dependency.
pub(crate) struct SelectedServicesManager {
    /// Accepted (possibly transformed) references, in insertion order.
    matching: Vec<TransformedReference>,
    /// The selected set, exactly as the ranking interceptor returned it.
    selected: Vec<TransformedReference>,
    /// Dynamically attached tracking interceptors, most recent first.
    chain: VecDeque<Arc<dyn TrackingInterceptor>>,
    /// The terminal filter interceptor, when a filter is configured.
    filter_interceptor: Option<Arc<FilterTrackingInterceptor>>,
    /// The single ranking authority.
    ranking: Arc<dyn RankingInterceptor>,
    /// The configured comparator, restored as ranking fallback.
    comparator: Option<Arc<dyn ReferenceComparator>>,
}

impl SelectedServicesManager {
    pub(crate) fn new(
        filter: Option<LdapFilter>,
        comparator: Option<Arc<dyn ReferenceComparator>>,
    ) -> Self {
        let ranking: Arc<dyn RankingInterceptor> = match &comparator {
            Some(cmp) => Arc::new(ComparatorRanking::new(cmp.clone())),
            None => Arc::new(NaturalOrderRanking),
        };
        SelectedServicesManager {
            matching: Vec::new(),
            selected: Vec::new(),
            chain: VecDeque::new(),
            filter_interceptor: filter.map(|f| Arc::new(FilterTrackingInterceptor::new(f))),
            ranking,
            comparator,
        }
    }

    /// The full accept chain, dynamic interceptors first, filter last.
    pub(crate) fn chain_snapshot(&self) -> Vec<Arc<dyn TrackingInterceptor>> {
        let mut chain: Vec<Arc<dyn TrackingInterceptor>> =
            self.chain.iter().cloned().collect();
        if let Some(filter) = &self.filter_interceptor {
            chain.push(filter.clone() as Arc<dyn TrackingInterceptor>);
        }
        chain
    }

    pub(crate) fn matching(&self) -> Vec<TransformedReference> {
        self.matching.clone()
    }

    pub(crate) fn selected(&self) -> Vec<TransformedReference> {
        self.selected.clone()
    }

    pub(crate) fn matching_is_empty(&self) -> bool {
        self.matching.is_empty()
    }

    pub(crate) fn filter(&self) -> Option<&LdapFilter> {
        self.filter_interceptor.as_ref().map(|f| f.filter())
    }

    pub(crate) fn comparator(&self) -> Option<Arc<dyn ReferenceComparator>> {
        self.comparator.clone()
    }

    pub(crate) fn ranking(&self) -> Arc<dyn RankingInterceptor> {
        self.ranking.clone()
    }

    /// A reference arrived in the tracked set.
    pub(crate) fn on_added(
        &mut self,
        dependency: &DependencyDescription,
        reference: &ServiceReference,
    ) -> Option<ChangeSet> {
        if self.matching.iter().any(|r| r.id() == reference.id()) {
            return None;
        }
        let accepted = run_accept_chain(
            &self.chain_snapshot(),
            dependency,
            TransformedReference::new(reference.clone()),
        )?;
        self.matching.push(accepted.clone());
        let before = self.selected.clone();
        let ranked = self.rank(&before, |ranking, matching| {
            ranking.on_service_arrival(dependency, matching, &accepted)
        });
        Some(self.finish(before, ranked, None))
    }

    /// A tracked reference changed properties. Three cases: still accepted
    /// (modification), no longer accepted (departure), newly accepted
    /// (arrival).
    pub(crate) fn on_modified(
        &mut self,
        dependency: &DependencyDescription,
        reference: &ServiceReference,
    ) -> Option<ChangeSet> {
        let position = self.matching.iter().position(|r| r.id() == reference.id());
        let Some(idx) = position else {
            // Not matching before; a property change may let it in now.
            return self.on_added(dependency, reference);
        };

        let initial = self.matching[idx].clone();
        let accepted = run_accept_chain(
            &self.chain_snapshot(),
            dependency,
            TransformedReference::new(reference.clone()),
        );
        match accepted {
            None => {
                self.matching.remove(idx);
                let before = self.selected.clone();
                let ranked = self.rank(&before, |ranking, matching| {
                    ranking.on_service_departure(dependency, matching, &initial)
                });
                Some(self.finish(before, ranked, None))
            }
            Some(transformed) => {
                if strictly_equal(&initial, &transformed) {
                    // Nothing observable changed; swallow the event.
                    return None;
                }
                self.matching[idx] = transformed.clone();
                let before = self.selected.clone();
                let ranked = self.rank(&before, |ranking, matching| {
                    ranking.on_service_modified(dependency, matching, &transformed)
                });
                Some(self.finish(before, ranked, Some(transformed)))
            }
        }
    }

    /// A tracked reference left.
    pub(crate) fn on_removed(
        &mut self,
        dependency: &DependencyDescription,
        reference: &ServiceReference,
    ) -> Option<ChangeSet> {
        let idx = self.matching.iter().position(|r| r.id() == reference.id())?;
        let initial = self.matching.remove(idx);
        let before = self.selected.clone();
        let ranked = self.rank(&before, |ranking, matching| {
            ranking.on_service_departure(dependency, matching, &initial)
        });
        Some(self.finish(before, ranked, None))
    }

    /// Re-runs the whole pipeline over the tracked set. Used whenever the
    /// accept chain itself changed.
    pub(crate) fn rebuild(
        &mut self,
        dependency: &DependencyDescription,
        tracked: &[ServiceReference],
    ) -> ChangeSet {
        let chain = self.chain_snapshot();
        self.matching.clear();
        for reference in tracked {
            if let Some(accepted) = run_accept_chain(
                &chain,
                dependency,
                TransformedReference::new(reference.clone()),
            ) {
                self.matching.push(accepted);
            }
        }
        debug!(
            dependency = %dependency.id,
            matching = self.matching.len(),
            tracked = tracked.len(),
            "matching set rebuilt"
        );

        let before = self.selected.clone();
        let ranked = if self.matching.is_empty() {
            Vec::new()
        } else {
            self.rank(&before, |ranking, matching| {
                ranking.get_service_references(dependency, matching)
            })
        };
        let mut set = self.finish(before, ranked, None);
        // The same provider surviving the rebuild with different properties
        // is a modification, not an arrival.
        if let (Some(old), Some(new)) = (&set.old_first, &set.new_first) {
            if old.id() == new.id() && !strictly_equal(old, new) {
                set.modified = Some(new.clone());
            }
        }
        set
    }

    /// Replaces the terminal filter. With no tracked snapshot (tracking not
    /// started) only the chain changes and the diff is empty.
    pub(crate) fn set_filter(
        &mut self,
        dependency: &DependencyDescription,
        filter: Option<LdapFilter>,
        tracked: Option<&[ServiceReference]>,
    ) -> ChangeSet {
        self.filter_interceptor = filter.map(|f| Arc::new(FilterTrackingInterceptor::new(f)));
        match tracked {
            Some(tracked) => self.rebuild(dependency, tracked),
            None => ChangeSet::default(),
        }
    }

    /// Replaces the comparator and restores comparator-based ranking.
    pub(crate) fn set_comparator(
        &mut self,
        dependency: &DependencyDescription,
        comparator: Option<Arc<dyn ReferenceComparator>>,
    ) -> ChangeSet {
        self.comparator = comparator;
        let ranking: Arc<dyn RankingInterceptor> = match &self.comparator {
            Some(cmp) => Arc::new(ComparatorRanking::new(cmp.clone())),
            None => Arc::new(NaturalOrderRanking),
        };
        self.install_ranking(dependency, ranking)
    }

    /// Installs a ranking interceptor as the sole ranking authority and
    /// recomputes the selected set.
    pub(crate) fn install_ranking(
        &mut self,
        dependency: &DependencyDescription,
        ranking: Arc<dyn RankingInterceptor>,
    ) -> ChangeSet {
        self.ranking = ranking;
        let before = self.selected.clone();
        let ranked = if self.matching.is_empty() {
            Vec::new()
        } else {
            self.rank(&before, |ranking, matching| {
                ranking.get_service_references(dependency, matching)
            })
        };
        self.finish(before, ranked, None)
    }

    /// Restores the fallback ranking after a ranking interceptor departs:
    /// comparator-based when a comparator is configured, natural order
    /// otherwise.
    pub(crate) fn restore_default_ranking(
        &mut self,
        dependency: &DependencyDescription,
    ) -> ChangeSet {
        let ranking: Arc<dyn RankingInterceptor> = match &self.comparator {
            Some(cmp) => Arc::new(ComparatorRanking::new(cmp.clone())),
            None => Arc::new(NaturalOrderRanking),
        };
        self.install_ranking(dependency, ranking)
    }

    /// Attaches a tracking interceptor at the head of the chain.
    pub(crate) fn add_tracking_interceptor(
        &mut self,
        dependency: &DependencyDescription,
        interceptor: Arc<dyn TrackingInterceptor>,
        tracked: &[ServiceReference],
    ) -> ChangeSet {
        self.chain.push_front(interceptor);
        self.rebuild(dependency, tracked)
    }

    /// Detaches a tracking interceptor. Returns `None` when it was not in the
    /// chain.
    pub(crate) fn remove_tracking_interceptor(
        &mut self,
        dependency: &DependencyDescription,
        interceptor: &Arc<dyn TrackingInterceptor>,
        tracked: &[ServiceReference],
    ) -> Option<ChangeSet> {
        let len = self.chain.len();
        self.chain.retain(|i| !Arc::ptr_eq(i, interceptor));
        if self.chain.len() == len {
            return None;
        }
        Some(self.rebuild(dependency, tracked))
    }

    /// Empties every set and hands the attached interceptors back so their
    /// `close` hooks can run outside the lock.
    pub(crate) fn clear(&mut self) -> (Vec<Arc<dyn TrackingInterceptor>>, Arc<dyn RankingInterceptor>) {
        self.matching.clear();
        self.selected.clear();
        let interceptors = std::mem::take(&mut self.chain).into_iter().collect();
        (interceptors, self.ranking.clone())
    }

    /// Runs the ranking interceptor, falling back to the previous selected
    /// set when it panics.
    fn rank<F>(&self, before: &[TransformedReference], f: F) -> Vec<TransformedReference>
    where
        F: FnOnce(&dyn RankingInterceptor, &[TransformedReference]) -> Vec<TransformedReference>,
    {
        let matching = self.matching.clone();
        let ranking = self.ranking.clone();
        match catch_unwind(AssertUnwindSafe(move || f(&*ranking, &matching))) {
            Ok(ranked) => ranked,
            Err(_) => {
                warn!("ranking interceptor panicked; keeping the previous selection");
                before.to_vec()
            }
        }
    }

    /// Installs the new selected set and diffs it against the previous one.
    fn finish(
        &mut self,
        before: Vec<TransformedReference>,
        ranked: Vec<TransformedReference>,
        modified: Option<TransformedReference>,
    ) -> ChangeSet {
        let departures: Vec<TransformedReference> = before
            .iter()
            .filter(|old| !ranked.contains(old))
            .cloned()
            .collect();
        let arrivals: Vec<TransformedReference> = ranked
            .iter()
            .filter(|new| !before.contains(new))
            .cloned()
            .collect();
        let result = RankingResult {
            departures,
            arrivals,
            selected: ranked,
        };
        self.selected = result.selected;
        ChangeSet {
            selected: self.selected.clone(),
            departures: result.departures,
            arrivals: result.arrivals,
            old_first: before.into_iter().next(),
            new_first: self.selected.first().cloned(),
            modified,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::InstanceState;
    use crate::dependency::DependencyState;
    use crate::properties::{PropertyMap, SERVICE_RANKING};
    use crate::reference::ServiceId;

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

    fn reference(id: i64, rank: i64) -> ServiceReference {
        ServiceReference::new(
            ServiceId(id),
            PropertyMap::new().with(SERVICE_RANKING, rank),
        )
    }

    fn ids(refs: &[TransformedReference]) -> Vec<i64> {
        refs.iter().map(|r| r.id().0).collect()
    }

    #[test]
    fn arrival_diffs_against_previous_selection() {
        let mut manager = SelectedServicesManager::new(None, None);
        let desc = description();

        let set = manager.on_added(&desc, &reference(1, 0)).unwrap();
        assert_eq!(ids(&set.arrivals), vec![1]);
        assert!(set.departures.is_empty());
        assert_eq!(set.old_first, None);
        assert_eq!(set.new_first.as_ref().map(|r| r.id().0), Some(1));

        // A better provider takes the head of the selection.
        let set = manager.on_added(&desc, &reference(2, 10)).unwrap();
        assert_eq!(ids(&set.arrivals), vec![2]);
        assert!(set.departures.is_empty());
        assert_eq!(ids(&set.selected), vec![2, 1]);
        assert_eq!(set.new_first.as_ref().map(|r| r.id().0), Some(2));
    }

    #[test]
    fn duplicate_arrivals_are_ignored() {
        let mut manager = SelectedServicesManager::new(None, None);
        let desc = description();
        assert!(manager.on_added(&desc, &reference(1, 0)).is_some());
        assert!(manager.on_added(&desc, &reference(1, 0)).is_none());
        assert_eq!(manager.matching().len(), 1);
    }

    #[test]
    fn filter_drops_non_matching_references() {
        let filter = LdapFilter::parse("(lang=en)").unwrap();
        let mut manager = SelectedServicesManager::new(Some(filter), None);
        let desc = description();

        let en = ServiceReference::new(ServiceId(1), PropertyMap::new().with("lang", "en"));
        let fr = ServiceReference::new(ServiceId(2), PropertyMap::new().with("lang", "fr"));

        assert!(manager.on_added(&desc, &en).is_some());
        assert!(manager.on_added(&desc, &fr).is_none());
        assert_eq!(manager.matching().len(), 1);
    }

    #[test]
    fn modification_fires_only_on_strict_inequality() {
        let mut manager = SelectedServicesManager::new(None, None);
        let desc = description();
        let original = ServiceReference::new(ServiceId(1), PropertyMap::new().with("lang", "en"));
        manager.on_added(&desc, &original).unwrap();

        // Same properties: swallowed.
        assert!(manager.on_modified(&desc, &original).is_none());

        // Changed properties: modification.
        let changed = ServiceReference::new(ServiceId(1), PropertyMap::new().with("lang", "fr"));
        let set = manager.on_modified(&desc, &changed).unwrap();
        assert_eq!(set.modified.as_ref().map(|r| r.id().0), Some(1));
        assert!(set.arrivals.is_empty());
        assert!(set.departures.is_empty());
    }

    #[test]
    fn modification_out_of_filter_is_a_departure() {
        let filter = LdapFilter::parse("(lang=en)").unwrap();
        let mut manager = SelectedServicesManager::new(Some(filter), None);
        let desc = description();
        let en = ServiceReference::new(ServiceId(1), PropertyMap::new().with("lang", "en"));
        manager.on_added(&desc, &en).unwrap();

        let fr = ServiceReference::new(ServiceId(1), PropertyMap::new().with("lang", "fr"));
        let set = manager.on_modified(&desc, &fr).unwrap();
        assert_eq!(ids(&set.departures), vec![1]);
        assert!(set.modified.is_none());
        assert!(manager.matching_is_empty());

        // And back in: an arrival.
        let set = manager.on_modified(&desc, &en).unwrap();
        assert_eq!(ids(&set.arrivals), vec![1]);
    }

    #[test]
    fn removal_departs() {
        let mut manager = SelectedServicesManager::new(None, None);
        let desc = description();
        manager.on_added(&desc, &reference(1, 0)).unwrap();
        let set = manager.on_removed(&desc, &reference(1, 0)).unwrap();
        assert_eq!(ids(&set.departures), vec![1]);
        assert!(manager.selected().is_empty());
        assert!(manager.on_removed(&desc, &reference(1, 0)).is_none());
    }

    #[test]
    fn interceptor_churn_rebuilds_and_diffs() {
        struct OnlyEven;
        impl TrackingInterceptor for OnlyEven {
            fn accept(
                &self,
                _dependency: &DependencyDescription,
                reference: TransformedReference,
            ) -> Option<TransformedReference> {
                (reference.id().0 % 2 == 0).then_some(reference)
            }
        }

        let mut manager = SelectedServicesManager::new(None, None);
        let desc = description();
        let tracked = vec![reference(1, 0), reference(2, 0), reference(3, 0)];
        for r in &tracked {
            manager.on_added(&desc, r);
        }
        assert_eq!(manager.selected().len(), 3);

        let interceptor: Arc<dyn TrackingInterceptor> = Arc::new(OnlyEven);
        let set = manager.add_tracking_interceptor(&desc, interceptor.clone(), &tracked);
        assert_eq!(ids(&set.departures), vec![1, 3]);
        assert!(set.arrivals.is_empty());
        assert_eq!(ids(&set.selected), vec![2]);

        let set = manager
            .remove_tracking_interceptor(&desc, &interceptor, &tracked)
            .unwrap();
        assert_eq!(ids(&set.arrivals), vec![1, 3]);
        assert!(set.departures.is_empty());
    }

    #[test]
    fn panicking_interceptor_drops_only_the_reference() {
        struct Grenade;
        impl TrackingInterceptor for Grenade {
            fn accept(
                &self,
                _dependency: &DependencyDescription,
                reference: TransformedReference,
            ) -> Option<TransformedReference> {
                if reference.id().0 == 2 {
                    panic!("boom");
                }
                Some(reference)
            }
        }

        let mut manager = SelectedServicesManager::new(None, None);
        let desc = description();
        let tracked = vec![reference(1, 0), reference(2, 0)];
        let set = manager.add_tracking_interceptor(&desc, Arc::new(Grenade), &tracked);
        assert_eq!(ids(&set.selected), vec![1]);
    }

    #[test]
    fn ranking_interceptor_owns_the_selection() {
        struct Reversed;
        impl RankingInterceptor for Reversed {
            fn get_service_references(
                &self,
                _dependency: &DependencyDescription,
                matching: &[TransformedReference],
            ) -> Vec<TransformedReference> {
                let mut selected = matching.to_vec();
                selected.sort();
                selected.reverse();
                selected
            }
        }

        let mut manager = SelectedServicesManager::new(None, None);
        let desc = description();
        manager.on_added(&desc, &reference(1, 0));
        manager.on_added(&desc, &reference(2, 10));
        assert_eq!(ids(&manager.selected()), vec![2, 1]);

        let set = manager.install_ranking(&desc, Arc::new(Reversed));
        assert_eq!(ids(&set.selected), vec![1, 2]);
        assert!(set.arrivals.is_empty());
        assert!(set.departures.is_empty());

        let set = manager.restore_default_ranking(&desc);
        assert_eq!(ids(&set.selected), vec![2, 1]);
    }

    #[test]
    fn pruning_ranker_departs_the_pruned() {
        struct TopOne;
        impl RankingInterceptor for TopOne {
            fn get_service_references(
                &self,
                _dependency: &DependencyDescription,
                matching: &[TransformedReference],
            ) -> Vec<TransformedReference> {
                let mut selected = matching.to_vec();
                selected.sort();
                selected.truncate(1);
                selected
            }
        }

        let mut manager = SelectedServicesManager::new(None, None);
        let desc = description();
        manager.on_added(&desc, &reference(1, 0));
        manager.on_added(&desc, &reference(2, 10));

        let set = manager.install_ranking(&desc, Arc::new(TopOne));
        assert_eq!(ids(&set.selected), vec![2]);
        assert_eq!(ids(&set.departures), vec![1]);
        // Selected stays a subset of matching.
        assert_eq!(manager.matching().len(), 2);
    }
}
