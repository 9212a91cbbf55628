//! Built-in ranking interceptors and reference comparators.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::description::DependencyDescription;
use crate::interceptors::RankingInterceptor;
use crate::transformed::TransformedReference;

/// Orders service references for selection. Smaller sorts first, so
/// implementations put the preferred provider first.
pub trait ReferenceComparator: Send + Sync {
    /// Compares two references.
    fn compare(&self, a: &TransformedReference, b: &TransformedReference) -> Ordering;
}

impl std::fmt::Debug for dyn ReferenceComparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn ReferenceComparator")
    }
}

/// The standard registry ordering: higher `service.ranking` first, ties
/// broken by lower `service.id` so older registrations win. Overridden
/// rankings on transformed references are honoured.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsgiRankingComparator;

impl ReferenceComparator for OsgiRankingComparator {
    fn compare(&self, a: &TransformedReference, b: &TransformedReference) -> Ordering {
        a.cmp(b)
    }
}

/// Ranks by the natural reference ordering. This is the ranking authority a
/// dependency starts with when no comparator is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NaturalOrderRanking;

impl RankingInterceptor for NaturalOrderRanking {
    fn get_service_references(
        &self,
        _dependency: &DependencyDescription,
        matching: &[TransformedReference],
    ) -> Vec<TransformedReference> {
        let mut selected = matching.to_vec();
        selected.sort();
        selected
    }
}

/// Ranks with a configured [`ReferenceComparator`].
pub struct ComparatorRanking {
    comparator: Arc<dyn ReferenceComparator>,
}

impl ComparatorRanking {
    /// Wraps a comparator.
    pub fn new(comparator: Arc<dyn ReferenceComparator>) -> Self {
        ComparatorRanking { comparator }
    }
}

impl RankingInterceptor for ComparatorRanking {
    fn get_service_references(
        &self,
        _dependency: &DependencyDescription,
        matching: &[TransformedReference],
    ) -> Vec<TransformedReference> {
        let mut selected = matching.to_vec();
        // Stable: equal references keep their insertion order.
        selected.sort_by(|a, b| self.comparator.compare(a, b));
        selected
    }
}
