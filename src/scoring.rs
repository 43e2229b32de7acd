//! Store Scoring
//!
//! A store's score estimates how loaded it is: higher scores make better
//! move sources, lower scores better targets. Scores blend region count
//! (scaled by a region size hint so both terms are in MiB) with used space,
//! then normalize by capacity so that a large store is compared on its
//! utilization instead of its raw load.
//!
//! Scores are only comparable inside one comparison group (same engine,
//! same rule scope); the scorer is built per group for that reason.

use crate::cluster::{ClusterView, Region, Store, StoreId};
use crate::config::{SchedulerConfig, ScoringWeights, ToleranceMode};
use serde::Serialize;
use std::cmp::Ordering;

// =============================================================================
// Scorer
// =============================================================================

/// Computes a load score for a store
pub trait StoreScorer: Send + Sync {
    /// Score with the store's current load
    fn score(&self, store: &Store, region_size_hint: f64) -> f64;

    /// Score after the store gains (`delta_regions > 0`) or loses a region
    /// of `region_size_mb`
    fn projected_score(
        &self,
        store: &Store,
        delta_regions: i64,
        region_size_mb: u64,
        region_size_hint: f64,
    ) -> f64;
}

/// Default scorer: weighted load normalized against the group's mean
/// capacity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacityAwareScorer {
    weights: ScoringWeights,
    reference_capacity_mb: f64,
}

impl CapacityAwareScorer {
    pub fn new(weights: ScoringWeights, reference_capacity_mb: f64) -> Self {
        Self {
            weights,
            reference_capacity_mb,
        }
    }

    /// Scorer whose reference capacity is the mean capacity of `stores`
    pub fn for_group<'a>(
        weights: ScoringWeights,
        stores: impl IntoIterator<Item = &'a Store>,
    ) -> Self {
        let (sum, n) = stores
            .into_iter()
            .filter(|s| s.capacity_mb > 0)
            .fold((0u128, 0u64), |(sum, n), s| (sum + s.capacity_mb as u128, n + 1));
        let reference = if n == 0 { 0.0 } else { sum as f64 / n as f64 };
        Self::new(weights, reference)
    }

    fn load(&self, region_count: f64, used_mb: f64, hint: f64, capacity_mb: u64) -> f64 {
        let raw = self.weights.region_count * region_count * hint
            + self.weights.used_space * used_mb;
        // Stores without a reported capacity are compared on raw load.
        if capacity_mb == 0 || self.reference_capacity_mb <= 0.0 {
            raw
        } else {
            raw * self.reference_capacity_mb / capacity_mb as f64
        }
    }
}

impl StoreScorer for CapacityAwareScorer {
    fn score(&self, store: &Store, region_size_hint: f64) -> f64 {
        self.load(
            store.region_count as f64,
            store.used_mb as f64,
            region_size_hint,
            store.capacity_mb,
        )
    }

    fn projected_score(
        &self,
        store: &Store,
        delta_regions: i64,
        region_size_mb: u64,
        region_size_hint: f64,
    ) -> f64 {
        let size = region_size_mb as f64 * delta_regions.signum() as f64;
        let regions = (store.region_count as f64 + delta_regions as f64).max(0.0);
        let used = (store.used_mb as f64 + size).max(0.0);
        self.load(regions, used, region_size_hint, store.capacity_mb)
    }
}

// =============================================================================
// Tolerance
// =============================================================================

/// Dead-band in score units; stores closer than this are balanced
pub fn tolerance_band(view: &ClusterView, config: &SchedulerConfig) -> f64 {
    match config.tolerance_mode {
        ToleranceMode::ScaledByRegionSize => {
            config.tolerant_size_ratio * view.average_region_size_mb()
        }
        ToleranceMode::Fixed => config.tolerant_size_ratio,
    }
}

/// Whether moving `region` from `source` to `target` still narrows the gap
/// by more than the dead-band allows it to overshoot
pub fn move_keeps_order(
    scorer: &dyn StoreScorer,
    source: &Store,
    target: &Store,
    region: &Region,
    hint: f64,
    band: f64,
) -> bool {
    let source_after = scorer.projected_score(source, -1, region.approximate_size_mb, hint);
    let target_after = scorer.projected_score(target, 1, region.approximate_size_mb, hint);
    target_after - source_after < band
}

// =============================================================================
// Ranking
// =============================================================================

/// A store with its score, ordered deterministically
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredStore {
    pub store_id: StoreId,
    pub score: f64,
}

impl ScoredStore {
    /// Highest score first, ties broken by ascending store ID
    pub fn source_order(a: &Self, b: &Self) -> Ordering {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.store_id.cmp(&b.store_id))
    }

    /// Lowest score first, ties broken by ascending store ID
    pub fn target_order(a: &Self, b: &Self) -> Ordering {
        a.score
            .total_cmp(&b.score)
            .then_with(|| a.store_id.cmp(&b.store_id))
    }
}

/// Score every store with the same scorer and hint
pub fn score_stores<'a>(
    scorer: &dyn StoreScorer,
    stores: impl IntoIterator<Item = &'a Store>,
    hint: f64,
) -> Vec<ScoredStore> {
    stores
        .into_iter()
        .map(|s| ScoredStore {
            store_id: s.id,
            score: scorer.score(s, hint),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn used_only() -> ScoringWeights {
        ScoringWeights {
            region_count: 0.0,
            used_space: 1.0,
        }
    }

    #[test]
    fn test_heterogeneous_capacity_compares_utilization() {
        let small = Store::new(1, 1000, 500);
        let large = Store::new(2, 3000, 900);
        let scorer = CapacityAwareScorer::for_group(used_only(), [&small, &large]);

        // 50% full vs 30% full: the small store is the busier one.
        assert!(scorer.score(&small, 1.0) > scorer.score(&large, 1.0));
    }

    #[test]
    fn test_region_count_scaled_by_hint() {
        let weights = ScoringWeights {
            region_count: 1.0,
            used_space: 0.0,
        };
        let mut store = Store::new(1, 100, 0);
        store.region_count = 10;
        let scorer = CapacityAwareScorer::for_group(weights, [&store]);

        assert!((scorer.score(&store, 4.0) - 40.0).abs() < 1e-9);
        assert!((scorer.projected_score(&store, -1, 4, 4.0) - 36.0).abs() < 1e-9);
        assert!((scorer.projected_score(&store, 1, 4, 4.0) - 44.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_capacity_uses_raw_load() {
        let store = Store::new(1, 0, 42);
        let scorer = CapacityAwareScorer::for_group(used_only(), [&store]);
        assert!((scorer.score(&store, 1.0) - 42.0).abs() < 1e-9);
    }

    #[test]
    fn test_tolerance_modes() {
        let view = ClusterView::builder()
            .store(Store::new(1, 100, 0))
            .region(Region::new(1, 8, vec![crate::cluster::Peer::voter(1)]))
            .replication(crate::config::ReplicationConfig {
                max_replicas: 1,
                ..Default::default()
            })
            .build()
            .unwrap();

        let mut config = SchedulerConfig {
            tolerant_size_ratio: 2.0,
            ..Default::default()
        };
        assert!((tolerance_band(&view, &config) - 16.0).abs() < 1e-9);

        config.tolerance_mode = ToleranceMode::Fixed;
        assert!((tolerance_band(&view, &config) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_ordering_ties_break_on_store_id() {
        let mut stores = vec![
            ScoredStore { store_id: StoreId(3), score: 5.0 },
            ScoredStore { store_id: StoreId(1), score: 5.0 },
            ScoredStore { store_id: StoreId(2), score: 9.0 },
        ];

        stores.sort_by(ScoredStore::source_order);
        let ids: Vec<u64> = stores.iter().map(|s| s.store_id.0).collect();
        assert_eq!(ids, vec![2, 1, 3]);

        stores.sort_by(ScoredStore::target_order);
        let ids: Vec<u64> = stores.iter().map(|s| s.store_id.0).collect();
        assert_eq!(ids, vec![1, 3, 2]);
    }

    #[test]
    fn test_move_keeps_order() {
        let scorer = CapacityAwareScorer::new(used_only(), 0.0);
        let source = Store::new(1, 0, 100);
        let target = Store::new(2, 0, 90);
        let small = Region::new(1, 2, vec![]);
        let big = Region::new(2, 20, vec![]);

        assert!(move_keeps_order(&scorer, &source, &target, &small, 1.0, 5.0));
        // 80 vs 110 overshoots the band.
        assert!(!move_keeps_order(&scorer, &source, &target, &big, 1.0, 5.0));
    }
}
