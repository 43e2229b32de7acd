//! Candidate Selection
//!
//! Picks at most one region move per tick:
//!
//! ```text
//!   stores ──group by (engine, rule scope)──► groups
//!     │
//!     ├─ evacuation: retired stores still hosting regions, fullest first
//!     └─ balance:    Up stores by score, highest source × lowest target
//!                        │
//!            pair ───────┴──► sample source regions ──► checks ──► first pass wins
//! ```
//!
//! Work per tick is bounded by two budgets: `max_pair_attempts` pairs across
//! all groups, and `region_sample_size` regions per source. Sampling is
//! seeded from the configured seed, the snapshot version and the source
//! store, so an unchanged snapshot always yields the same decision.

use super::diagnostic::{CandidateRejection, PairOutcome, PairRecord, RegionRejection};
use crate::cluster::{ClusterView, Region, RegionId, Store, StoreId};
use crate::config::SchedulerConfig;
use crate::operator::{ControllerLoad, OperatorKind};
use crate::placement::{PlacementEvaluator, RuleKey};
use crate::scoring::{
    move_keeps_order, score_stores, tolerance_band, CapacityAwareScorer, ScoredStore,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

// =============================================================================
// Selection Result
// =============================================================================

/// The move chosen by a selection pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MoveCandidate {
    pub region_id: RegionId,
    pub source: StoreId,
    pub target: StoreId,
    pub kind: OperatorKind,
    pub source_score: f64,
    pub target_score: f64,
}

/// Result of one selection pass
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub tolerance_band: f64,
    pub candidate: Option<MoveCandidate>,
    /// Examined pairs in examination order
    pub pairs: Vec<PairRecord>,
}

impl Selection {
    pub fn rejected_regions(&self) -> usize {
        self.pairs.iter().map(|p| p.rejections.len()).sum()
    }
}

// =============================================================================
// Comparison Groups
// =============================================================================

/// Stores whose scores may be compared with each other
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct GroupKey {
    engine: String,
    rules: Vec<RuleKey>,
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.engine)?;
        if !self.rules.is_empty() {
            let rules: Vec<String> = self.rules.iter().map(ToString::to_string).collect();
            write!(f, "[{}]", rules.join(","))?;
        }
        Ok(())
    }
}

struct ComparisonGroup<'v> {
    name: String,
    scorer: CapacityAwareScorer,
    /// Retired stores with regions left, most regions first
    evacuees: Vec<ScoredStore>,
    /// Up stores, highest score first
    sources: Vec<ScoredStore>,
    /// Up stores, lowest score first
    targets: Vec<ScoredStore>,
    stores: BTreeMap<StoreId, &'v Store>,
}

// =============================================================================
// Candidate Selector
// =============================================================================

/// One selection pass over a snapshot
pub struct CandidateSelector<'a> {
    view: &'a ClusterView,
    config: &'a SchedulerConfig,
    evaluator: &'a PlacementEvaluator,
    load: &'a ControllerLoad,
    band: f64,
    hint: f64,
}

impl<'a> CandidateSelector<'a> {
    pub fn new(
        view: &'a ClusterView,
        config: &'a SchedulerConfig,
        evaluator: &'a PlacementEvaluator,
        load: &'a ControllerLoad,
    ) -> Self {
        Self {
            view,
            config,
            evaluator,
            load,
            band: tolerance_band(view, config),
            hint: view.average_region_size_mb(),
        }
    }

    pub fn tolerance_band(&self) -> f64 {
        self.band
    }

    /// Run the pass. Finding nothing is the normal outcome on a balanced
    /// cluster.
    pub fn select(&self) -> Selection {
        let groups = self.comparison_groups();
        let mut pairs = Vec::new();
        let candidate = self.search(&groups, &mut pairs);

        match &candidate {
            Some(c) => debug!(
                region_id = %c.region_id,
                source = %c.source,
                target = %c.target,
                kind = %c.kind,
                pairs = pairs.len(),
                "move selected"
            ),
            None => debug!(pairs = pairs.len(), "no move selected"),
        }

        Selection {
            tolerance_band: self.band,
            candidate,
            pairs,
        }
    }

    /// Evacuation pairs of every group first, then balance pairs
    fn search(
        &self,
        groups: &[ComparisonGroup<'a>],
        pairs: &mut Vec<PairRecord>,
    ) -> Option<MoveCandidate> {
        let budget = self.config.max_pair_attempts;
        let mut attempts = 0usize;

        if self.config.evacuate_retired_stores {
            for group in groups {
                if let Some(found) = self.evacuate(group, pairs, &mut attempts, budget) {
                    return Some(found);
                }
            }
        }
        for group in groups {
            if let Some(found) = self.balance(group, pairs, &mut attempts, budget) {
                return Some(found);
            }
        }
        None
    }

    fn comparison_groups(&self) -> Vec<ComparisonGroup<'a>> {
        let mut by_key: BTreeMap<GroupKey, Vec<&'a Store>> = BTreeMap::new();
        for store in self.view.stores() {
            let key = GroupKey {
                engine: store.engine().to_string(),
                rules: if self.config.placement_rules_enabled {
                    self.evaluator.rules_for_store(store)
                } else {
                    Vec::new()
                },
            };
            by_key.entry(key).or_default().push(store);
        }

        by_key
            .into_iter()
            .map(|(key, stores)| {
                let scorer =
                    CapacityAwareScorer::for_group(self.config.scoring, stores.iter().copied());
                let up: Vec<&Store> = stores.iter().copied().filter(|s| s.is_up()).collect();

                let mut sources = score_stores(&scorer, up.iter().copied(), self.hint);
                sources.sort_by(ScoredStore::source_order);
                let mut targets = sources.clone();
                targets.sort_by(ScoredStore::target_order);

                let mut retired: Vec<&Store> = stores
                    .iter()
                    .copied()
                    .filter(|s| s.is_retired() && s.region_count > 0)
                    .collect();
                retired.sort_by(|a, b| b.region_count.cmp(&a.region_count).then(a.id.cmp(&b.id)));
                let evacuees = score_stores(&scorer, retired, self.hint);

                ComparisonGroup {
                    name: key.to_string(),
                    scorer,
                    evacuees,
                    sources,
                    targets,
                    stores: stores.into_iter().map(|s| (s.id, s)).collect(),
                }
            })
            .collect()
    }

    fn evacuate(
        &self,
        group: &ComparisonGroup<'a>,
        pairs: &mut Vec<PairRecord>,
        attempts: &mut usize,
        budget: usize,
    ) -> Option<MoveCandidate> {
        for source in &group.evacuees {
            for target in &group.targets {
                if *attempts >= budget {
                    return None;
                }
                *attempts += 1;
                if let Some(found) = self.try_pair(group, *source, *target, true, pairs) {
                    return Some(found);
                }
            }
        }
        None
    }

    fn balance(
        &self,
        group: &ComparisonGroup<'a>,
        pairs: &mut Vec<PairRecord>,
        attempts: &mut usize,
        budget: usize,
    ) -> Option<MoveCandidate> {
        for source in &group.sources {
            for target in &group.targets {
                if target.store_id == source.store_id {
                    continue;
                }
                if *attempts >= budget {
                    return None;
                }
                *attempts += 1;

                // Targets come lowest first: once the best target is within
                // the band, every remaining pair of this group is too.
                if source.score - target.score <= self.band {
                    let outcome = PairOutcome::Balanced;
                    pairs.push(self.record(group, *source, *target, false, outcome, Vec::new()));
                    return None;
                }
                if let Some(found) = self.try_pair(group, *source, *target, false, pairs) {
                    return Some(found);
                }
                if matches!(pairs.last(), Some(p) if p.outcome == PairOutcome::SourceSaturated) {
                    break;
                }
            }
        }
        None
    }

    fn record(
        &self,
        group: &ComparisonGroup<'a>,
        source: ScoredStore,
        target: ScoredStore,
        evacuation: bool,
        outcome: PairOutcome,
        rejections: Vec<RegionRejection>,
    ) -> PairRecord {
        PairRecord {
            group: group.name.clone(),
            source,
            target,
            evacuation,
            outcome,
            rejections,
        }
    }

    fn try_pair(
        &self,
        group: &ComparisonGroup<'a>,
        source: ScoredStore,
        target: ScoredStore,
        evacuation: bool,
        pairs: &mut Vec<PairRecord>,
    ) -> Option<MoveCandidate> {
        if self.load.is_store_saturated(source.store_id) {
            let outcome = PairOutcome::SourceSaturated;
            pairs.push(self.record(group, source, target, evacuation, outcome, Vec::new()));
            return None;
        }
        if self.load.is_store_saturated(target.store_id) {
            let outcome = PairOutcome::TargetSaturated;
            pairs.push(self.record(group, source, target, evacuation, outcome, Vec::new()));
            return None;
        }

        let (source_store, target_store) = match (
            group.stores.get(&source.store_id),
            group.stores.get(&target.store_id),
        ) {
            (Some(s), Some(t)) => (*s, *t),
            _ => return None,
        };

        let mut rejections = Vec::new();
        for region_id in self.sample_regions(source.store_id) {
            match self.check_region(group, region_id, source_store, target_store, evacuation) {
                Ok(()) => {
                    pairs.push(self.record(
                        group,
                        source,
                        target,
                        evacuation,
                        PairOutcome::Selected { region_id },
                        rejections,
                    ));
                    return Some(MoveCandidate {
                        region_id,
                        source: source.store_id,
                        target: target.store_id,
                        kind: if evacuation {
                            OperatorKind::Evacuation
                        } else {
                            OperatorKind::Balance
                        },
                        source_score: source.score,
                        target_score: target.score,
                    });
                }
                Err(reason) => rejections.push(RegionRejection { region_id, reason }),
            }
        }

        let outcome = PairOutcome::NoMovableRegion;
        pairs.push(self.record(group, source, target, evacuation, outcome, rejections));
        None
    }

    /// Bounded, reproducible sample of the source's regions in ID order
    fn sample_regions(&self, store_id: StoreId) -> Vec<RegionId> {
        let hosted = self.view.regions_on_store(store_id);
        let amount = self.config.region_sample_size;
        if hosted.len() <= amount {
            return hosted.to_vec();
        }

        let seed = self.config.sample_seed ^ self.view.version() ^ store_id.0.rotate_left(32);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut picked = rand::seq::index::sample(&mut rng, hosted.len(), amount).into_vec();
        picked.sort_unstable();
        picked.into_iter().map(|i| hosted[i]).collect()
    }

    fn check_region(
        &self,
        group: &ComparisonGroup<'a>,
        region_id: RegionId,
        source: &Store,
        target: &Store,
        evacuation: bool,
    ) -> Result<(), CandidateRejection> {
        let region: &Region = match self.view.require_region(region_id) {
            Ok(region) => region,
            Err(err) => {
                debug!(region_id = %region_id, error = %err, "skipping stale candidate");
                return Err(CandidateRejection::StaleSnapshot);
            }
        };
        if let Some(err) = region.store_ids().find_map(|id| self.view.require_store(id).err()) {
            debug!(region_id = %region_id, error = %err, "skipping stale candidate");
            return Err(CandidateRejection::StaleSnapshot);
        }
        if self.load.is_region_busy(region_id) {
            return Err(CandidateRejection::RegionBusy);
        }
        if !target.is_up() {
            return Err(CandidateRejection::TargetUnavailable);
        }
        if region.has_peer_on(target.id) {
            return Err(CandidateRejection::TargetHasReplica);
        }
        if !self.evaluator.fit_region(self.view, region).counts_satisfied() {
            return Err(CandidateRejection::RegionUnhealthy);
        }

        let proposed = region
            .peers_after_move(source.id, target.id)
            .ok_or(CandidateRejection::StaleSnapshot)?;
        if let Err(violation) = self
            .evaluator
            .check_move(self.view, region, &proposed, evacuation)
        {
            debug!(
                region_id = %region_id,
                source = %source.id,
                target = %target.id,
                %violation,
                "placement rejects move"
            );
            return Err(CandidateRejection::PlacementViolation);
        }

        if !evacuation
            && !move_keeps_order(&group.scorer, source, target, region, self.hint, self.band)
        {
            return Err(CandidateRejection::ToleranceNotExceeded);
        }
        Ok(())
    }
}
