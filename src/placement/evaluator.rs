//! Placement Evaluator
//!
//! Decides whether a replica layout satisfies the placement rules of a
//! snapshot. The evaluator is built once per tick from a [`ClusterView`];
//! construction is where malformed rules surface, and every evaluation
//! afterwards is a pure function of its inputs.
//!
//! Isolation degrades gracefully: a rule wants each value of its isolation
//! label to host at most `ceil(count / distinct_values)` replicas, where
//! `distinct_values` counts the values actually present among eligible
//! stores. A cluster with fewer zones than replicas is therefore satisfied
//! by the best spread it can offer, and a move is only refused when it
//! makes the spread worse than it already is.

use super::rule::{validate_rules, PlacementRule, RuleKey};
use crate::cluster::{ClusterView, Peer, PeerRole, Region, Store, StoreId};
use crate::error::Result;
use std::collections::{HashMap, HashSet};
use tracing::warn;

// =============================================================================
// Fit Results
// =============================================================================

/// How one rule is satisfied by a replica layout
#[derive(Debug, Clone, PartialEq)]
pub struct RuleFit {
    pub rule: RuleKey,
    /// Stores assigned to this rule
    pub peers: Vec<StoreId>,
    /// Exactly `count` replicas were assigned
    pub count_satisfied: bool,
    /// No isolation value hosts more than its fair share
    pub isolation_satisfied: bool,
    /// Pairwise topology separation; higher is better spread
    pub isolation_score: u64,
}

/// Fit of a whole replica layout against every rule
#[derive(Debug, Clone, PartialEq)]
pub struct RegionFit {
    pub rule_fits: Vec<RuleFit>,
    /// Peers no rule accepted
    pub orphan_peers: Vec<StoreId>,
}

impl RegionFit {
    /// Every rule has its replica count and no peer is orphaned
    pub fn counts_satisfied(&self) -> bool {
        self.orphan_peers.is_empty() && self.rule_fits.iter().all(|f| f.count_satisfied)
    }

    /// Counts and isolation are all satisfied
    pub fn is_satisfied(&self) -> bool {
        self.counts_satisfied() && self.rule_fits.iter().all(|f| f.isolation_satisfied)
    }
}

/// Why a proposed layout was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementViolation {
    CountUnsatisfied { rule: RuleKey },
    OrphanPeer { store_id: StoreId },
    IsolationDegraded { rule: RuleKey },
}

impl std::fmt::Display for PlacementViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlacementViolation::CountUnsatisfied { rule } => {
                write!(f, "rule {} replica count not satisfied", rule)
            }
            PlacementViolation::OrphanPeer { store_id } => {
                write!(f, "peer on store {} matches no rule", store_id)
            }
            PlacementViolation::IsolationDegraded { rule } => {
                write!(f, "rule {} isolation would get worse", rule)
            }
        }
    }
}

// =============================================================================
// Rule Scope
// =============================================================================

/// A rule plus the topology facts derived for it from the snapshot
#[derive(Debug, Clone)]
struct RuleScope {
    rule: PlacementRule,
    key: RuleKey,
    /// Distinct isolation values among eligible stores
    isolation_domains: usize,
}

impl RuleScope {
    fn new(rule: PlacementRule, view: &ClusterView) -> Self {
        let isolation_domains = match rule.isolation_key() {
            Some(label) => {
                let mut values = HashSet::new();
                let mut unlabeled = 0usize;
                for store in view.stores() {
                    if store.is_tombstone() || !rule.matches_store(store) {
                        continue;
                    }
                    match store.label(label) {
                        Some(value) => {
                            values.insert(value);
                        }
                        None => unlabeled += 1,
                    }
                }
                values.len() + unlabeled
            }
            None => 0,
        };
        Self {
            key: rule.key(),
            rule,
            isolation_domains,
        }
    }

    fn accepts(&self, peer: &Peer, store: &Store) -> bool {
        peer.role == self.rule.role && self.rule.matches_store(store)
    }

    fn fit(&self, stores: &[&Store]) -> RuleFit {
        let (isolation_satisfied, isolation_score) = match self.rule.isolation_key() {
            Some(label) => {
                let mut per_value: HashMap<&str, usize> = HashMap::new();
                for store in stores {
                    if let Some(value) = store.label(label) {
                        *per_value.entry(value).or_default() += 1;
                    }
                }
                let worst = per_value.values().copied().max().unwrap_or(0);
                let limit = self.rule.count.div_ceil(self.isolation_domains.max(1));
                let levels: Vec<&str> = if self.rule.location_labels.is_empty() {
                    vec![label]
                } else {
                    self.rule.location_labels.iter().map(String::as_str).collect()
                };
                (worst <= limit, distinct_score(stores, &levels))
            }
            None => (true, 0),
        };

        RuleFit {
            rule: self.key.clone(),
            peers: stores.iter().map(|s| s.id).collect(),
            count_satisfied: stores.len() == self.rule.count,
            isolation_satisfied,
            isolation_score,
        }
    }
}

/// Sum over replica pairs of how high in the label hierarchy they diverge
fn distinct_score(stores: &[&Store], levels: &[&str]) -> u64 {
    let mut score = 0u64;
    for (i, a) in stores.iter().enumerate() {
        for b in &stores[i + 1..] {
            if let Some(depth) = levels.iter().position(|l| a.label(l) != b.label(l)) {
                score += (levels.len() - depth) as u64;
            }
        }
    }
    score
}

// =============================================================================
// Peer Matching
// =============================================================================

/// Assigns peers to rules so that as many peers as possible are covered.
///
/// A greedy pass can hand a peer to a broad rule that a narrower rule
/// needed, so the search backtracks. Peers are tried against rules in
/// evaluation order, which makes the first maximal assignment found the
/// one a greedy pass would produce whenever greedy is optimal. Regions
/// carry a handful of peers and rules, so the search space stays tiny.
struct PeerMatching<'a> {
    candidates: &'a [Vec<usize>],
    remaining: Vec<usize>,
    current: Vec<Option<usize>>,
    best: Vec<Option<usize>>,
    best_assigned: usize,
    upper_bound: usize,
}

impl<'a> PeerMatching<'a> {
    /// `candidates[p]` lists the rules peer `p` may serve; `capacity[r]` is
    /// the replica count of rule `r`. Returns the rule chosen per peer.
    fn solve(candidates: &'a [Vec<usize>], capacity: &[usize]) -> Vec<Option<usize>> {
        let matchable = candidates.iter().filter(|c| !c.is_empty()).count();
        let mut matching = Self {
            candidates,
            remaining: capacity.to_vec(),
            current: vec![None; candidates.len()],
            best: vec![None; candidates.len()],
            best_assigned: 0,
            upper_bound: matchable.min(capacity.iter().sum()),
        };
        matching.search(0, 0);
        matching.best
    }

    fn search(&mut self, peer: usize, assigned: usize) {
        if self.best_assigned == self.upper_bound {
            return;
        }
        if assigned + (self.candidates.len() - peer) <= self.best_assigned {
            return;
        }
        if peer == self.candidates.len() {
            self.best_assigned = assigned;
            self.best.clone_from(&self.current);
            return;
        }

        for &rule in &self.candidates[peer] {
            if self.remaining[rule] == 0 {
                continue;
            }
            self.remaining[rule] -= 1;
            self.current[peer] = Some(rule);
            self.search(peer + 1, assigned + 1);
            self.current[peer] = None;
            self.remaining[rule] += 1;
            if self.best_assigned == self.upper_bound {
                return;
            }
        }
        self.search(peer + 1, assigned);
    }
}

// =============================================================================
// Placement Evaluator
// =============================================================================

/// Evaluates replica layouts against the placement rules of one snapshot
#[derive(Debug, Clone)]
pub struct PlacementEvaluator {
    scopes: Vec<RuleScope>,
    rules_enabled: bool,
}

impl PlacementEvaluator {
    /// Build the evaluator for a snapshot.
    ///
    /// With rules disabled (or enabled but none configured) a single
    /// implicit voter rule is synthesized from the replication settings.
    pub fn new(view: &ClusterView, rules_enabled: bool) -> Result<Self> {
        let mut rules: Vec<PlacementRule> = if rules_enabled && !view.rules().is_empty() {
            validate_rules(view.rules())?;
            view.rules().to_vec()
        } else {
            if rules_enabled {
                warn!("placement rules enabled but none configured, using the implicit rule");
            }
            view.replication().validate()?;
            vec![PlacementRule::implicit(view.replication())]
        };
        // Voter rules claim peers before learner rules.
        rules.sort_by_key(|r| r.role);

        Ok(Self {
            scopes: rules.into_iter().map(|r| RuleScope::new(r, view)).collect(),
            rules_enabled: rules_enabled && !view.rules().is_empty(),
        })
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> impl Iterator<Item = &PlacementRule> {
        self.scopes.iter().map(|s| &s.rule)
    }

    /// Keys of the rules a store may serve, in evaluation order
    pub fn rules_for_store(&self, store: &Store) -> Vec<RuleKey> {
        self.scopes
            .iter()
            .filter(|s| s.rule.matches_store(store))
            .map(|s| s.key.clone())
            .collect()
    }

    /// Fit of a region's current layout
    pub fn fit_region(&self, view: &ClusterView, region: &Region) -> RegionFit {
        self.fit_peers(view, &region.peers)
    }

    /// Fit of an arbitrary layout
    pub fn fit_peers(&self, view: &ClusterView, peers: &[Peer]) -> RegionFit {
        let stores: Vec<Option<&Store>> = peers.iter().map(|p| view.store(p.store_id)).collect();
        let candidates: Vec<Vec<usize>> = peers
            .iter()
            .zip(&stores)
            .map(|(peer, store)| match store {
                Some(store) => (0..self.scopes.len())
                    .filter(|&i| self.scopes[i].accepts(peer, store))
                    .collect(),
                None => Vec::new(),
            })
            .collect();
        let capacity: Vec<usize> = self.scopes.iter().map(|s| s.rule.count).collect();
        let assignment = PeerMatching::solve(&candidates, &capacity);

        let rule_fits = self
            .scopes
            .iter()
            .enumerate()
            .map(|(i, scope)| {
                let assigned: Vec<&Store> = assignment
                    .iter()
                    .zip(&stores)
                    .filter(|(slot, _)| **slot == Some(i))
                    .filter_map(|(_, store)| *store)
                    .collect();
                scope.fit(&assigned)
            })
            .collect();

        let orphan_peers = peers
            .iter()
            .zip(&assignment)
            .filter(|(peer, slot)| {
                // The implicit rule only governs voters.
                slot.is_none() && (self.rules_enabled || peer.role == PeerRole::Voter)
            })
            .map(|(peer, _)| peer.store_id)
            .collect();

        RegionFit {
            rule_fits,
            orphan_peers,
        }
    }

    /// Whether `proposed` is an acceptable layout for `region`
    pub fn satisfies(&self, view: &ClusterView, region: &Region, proposed: &[Peer]) -> bool {
        self.check_move(view, region, proposed, false).is_ok()
    }

    /// Check a proposed layout against the region's current one.
    ///
    /// Counts must hold and no peer may be orphaned. Unless `evacuating`,
    /// no rule may lose isolation: a satisfied rule stays satisfied and the
    /// spread score never drops.
    pub fn check_move(
        &self,
        view: &ClusterView,
        region: &Region,
        proposed: &[Peer],
        evacuating: bool,
    ) -> std::result::Result<(), PlacementViolation> {
        let after = self.fit_peers(view, proposed);
        if let Some(store_id) = after.orphan_peers.first() {
            return Err(PlacementViolation::OrphanPeer {
                store_id: *store_id,
            });
        }
        if let Some(fit) = after.rule_fits.iter().find(|f| !f.count_satisfied) {
            return Err(PlacementViolation::CountUnsatisfied {
                rule: fit.rule.clone(),
            });
        }
        if evacuating {
            return Ok(());
        }

        let before = self.fit_region(view, region);
        for (old, new) in before.rule_fits.iter().zip(&after.rule_fits) {
            let lost_isolation = old.isolation_satisfied && !new.isolation_satisfied;
            if lost_isolation || new.isolation_score < old.isolation_score {
                return Err(PlacementViolation::IsolationDegraded {
                    rule: new.rule.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{RegionId, ENGINE_LABEL_KEY};
    use crate::config::ReplicationConfig;
    use crate::placement::{LabelConstraint, LabelOp};

    fn zone_store(id: u64, az: &str, host: &str) -> Store {
        Store::new(id, 1024, 0)
            .with_label("az", az)
            .with_label("host", host)
    }

    fn zone_replication() -> ReplicationConfig {
        ReplicationConfig {
            max_replicas: 3,
            location_labels: vec!["az".into(), "host".into()],
            isolation_level: "az".into(),
        }
    }

    fn view_with(stores: Vec<Store>, regions: Vec<Region>) -> ClusterView {
        ClusterView::builder()
            .replication(zone_replication())
            .stores(stores)
            .regions(regions)
            .build()
            .unwrap()
    }

    #[test]
    fn test_fully_isolated_region_is_satisfied() {
        let region = Region::new(1, 1, vec![Peer::voter(1), Peer::voter(2), Peer::voter(3)]);
        let view = view_with(
            vec![
                zone_store(1, "az1", "h1"),
                zone_store(2, "az2", "h2"),
                zone_store(3, "az3", "h3"),
                zone_store(4, "az1", "h4"),
            ],
            vec![region.clone()],
        );
        let evaluator = PlacementEvaluator::new(&view, false).unwrap();

        assert!(evaluator.fit_region(&view, &region).is_satisfied());

        // Moving az3's replica into az1 collapses two replicas into one zone.
        let proposed = region.peers_after_move(StoreId(3), StoreId(4)).unwrap();
        assert!(!evaluator.satisfies(&view, &region, &proposed));

        // Moving within az1 keeps the spread.
        let proposed = region.peers_after_move(StoreId(1), StoreId(4)).unwrap();
        assert!(evaluator.satisfies(&view, &region, &proposed));
    }

    #[test]
    fn test_too_few_zones_degrades_gracefully() {
        // Two zones for three replicas: two replicas must share a zone.
        let region = Region::new(1, 1, vec![Peer::voter(1), Peer::voter(2), Peer::voter(3)]);
        let view = view_with(
            vec![
                zone_store(1, "az1", "h1"),
                zone_store(2, "az1", "h2"),
                zone_store(3, "az2", "h3"),
                zone_store(4, "az1", "h4"),
                zone_store(5, "az2", "h5"),
            ],
            vec![region.clone()],
        );
        let evaluator = PlacementEvaluator::new(&view, false).unwrap();

        let fit = evaluator.fit_region(&view, &region);
        assert!(fit.is_satisfied(), "best attainable spread must count as satisfied");

        // Swapping hosts inside a zone must stay possible, or balancing stalls.
        let proposed = region.peers_after_move(StoreId(1), StoreId(4)).unwrap();
        assert!(evaluator.satisfies(&view, &region, &proposed));
        let proposed = region.peers_after_move(StoreId(3), StoreId(5)).unwrap();
        assert!(evaluator.satisfies(&view, &region, &proposed));

        // Emptying az2 is still a regression.
        let proposed = region.peers_after_move(StoreId(3), StoreId(4)).unwrap();
        assert!(!evaluator.satisfies(&view, &region, &proposed));
    }

    #[test]
    fn test_single_zone_cluster_accepts_moves() {
        let region = Region::new(1, 1, vec![Peer::voter(1), Peer::voter(2), Peer::voter(3)]);
        let view = view_with(
            (1..=4).map(|id| zone_store(id, "az1", &format!("h{}", id))).collect(),
            vec![region.clone()],
        );
        let evaluator = PlacementEvaluator::new(&view, false).unwrap();

        let proposed = region.peers_after_move(StoreId(2), StoreId(4)).unwrap();
        assert!(evaluator.satisfies(&view, &region, &proposed));
    }

    #[test]
    fn test_badly_spread_region_may_improve() {
        // All replicas in az1 although three zones exist.
        let region = Region::new(1, 1, vec![Peer::voter(1), Peer::voter(2), Peer::voter(3)]);
        let view = view_with(
            vec![
                zone_store(1, "az1", "h1"),
                zone_store(2, "az1", "h2"),
                zone_store(3, "az1", "h3"),
                zone_store(4, "az2", "h4"),
                zone_store(5, "az3", "h5"),
            ],
            vec![region.clone()],
        );
        let evaluator = PlacementEvaluator::new(&view, false).unwrap();

        assert!(!evaluator.fit_region(&view, &region).rule_fits[0].isolation_satisfied);
        let proposed = region.peers_after_move(StoreId(1), StoreId(4)).unwrap();
        assert!(evaluator.satisfies(&view, &region, &proposed));
    }

    #[test]
    fn test_count_violation_and_orphans() {
        let region = Region::new(1, 1, vec![Peer::voter(1), Peer::voter(2)]);
        let view = view_with(
            (1..=3).map(|id| zone_store(id, &format!("az{}", id), "h")).collect(),
            vec![region.clone()],
        );
        let evaluator = PlacementEvaluator::new(&view, false).unwrap();
        assert!(!evaluator.fit_region(&view, &region).counts_satisfied());

        // A peer on a store missing from the snapshot is orphaned.
        let stale = vec![Peer::voter(1), Peer::voter(2), Peer::voter(99)];
        assert_matches::assert_matches!(
            evaluator.check_move(&view, &region, &stale, false),
            Err(PlacementViolation::OrphanPeer { store_id: StoreId(99) })
        );
    }

    #[test]
    fn test_learners_ignored_by_implicit_rule() {
        let region = Region::new(
            1,
            1,
            vec![Peer::voter(1), Peer::voter(2), Peer::voter(3), Peer::learner(4)],
        );
        let view = view_with(
            (1..=4).map(|id| zone_store(id, &format!("az{}", id), "h")).collect(),
            vec![region.clone()],
        );
        let evaluator = PlacementEvaluator::new(&view, false).unwrap();
        assert!(evaluator.fit_region(&view, &region).is_satisfied());
    }

    #[test]
    fn test_columnar_learner_rule() {
        let mut stores: Vec<Store> = (1..=3)
            .map(|id| zone_store(id, &format!("az{}", id), "h"))
            .collect();
        stores.push(Store::new(10, 1024, 0).with_label(ENGINE_LABEL_KEY, "tiflash").with_label("host", "f1"));
        stores.push(Store::new(11, 1024, 0).with_label(ENGINE_LABEL_KEY, "tiflash").with_label("host", "f2"));

        let region = Region::new(
            RegionId(1),
            1,
            vec![Peer::voter(1), Peer::voter(2), Peer::voter(3), Peer::learner(10)],
        );
        let view = ClusterView::builder()
            .replication(zone_replication())
            .stores(stores)
            .region(region.clone())
            .rule(
                PlacementRule::voters("pd", "default", 3)
                    .with_location_labels(&["az", "host"])
                    .with_isolation_level("az"),
            )
            .rule(
                PlacementRule::learners("tiflash-override", "learner-replica", 1)
                    .with_constraint(LabelConstraint::new(ENGINE_LABEL_KEY, LabelOp::In, &["tiflash"]))
                    .with_location_labels(&["host"]),
            )
            .build()
            .unwrap();
        let evaluator = PlacementEvaluator::new(&view, true).unwrap();

        assert!(evaluator.fit_region(&view, &region).is_satisfied());

        let proposed = region.peers_after_move(StoreId(10), StoreId(11)).unwrap();
        assert!(evaluator.satisfies(&view, &region, &proposed));

        // A voter can never land on a columnar store.
        let proposed = region.peers_after_move(StoreId(1), StoreId(11)).unwrap();
        assert!(!evaluator.satisfies(&view, &region, &proposed));
    }

    #[test]
    fn test_overlapping_voter_rules_match_regardless_of_order() {
        // The broad rule comes first but must leave the az3 replica to the
        // narrow rule.
        let region = Region::new(1, 1, vec![Peer::voter(1), Peer::voter(2), Peer::voter(3)]);
        let view = ClusterView::builder()
            .replication(zone_replication())
            .stores([
                zone_store(1, "az3", "h1"),
                zone_store(2, "az1", "h2"),
                zone_store(3, "az2", "h3"),
                zone_store(4, "az1", "h4"),
            ])
            .region(region.clone())
            .rule(PlacementRule::voters("g", "a", 2))
            .rule(
                PlacementRule::voters("g", "b", 1)
                    .with_constraint(LabelConstraint::new("az", LabelOp::In, &["az3"])),
            )
            .build()
            .unwrap();
        let evaluator = PlacementEvaluator::new(&view, true).unwrap();

        let fit = evaluator.fit_region(&view, &region);
        assert!(fit.is_satisfied(), "valid layout reported unsatisfied: {:?}", fit);
        assert_eq!(fit.rule_fits[0].peers, vec![StoreId(2), StoreId(3)]);
        assert_eq!(fit.rule_fits[1].peers, vec![StoreId(1)]);

        // The az3 replica has nowhere else to go.
        let proposed = region.peers_after_move(StoreId(1), StoreId(4)).unwrap();
        assert!(!evaluator.satisfies(&view, &region, &proposed));
        let proposed = region.peers_after_move(StoreId(2), StoreId(4)).unwrap();
        assert!(evaluator.satisfies(&view, &region, &proposed));
    }

    #[test]
    fn test_matching_maximizes_assigned_peers() {
        // Peer 0 fits both rules, peer 1 only rule 0.
        let candidates = vec![vec![0, 1], vec![0]];
        assert_eq!(PeerMatching::solve(&candidates, &[1, 1]), vec![Some(1), Some(0)]);

        // Greedy order is kept when it is already optimal.
        let candidates = vec![vec![0, 1], vec![1]];
        assert_eq!(PeerMatching::solve(&candidates, &[1, 1]), vec![Some(0), Some(1)]);

        // More peers than slots leaves the tail unassigned.
        let candidates = vec![vec![0], vec![0], vec![0]];
        assert_eq!(PeerMatching::solve(&candidates, &[2]), vec![Some(0), Some(0), None]);

        assert!(PeerMatching::solve(&[], &[3]).is_empty());
    }

    #[test]
    fn test_evacuation_skips_isolation_comparison() {
        let region = Region::new(1, 1, vec![Peer::voter(1), Peer::voter(2), Peer::voter(3)]);
        let view = view_with(
            vec![
                zone_store(1, "az1", "h1"),
                zone_store(2, "az2", "h2"),
                zone_store(3, "az3", "h3"),
                zone_store(4, "az1", "h4"),
            ],
            vec![region.clone()],
        );
        let evaluator = PlacementEvaluator::new(&view, false).unwrap();
        let proposed = region.peers_after_move(StoreId(3), StoreId(4)).unwrap();

        assert!(evaluator.check_move(&view, &region, &proposed, false).is_err());
        assert!(evaluator.check_move(&view, &region, &proposed, true).is_ok());
    }

    #[test]
    fn test_accepted_layout_reevaluates_as_satisfied() {
        let region = Region::new(1, 1, vec![Peer::voter(1), Peer::voter(2), Peer::voter(3)]);
        let view = view_with(
            vec![
                zone_store(1, "az1", "h1"),
                zone_store(2, "az1", "h2"),
                zone_store(3, "az2", "h3"),
                zone_store(4, "az2", "h4"),
            ],
            vec![region.clone()],
        );
        let evaluator = PlacementEvaluator::new(&view, false).unwrap();
        let proposed = region.peers_after_move(StoreId(2), StoreId(4)).unwrap();
        assert!(evaluator.satisfies(&view, &region, &proposed));

        let moved = Region::new(1, 1, proposed.clone());
        assert!(evaluator.satisfies(&view, &moved, &proposed));
    }
}
