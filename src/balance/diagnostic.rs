//! Diagnostic Report
//!
//! Structured record of one selection pass: every source/target pair that
//! was examined, why each sampled region was passed over, and what would
//! have been submitted. Built only for diagnostic ticks; contains nothing
//! time-dependent, so two runs over the same snapshot compare equal.

use super::selector::{MoveCandidate, Selection};
use crate::cluster::RegionId;
use crate::operator::RejectReason;
use crate::scoring::ScoredStore;
use serde::Serialize;
use std::collections::BTreeMap;

// =============================================================================
// Reasons and Outcomes
// =============================================================================

/// Why a sampled region was not moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateRejection {
    /// Region or one of its stores is missing from the snapshot
    StaleSnapshot,
    /// An operator already targets the region
    RegionBusy,
    /// Target is not `Up`
    TargetUnavailable,
    /// Target already hosts a replica of the region
    TargetHasReplica,
    /// Region does not currently satisfy its replica counts
    RegionUnhealthy,
    /// Layout after the move breaks a placement rule
    PlacementViolation,
    /// The move would overshoot the tolerance dead-band
    ToleranceNotExceeded,
}

impl CandidateRejection {
    pub fn label(&self) -> &'static str {
        match self {
            CandidateRejection::StaleSnapshot => "stale_snapshot",
            CandidateRejection::RegionBusy => "region_busy",
            CandidateRejection::TargetUnavailable => "target_unavailable",
            CandidateRejection::TargetHasReplica => "target_has_replica",
            CandidateRejection::RegionUnhealthy => "region_unhealthy",
            CandidateRejection::PlacementViolation => "placement_violation",
            CandidateRejection::ToleranceNotExceeded => "tolerance_not_exceeded",
        }
    }
}

impl std::fmt::Display for CandidateRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// How an examined pair ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PairOutcome {
    Selected { region_id: RegionId },
    /// Score gap within the dead-band
    Balanced,
    /// No sampled region passed every check
    NoMovableRegion,
    SourceSaturated,
    TargetSaturated,
}

impl PairOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PairOutcome::Selected { .. } => "selected",
            PairOutcome::Balanced => "balanced",
            PairOutcome::NoMovableRegion => "no_movable_region",
            PairOutcome::SourceSaturated => "source_saturated",
            PairOutcome::TargetSaturated => "target_saturated",
        }
    }
}

/// A sampled region and why it was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegionRejection {
    pub region_id: RegionId,
    pub reason: CandidateRejection,
}

/// One examined source/target pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairRecord {
    /// Comparison group the pair belongs to
    pub group: String,
    pub source: ScoredStore,
    pub target: ScoredStore,
    /// Source is a retired store being drained
    pub evacuation: bool,
    pub outcome: PairOutcome,
    pub rejections: Vec<RegionRejection>,
}

// =============================================================================
// Diagnostic Report
// =============================================================================

/// Dry-run result of one scheduling tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticReport {
    pub scheduler: String,
    pub view_version: u64,
    pub tolerance_band: f64,
    pub pairs: Vec<PairRecord>,
    /// The move a live tick would submit
    pub selected: Option<MoveCandidate>,
    /// Why the controller would refuse the selected move right now
    pub admission_rejection: Option<RejectReason>,
    /// Occurrences of each region rejection and pair outcome
    pub reason_counts: BTreeMap<&'static str, usize>,
}

impl DiagnosticReport {
    pub fn new(
        scheduler: &str,
        view_version: u64,
        selection: Selection,
        admission_rejection: Option<RejectReason>,
    ) -> Self {
        let mut reason_counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        for pair in &selection.pairs {
            *reason_counts.entry(pair.outcome.label()).or_default() += 1;
            for rejection in &pair.rejections {
                *reason_counts.entry(rejection.reason.label()).or_default() += 1;
            }
        }
        if let Some(reason) = &admission_rejection {
            *reason_counts.entry(reason.label()).or_default() += 1;
        }

        Self {
            scheduler: scheduler.to_string(),
            view_version,
            tolerance_band: selection.tolerance_band,
            pairs: selection.pairs,
            selected: selection.candidate,
            admission_rejection,
            reason_counts,
        }
    }

    /// Occurrences of a reason or outcome label
    pub fn count(&self, label: &str) -> usize {
        self.reason_counts.get(label).copied().unwrap_or(0)
    }

    pub fn is_balanced(&self) -> bool {
        self.selected.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::StoreId;

    fn scored(id: u64, score: f64) -> ScoredStore {
        ScoredStore {
            store_id: StoreId(id),
            score,
        }
    }

    #[test]
    fn test_reason_counts_aggregate_pairs() {
        let selection = Selection {
            tolerance_band: 5.0,
            candidate: None,
            pairs: vec![
                PairRecord {
                    group: "default".into(),
                    source: scored(1, 100.0),
                    target: scored(3, 10.0),
                    evacuation: false,
                    outcome: PairOutcome::NoMovableRegion,
                    rejections: vec![
                        RegionRejection {
                            region_id: RegionId(1),
                            reason: CandidateRejection::RegionBusy,
                        },
                        RegionRejection {
                            region_id: RegionId(2),
                            reason: CandidateRejection::PlacementViolation,
                        },
                    ],
                },
                PairRecord {
                    group: "default".into(),
                    source: scored(2, 50.0),
                    target: scored(3, 10.0),
                    evacuation: false,
                    outcome: PairOutcome::SourceSaturated,
                    rejections: Vec::new(),
                },
            ],
        };

        let report = DiagnosticReport::new("balance-region-scheduler", 9, selection, None);
        assert!(report.is_balanced());
        assert_eq!(report.count("region_busy"), 1);
        assert_eq!(report.count("placement_violation"), 1);
        assert_eq!(report.count("no_movable_region"), 1);
        assert_eq!(report.count("source_saturated"), 1);
        assert_eq!(report.count("selected"), 0);
    }

    #[test]
    fn test_report_serializes() {
        let selection = Selection {
            tolerance_band: 1.0,
            candidate: None,
            pairs: Vec::new(),
        };
        let report = DiagnosticReport::new(
            "balance-region-scheduler",
            1,
            selection,
            Some(RejectReason::GlobalLimitReached { limit: 4 }),
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["admission_rejection"]["reason"], "global_limit_reached");
        assert_eq!(json["reason_counts"]["global_limit_reached"], 1);
    }
}
