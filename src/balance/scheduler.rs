//! Balance-Region Scheduler
//!
//! Drives one selection pass per tick and hands the result to the operator
//! controller. Ticks of one scheduler instance are serialized; distinct
//! instances share nothing but the controller.

use super::diagnostic::DiagnosticReport;
use super::selector::{CandidateSelector, MoveCandidate};
use crate::cluster::ClusterView;
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::metrics::SchedulerMetrics;
use crate::operator::{Admission, Operator, OperatorController, RejectReason};
use crate::placement::PlacementEvaluator;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default name of the balance-region scheduler
pub const BALANCE_REGION_SCHEDULER_NAME: &str = "balance-region-scheduler";

// =============================================================================
// Scheduler Trait
// =============================================================================

/// What one tick produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleOutcome {
    /// Admitted operators; always empty in diagnostic mode
    pub operators: Vec<Operator>,
    /// Present only in diagnostic mode
    pub report: Option<DiagnosticReport>,
    /// Moves the controller refused
    pub rejections: Vec<RejectReason>,
}

impl ScheduleOutcome {
    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

/// A periodic scheduler that proposes operators from cluster snapshots
pub trait Scheduler: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the controller has room for another operator
    fn is_schedule_allowed(&self) -> bool;

    /// Run one tick. Diagnostic ticks decide without submitting anything.
    fn schedule(&self, view: &ClusterView, diagnose: bool) -> Result<ScheduleOutcome>;
}

// =============================================================================
// Balance-Region Scheduler
// =============================================================================

/// Moves regions from the most to the least loaded stores
#[derive(Debug)]
pub struct BalanceRegionScheduler {
    name: String,
    config: SchedulerConfig,
    controller: Arc<OperatorController>,
    /// Serializes ticks of this instance
    tick_lock: Mutex<()>,
    metrics: SchedulerMetrics,
}

impl BalanceRegionScheduler {
    /// Create a scheduler with validated configuration
    pub fn new(config: SchedulerConfig, controller: Arc<OperatorController>) -> Result<Self> {
        Self::with_name(BALANCE_REGION_SCHEDULER_NAME, config, controller)
    }

    /// Create a named instance, for running several side by side
    pub fn with_name(
        name: impl Into<String>,
        config: SchedulerConfig,
        controller: Arc<OperatorController>,
    ) -> Result<Self> {
        config.validate()?;
        let name = name.into();
        info!(
            scheduler = %name,
            tolerant_size_ratio = config.tolerant_size_ratio,
            placement_rules_enabled = config.placement_rules_enabled,
            max_pair_attempts = config.max_pair_attempts,
            "scheduler created"
        );
        Ok(Self {
            name,
            config,
            controller,
            tick_lock: Mutex::new(()),
            metrics: SchedulerMetrics::new(),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn controller(&self) -> &Arc<OperatorController> {
        &self.controller
    }

    pub fn metrics(&self) -> &SchedulerMetrics {
        &self.metrics
    }

    fn build_operator(&self, view: &ClusterView, candidate: &MoveCandidate) -> Option<Operator> {
        let built = view.require_region(candidate.region_id).and_then(|region| {
            Operator::move_peer(region, candidate.source, candidate.target, candidate.kind)
        });
        match built {
            Ok(op) => Some(op),
            Err(err) => {
                warn!(
                    scheduler = %self.name,
                    region_id = %candidate.region_id,
                    error = %err,
                    "selected move is no longer valid"
                );
                None
            }
        }
    }
}

impl Scheduler for BalanceRegionScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_schedule_allowed(&self) -> bool {
        self.controller.total_in_flight() < self.controller.limits().global_limit
    }

    fn schedule(&self, view: &ClusterView, diagnose: bool) -> Result<ScheduleOutcome> {
        let _tick = self.tick_lock.lock();
        self.metrics.record_tick(diagnose);

        // Configuration errors surface before any housekeeping runs.
        let evaluator = PlacementEvaluator::new(view, self.config.placement_rules_enabled)?;

        if !diagnose {
            self.controller.remove_expired();
            if !self.is_schedule_allowed() {
                debug!(scheduler = %self.name, "global operator limit reached, skipping tick");
                self.metrics.record_outcome(0, 0);
                return Ok(ScheduleOutcome::default());
            }
        }

        let load = self.controller.load_snapshot();
        let selection = CandidateSelector::new(view, &self.config, &evaluator, &load).select();
        self.metrics
            .record_selection(selection.pairs.len() as u64, selection.rejected_regions() as u64);

        let op = selection
            .candidate
            .as_ref()
            .and_then(|candidate| self.build_operator(view, candidate));

        let mut outcome = ScheduleOutcome::default();
        if diagnose {
            let admission_rejection = op
                .as_ref()
                .and_then(|op| self.controller.check_admission(op).err());
            outcome.report = Some(DiagnosticReport::new(
                &self.name,
                view.version(),
                selection,
                admission_rejection,
            ));
        } else if let Some(mut op) = op {
            match self.controller.add_operator(op.clone()) {
                Admission::Accepted(id) => {
                    op.id = id;
                    outcome.operators.push(op);
                }
                Admission::Rejected(reason) => {
                    debug!(scheduler = %self.name, %reason, "selected move not admitted");
                    outcome.rejections.push(reason);
                }
            }
        }

        self.metrics.record_outcome(
            outcome.operators.len() as u64,
            outcome.rejections.len() as u64,
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Peer, Region, Store, StoreId};
    use crate::config::{OperatorLimits, ReplicationConfig, ScoringWeights, ToleranceMode};
    use crate::operator::OperatorKind;

    fn scheduler(limits: OperatorLimits) -> BalanceRegionScheduler {
        let config = SchedulerConfig {
            tolerance_mode: ToleranceMode::Fixed,
            tolerant_size_ratio: 5.0,
            scoring: ScoringWeights {
                region_count: 0.0,
                used_space: 1.0,
            },
            ..Default::default()
        };
        BalanceRegionScheduler::new(config, OperatorController::new(limits).unwrap()).unwrap()
    }

    fn skewed_view() -> ClusterView {
        ClusterView::builder()
            .version(3)
            .replication(ReplicationConfig {
                max_replicas: 1,
                ..Default::default()
            })
            .stores([Store::new(1, 1000, 300), Store::new(2, 1000, 0)])
            .regions((1..=3).map(|id| Region::new(id, 1, vec![Peer::voter(1)])))
            .build()
            .unwrap()
    }

    #[test]
    fn test_tick_submits_one_operator() {
        let scheduler = scheduler(OperatorLimits::default());
        let outcome = scheduler.schedule(&skewed_view(), false).unwrap();

        assert_eq!(outcome.operators.len(), 1);
        let op = &outcome.operators[0];
        assert!(op.id.is_assigned());
        assert_eq!(op.kind, OperatorKind::Balance);
        assert_eq!((op.source, op.target), (StoreId(1), StoreId(2)));
        assert!(outcome.report.is_none());
        assert_eq!(scheduler.controller().total_in_flight(), 1);
    }

    #[test]
    fn test_next_tick_skips_busy_region() {
        let scheduler = scheduler(OperatorLimits::default());
        let view = skewed_view();
        let first = scheduler.schedule(&view, false).unwrap();
        let second = scheduler.schedule(&view, false).unwrap();

        assert_ne!(first.operators[0].region_id, second.operators[0].region_id);
    }

    #[test]
    fn test_diagnose_does_not_submit() {
        let scheduler = scheduler(OperatorLimits::default());
        let outcome = scheduler.schedule(&skewed_view(), true).unwrap();

        assert!(outcome.operators.is_empty());
        let report = outcome.report.unwrap();
        assert_eq!(report.view_version, 3);
        assert!(report.selected.is_some());
        assert!(report.admission_rejection.is_none());
        assert_eq!(scheduler.controller().total_in_flight(), 0);
    }

    #[test]
    fn test_global_limit_blocks_tick() {
        let scheduler = scheduler(OperatorLimits {
            global_limit: 1,
            ..Default::default()
        });
        let view = skewed_view();
        assert_eq!(scheduler.schedule(&view, false).unwrap().operators.len(), 1);
        assert!(!scheduler.is_schedule_allowed());

        let outcome = scheduler.schedule(&view, false).unwrap();
        assert!(outcome.is_empty());

        // Diagnostic ticks still decide and explain the refusal.
        let report = scheduler.schedule(&view, true).unwrap().report.unwrap();
        assert!(report.admission_rejection.is_some());
    }

    #[test]
    fn test_metrics_track_ticks() {
        let scheduler = scheduler(OperatorLimits::default());
        let view = skewed_view();
        scheduler.schedule(&view, false).unwrap();
        scheduler.schedule(&view, true).unwrap();

        let snap = scheduler.metrics().snapshot();
        assert_eq!(snap.ticks, 2);
        assert_eq!(snap.diagnostic_ticks, 1);
        assert_eq!(snap.operators_produced, 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SchedulerConfig {
            max_pair_attempts: 0,
            ..Default::default()
        };
        let controller = OperatorController::new(OperatorLimits::default()).unwrap();
        assert!(BalanceRegionScheduler::new(config, controller).is_err());
    }
}
