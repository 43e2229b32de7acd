//! Operator Controller
//!
//! Admits, tracks and retires in-flight operators. The controller is the
//! only state shared between concurrently running schedulers, so every
//! admission decision happens inside one critical section over the
//! in-flight table:
//!
//! - at most one operator per region
//! - at most `store_limit` operators touching any store
//! - at most `global_limit` operators cluster-wide
//!
//! Timeouts are lazy: expired operators are reaped by `remove_expired`,
//! which schedulers call at the start of each tick.

use super::operator::{Operator, OperatorId, OperatorStatus};
use crate::cluster::{RegionId, StoreId};
use crate::config::OperatorLimits;
use crate::error::{Error, Result};
use crate::metrics::ControllerMetrics;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

// =============================================================================
// Admission
// =============================================================================

/// Why an operator was not admitted
#[derive(Error, Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("region {region_id} already has an operator in flight")]
    RegionBusy { region_id: RegionId },

    #[error("store {store_id} reached its in-flight operator limit")]
    StoreSaturated { store_id: StoreId },

    #[error("global in-flight operator limit {limit} reached")]
    GlobalLimitReached { limit: usize },

    #[error("operator {operator_id} was already admitted")]
    DuplicateOperator { operator_id: OperatorId },
}

impl RejectReason {
    /// Stable label for metrics and report aggregation
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::RegionBusy { .. } => "region_busy",
            RejectReason::StoreSaturated { .. } => "store_saturated",
            RejectReason::GlobalLimitReached { .. } => "global_limit_reached",
            RejectReason::DuplicateOperator { .. } => "duplicate_operator",
        }
    }
}

/// Result of submitting an operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Accepted(OperatorId),
    Rejected(RejectReason),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted(_))
    }

    pub fn reason(&self) -> Option<&RejectReason> {
        match self {
            Admission::Accepted(_) => None,
            Admission::Rejected(reason) => Some(reason),
        }
    }
}

// =============================================================================
// Load Snapshot
// =============================================================================

/// Copy of the controller's load, consumed by the selector within a tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerLoad {
    pub busy_regions: HashSet<RegionId>,
    pub store_load: HashMap<StoreId, usize>,
    pub total: usize,
    pub store_limit: usize,
    pub global_limit: usize,
}

impl ControllerLoad {
    pub fn is_region_busy(&self, region_id: RegionId) -> bool {
        self.busy_regions.contains(&region_id)
    }

    pub fn in_flight(&self, store_id: StoreId) -> usize {
        self.store_load.get(&store_id).copied().unwrap_or(0)
    }

    pub fn is_store_saturated(&self, store_id: StoreId) -> bool {
        self.in_flight(store_id) >= self.store_limit
    }

    pub fn global_headroom(&self) -> usize {
        self.global_limit.saturating_sub(self.total)
    }
}

// =============================================================================
// Controller State
// =============================================================================

#[derive(Debug, Default)]
struct ControllerState {
    operators: HashMap<OperatorId, Operator>,
    by_region: HashMap<RegionId, OperatorId>,
    store_load: HashMap<StoreId, usize>,
}

impl ControllerState {
    fn check(&self, op: &Operator, limits: &OperatorLimits) -> std::result::Result<(), RejectReason> {
        if op.id.is_assigned() && self.operators.contains_key(&op.id) {
            return Err(RejectReason::DuplicateOperator { operator_id: op.id });
        }
        if self.by_region.contains_key(&op.region_id) {
            return Err(RejectReason::RegionBusy {
                region_id: op.region_id,
            });
        }
        if self.operators.len() >= limits.global_limit {
            return Err(RejectReason::GlobalLimitReached {
                limit: limits.global_limit,
            });
        }
        for store_id in op.stores() {
            if self.store_load.get(&store_id).copied().unwrap_or(0) >= limits.store_limit {
                return Err(RejectReason::StoreSaturated { store_id });
            }
        }
        Ok(())
    }

    fn insert(&mut self, op: Operator) {
        for store_id in op.stores() {
            *self.store_load.entry(store_id).or_default() += 1;
        }
        self.by_region.insert(op.region_id, op.id);
        self.operators.insert(op.id, op);
    }

    fn release(&mut self, id: OperatorId, status: OperatorStatus) -> Option<Operator> {
        let mut op = self.operators.remove(&id)?;
        self.by_region.remove(&op.region_id);
        for store_id in op.stores() {
            if let Some(load) = self.store_load.get_mut(&store_id) {
                *load = load.saturating_sub(1);
                if *load == 0 {
                    self.store_load.remove(&store_id);
                }
            }
        }
        op.status = status;
        Some(op)
    }
}

// =============================================================================
// Operator Controller
// =============================================================================

/// Shared admission control for in-flight operators
#[derive(Debug)]
pub struct OperatorController {
    limits: OperatorLimits,
    state: Mutex<ControllerState>,
    next_id: AtomicU64,
    metrics: ControllerMetrics,
}

impl OperatorController {
    /// Create a controller with validated limits
    pub fn new(limits: OperatorLimits) -> Result<Arc<Self>> {
        limits.validate()?;
        info!(
            store_limit = limits.store_limit,
            global_limit = limits.global_limit,
            timeout_secs = limits.operator_timeout_secs,
            "operator controller created"
        );
        Ok(Arc::new(Self {
            limits,
            state: Mutex::new(ControllerState::default()),
            next_id: AtomicU64::new(1),
            metrics: ControllerMetrics::new(),
        }))
    }

    pub fn limits(&self) -> &OperatorLimits {
        &self.limits
    }

    pub fn metrics(&self) -> &ControllerMetrics {
        &self.metrics
    }

    /// Admit an operator, or report why it cannot run now
    pub fn add_operator(&self, mut op: Operator) -> Admission {
        let mut state = self.state.lock();
        if let Err(reason) = state.check(&op, &self.limits) {
            drop(state);
            debug!(region_id = %op.region_id, %reason, "operator rejected");
            self.metrics.record_rejection(&reason);
            return Admission::Rejected(reason);
        }

        let id = OperatorId(self.next_id.fetch_add(1, Ordering::Relaxed));
        op.id = id;
        op.status = OperatorStatus::Running;
        info!(
            operator_id = %id,
            region_id = %op.region_id,
            source = %op.source,
            target = %op.target,
            kind = %op.kind,
            "operator admitted"
        );
        state.insert(op);
        drop(state);

        self.metrics.record_admitted();
        Admission::Accepted(id)
    }

    /// Check admission without registering anything
    pub fn check_admission(&self, op: &Operator) -> std::result::Result<(), RejectReason> {
        self.state.lock().check(op, &self.limits)
    }

    /// Retire operators older than the configured timeout
    pub fn remove_expired(&self) -> Vec<Operator> {
        self.remove_expired_at(Utc::now())
    }

    /// Retire operators that are expired at `now`
    pub fn remove_expired_at(&self, now: DateTime<Utc>) -> Vec<Operator> {
        let timeout = self.limits.operator_timeout();
        let mut state = self.state.lock();
        let mut expired: Vec<OperatorId> = state
            .operators
            .values()
            .filter(|op| op.is_expired(now, timeout))
            .map(|op| op.id)
            .collect();
        expired.sort_unstable();

        let removed: Vec<Operator> = expired
            .into_iter()
            .filter_map(|id| state.release(id, OperatorStatus::Timeout))
            .collect();
        drop(state);

        for op in &removed {
            warn!(
                operator_id = %op.id,
                region_id = %op.region_id,
                age_secs = op.age(now).num_seconds(),
                "operator timed out"
            );
        }
        if !removed.is_empty() {
            self.metrics.record_expired(removed.len() as u64);
        }
        removed
    }

    /// In-flight operators touching a store
    pub fn in_flight_count(&self, store_id: StoreId) -> usize {
        self.state
            .lock()
            .store_load
            .get(&store_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_in_flight(&self) -> usize {
        self.state.lock().operators.len()
    }

    pub fn is_region_busy(&self, region_id: RegionId) -> bool {
        self.state.lock().by_region.contains_key(&region_id)
    }

    /// Cancel an operator, releasing its slots immediately
    pub fn cancel(&self, id: OperatorId) -> Result<Operator> {
        let op = self
            .state
            .lock()
            .release(id, OperatorStatus::Cancelled)
            .ok_or(Error::OperatorNotFound { operator_id: id })?;
        info!(operator_id = %id, region_id = %op.region_id, "operator cancelled");
        self.metrics.record_cancelled();
        Ok(op)
    }

    /// Mark an operator as completed
    pub fn finish(&self, id: OperatorId) -> Result<Operator> {
        let op = self
            .state
            .lock()
            .release(id, OperatorStatus::Finished)
            .ok_or(Error::OperatorNotFound { operator_id: id })?;
        debug!(operator_id = %id, region_id = %op.region_id, "operator finished");
        self.metrics.record_finished();
        Ok(op)
    }

    pub fn get(&self, id: OperatorId) -> Option<Operator> {
        self.state.lock().operators.get(&id).cloned()
    }

    /// In-flight operators ordered by ID
    pub fn operators(&self) -> Vec<Operator> {
        let mut ops: Vec<Operator> = self.state.lock().operators.values().cloned().collect();
        ops.sort_by_key(|op| op.id);
        ops
    }

    /// Copy of the current load
    pub fn load_snapshot(&self) -> ControllerLoad {
        let state = self.state.lock();
        ControllerLoad {
            busy_regions: state.by_region.keys().copied().collect(),
            store_load: state.store_load.clone(),
            total: state.operators.len(),
            store_limit: self.limits.store_limit,
            global_limit: self.limits.global_limit,
        }
    }
}
