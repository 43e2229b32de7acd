//! Balancer Metrics
//!
//! Lock-free counters updated on the scheduling path and read by the
//! exporter through `snapshot()`. Each counter set is cache-line aligned so
//! that schedulers and the controller do not false-share.

use crate::operator::RejectReason;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache line size for alignment
pub const CACHE_LINE_SIZE: usize = 64;

// =============================================================================
// Scheduler Metrics
// =============================================================================

/// Per-scheduler tick counters
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    /// Ticks run, diagnostic ones included
    pub ticks: AtomicU64,
    /// Ticks run in diagnostic mode
    pub diagnostic_ticks: AtomicU64,
    /// Ticks that produced no operator
    pub idle_ticks: AtomicU64,
    /// Operators submitted and admitted
    pub operators_produced: AtomicU64,
    /// Moves the controller refused
    pub operators_rejected: AtomicU64,
    /// Candidate regions rejected by the selector
    pub candidates_rejected: AtomicU64,
    /// Source/target pairs examined
    pub pairs_examined: AtomicU64,
}

const _: () = assert!(std::mem::size_of::<SchedulerMetrics>() <= CACHE_LINE_SIZE);

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_tick(&self, diagnose: bool) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        if diagnose {
            self.diagnostic_ticks.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_selection(&self, pairs: u64, rejected_candidates: u64) {
        self.pairs_examined.fetch_add(pairs, Ordering::Relaxed);
        self.candidates_rejected
            .fetch_add(rejected_candidates, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_outcome(&self, produced: u64, rejected: u64) {
        self.operators_produced.fetch_add(produced, Ordering::Relaxed);
        self.operators_rejected.fetch_add(rejected, Ordering::Relaxed);
        if produced == 0 {
            self.idle_ticks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> SchedulerMetricsSnapshot {
        SchedulerMetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            diagnostic_ticks: self.diagnostic_ticks.load(Ordering::Relaxed),
            idle_ticks: self.idle_ticks.load(Ordering::Relaxed),
            operators_produced: self.operators_produced.load(Ordering::Relaxed),
            operators_rejected: self.operators_rejected.load(Ordering::Relaxed),
            candidates_rejected: self.candidates_rejected.load(Ordering::Relaxed),
            pairs_examined: self.pairs_examined.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SchedulerMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerMetricsSnapshot {
    pub ticks: u64,
    pub diagnostic_ticks: u64,
    pub idle_ticks: u64,
    pub operators_produced: u64,
    pub operators_rejected: u64,
    pub candidates_rejected: u64,
    pub pairs_examined: u64,
}

// =============================================================================
// Controller Metrics
// =============================================================================

/// Admission and lifecycle counters of the operator controller
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct ControllerMetrics {
    pub admitted: AtomicU64,
    pub rejected_region_busy: AtomicU64,
    pub rejected_store_saturated: AtomicU64,
    pub rejected_global_limit: AtomicU64,
    pub rejected_duplicate: AtomicU64,
    pub finished: AtomicU64,
    pub cancelled: AtomicU64,
    pub expired: AtomicU64,
}

const _: () = assert!(std::mem::size_of::<ControllerMetrics>() <= CACHE_LINE_SIZE);

impl ControllerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_rejection(&self, reason: &RejectReason) {
        let counter = match reason {
            RejectReason::RegionBusy { .. } => &self.rejected_region_busy,
            RejectReason::StoreSaturated { .. } => &self.rejected_store_saturated,
            RejectReason::GlobalLimitReached { .. } => &self.rejected_global_limit,
            RejectReason::DuplicateOperator { .. } => &self.rejected_duplicate,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_finished(&self) {
        self.finished.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_expired(&self, count: u64) {
        self.expired.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ControllerMetricsSnapshot {
        ControllerMetricsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected_region_busy: self.rejected_region_busy.load(Ordering::Relaxed),
            rejected_store_saturated: self.rejected_store_saturated.load(Ordering::Relaxed),
            rejected_global_limit: self.rejected_global_limit.load(Ordering::Relaxed),
            rejected_duplicate: self.rejected_duplicate.load(Ordering::Relaxed),
            finished: self.finished.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ControllerMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ControllerMetricsSnapshot {
    pub admitted: u64,
    pub rejected_region_busy: u64,
    pub rejected_store_saturated: u64,
    pub rejected_global_limit: u64,
    pub rejected_duplicate: u64,
    pub finished: u64,
    pub cancelled: u64,
    pub expired: u64,
}

impl ControllerMetricsSnapshot {
    pub fn total_rejected(&self) -> u64 {
        self.rejected_region_busy
            + self.rejected_store_saturated
            + self.rejected_global_limit
            + self.rejected_duplicate
    }
}
