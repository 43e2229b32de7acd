//! Region Balancing
//!
//! The balance-region scheduler and its selection pass.
//!
//! ```text
//!   ClusterView ──► BalanceRegionScheduler::schedule(view, diagnose)
//!                     │
//!                     ├─ OperatorController::remove_expired     (live ticks)
//!                     ├─ PlacementEvaluator::new(view)
//!                     ├─ CandidateSelector::select ──► Selection
//!                     └─ diagnose ? DiagnosticReport : OperatorController::add_operator
//! ```

pub mod diagnostic;
pub mod scheduler;
pub mod selector;

pub use diagnostic::{
    CandidateRejection, DiagnosticReport, PairOutcome, PairRecord, RegionRejection,
};
pub use scheduler::{
    BalanceRegionScheduler, ScheduleOutcome, Scheduler, BALANCE_REGION_SCHEDULER_NAME,
};
pub use selector::{CandidateSelector, MoveCandidate, Selection};
