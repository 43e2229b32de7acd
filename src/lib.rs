//! Region Balancer
//!
//! The region-balancing scheduler of a distributed storage control plane.
//! Each tick it looks at a snapshot of the cluster, picks at most one
//! replica move from a heavily loaded store to a lightly loaded one, checks
//! the move against the placement rules, and hands it to an operator
//! controller that bounds concurrent data movement.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      BalanceRegionScheduler (tick)                       │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌─────────────────────┐  │
//! │  │ CandidateSelector│──►│   StoreScorer    │   │ PlacementEvaluator  │  │
//! │  │ (pairs, samples) │──►│ (load, dead-band)│   │ (rules, isolation)  │  │
//! │  └────────┬─────────┘   └──────────────────┘   └──────────▲──────────┘  │
//! │           └───────────────────────────────────────────────┘             │
//! │                              │ operator                                  │
//! │                   ┌──────────▼───────────┐                               │
//! │                   │  OperatorController  │  shared by all schedulers     │
//! │                   │  (region lock, store │                               │
//! │                   │   and global limits) │                               │
//! │                   └──────────────────────┘                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │   ClusterMetadata (RwLock) ──snapshot()──► ClusterView (immutable)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cluster`]: stores, regions, live metadata and immutable views
//! - [`placement`]: placement rules and the evaluator
//! - [`scoring`]: store scores and the tolerance dead-band
//! - [`balance`]: candidate selection, diagnostics and the scheduler
//! - [`operator`]: operators and the admission controller
//! - [`config`]: scheduler, replication and limit configuration
//! - [`metrics`]: lock-free counters
//! - [`error`]: error types

pub mod balance;
pub mod cluster;
pub mod config;
pub mod error;
pub mod metrics;
pub mod operator;
pub mod placement;
pub mod scoring;

// Re-export commonly used types
pub use balance::{
    BalanceRegionScheduler, CandidateRejection, CandidateSelector, DiagnosticReport,
    MoveCandidate, PairOutcome, ScheduleOutcome, Scheduler, BALANCE_REGION_SCHEDULER_NAME,
};

pub use cluster::{
    ClusterMetadata, ClusterSnapshot, ClusterView, ClusterViewBuilder, Peer, PeerRole, Region,
    RegionId, Store, StoreId, StoreState,
};

pub use config::{
    BalancerConfig, OperatorLimits, ReplicationConfig, SchedulerConfig, ScoringWeights,
    ToleranceMode,
};

pub use error::{Error, Result};

pub use metrics::{ControllerMetricsSnapshot, SchedulerMetricsSnapshot};

pub use operator::{
    Admission, Operator, OperatorController, OperatorId, OperatorKind, OperatorStatus,
    OperatorStep, RejectReason,
};

pub use placement::{
    LabelConstraint, LabelOp, PlacementEvaluator, PlacementRule, RegionFit, RuleFit, RuleKey,
};

pub use scoring::{CapacityAwareScorer, ScoredStore, StoreScorer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
