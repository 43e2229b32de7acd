//! Operators
//!
//! An operator is an ordered list of steps that moves one replica of a
//! region from a source store to a target store. Operators are created by
//! the scheduler, owned by the controller once admitted, and executed
//! asynchronously by the surrounding system.

use crate::cluster::{PeerRole, Region, RegionId, StoreId};
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Operator ID
// =============================================================================

/// Identifier assigned by the controller on admission; `0` until then
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OperatorId(pub u64);

impl std::fmt::Display for OperatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl OperatorId {
    /// True once the controller has admitted the operator
    pub fn is_assigned(&self) -> bool {
        self.0 != 0
    }
}

// =============================================================================
// Steps, Kind and Status
// =============================================================================

/// A single replica change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperatorStep {
    AddLearner { store_id: StoreId },
    PromoteLearner { store_id: StoreId },
    RemovePeer { store_id: StoreId },
}

impl std::fmt::Display for OperatorStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatorStep::AddLearner { store_id } => write!(f, "add learner on store {}", store_id),
            OperatorStep::PromoteLearner { store_id } => {
                write!(f, "promote learner on store {}", store_id)
            }
            OperatorStep::RemovePeer { store_id } => write!(f, "remove peer on store {}", store_id),
        }
    }
}

/// Why the operator was created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorKind {
    /// Evens out load between two live stores
    Balance,
    /// Drains a retired store
    Evacuation,
}

impl std::fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatorKind::Balance => write!(f, "balance"),
            OperatorKind::Evacuation => write!(f, "evacuation"),
        }
    }
}

/// Lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorStatus {
    #[default]
    Running,
    Finished,
    Cancelled,
    Timeout,
}

impl std::fmt::Display for OperatorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatorStatus::Running => write!(f, "running"),
            OperatorStatus::Finished => write!(f, "finished"),
            OperatorStatus::Cancelled => write!(f, "cancelled"),
            OperatorStatus::Timeout => write!(f, "timeout"),
        }
    }
}

// =============================================================================
// Operator
// =============================================================================

/// A region move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operator {
    pub id: OperatorId,
    pub region_id: RegionId,
    pub kind: OperatorKind,
    pub steps: Vec<OperatorStep>,
    pub source: StoreId,
    pub target: StoreId,
    pub region_size_mb: u64,
    pub created_at: DateTime<Utc>,
    pub status: OperatorStatus,
}

impl Operator {
    /// Build the steps moving the replica on `source` to `target`.
    ///
    /// Voters are added as learners and promoted before the old replica is
    /// removed, so the voter count never drops during the move.
    pub fn move_peer(
        region: &Region,
        source: StoreId,
        target: StoreId,
        kind: OperatorKind,
    ) -> Result<Self> {
        let peer = region.peer_on(source).ok_or_else(|| Error::InvalidRegion {
            region_id: region.id,
            reason: format!("no peer on source store {}", source),
        })?;
        if region.has_peer_on(target) {
            return Err(Error::InvalidRegion {
                region_id: region.id,
                reason: format!("target store {} already hosts a peer", target),
            });
        }

        let mut steps = vec![OperatorStep::AddLearner { store_id: target }];
        if peer.role == PeerRole::Voter {
            steps.push(OperatorStep::PromoteLearner { store_id: target });
        }
        steps.push(OperatorStep::RemovePeer { store_id: source });

        Ok(Self {
            id: OperatorId::default(),
            region_id: region.id,
            kind,
            steps,
            source,
            target,
            region_size_mb: region.approximate_size_mb,
            created_at: Utc::now(),
            status: OperatorStatus::Running,
        })
    }

    /// Stores whose in-flight budget the operator consumes
    pub fn stores(&self) -> [StoreId; 2] {
        [self.source, self.target]
    }

    /// Time since creation, clamped at zero
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).max(Duration::zero())
    }

    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.age(now) >= timeout
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} region {} from store {} to store {}",
            self.kind, self.region_id, self.source, self.target
        )
    }
}
