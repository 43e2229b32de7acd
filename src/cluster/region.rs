//! Regions
//!
//! A region is a data partition replicated across stores. Each replica
//! ("peer") lives on exactly one store and is either a voter or a learner.

use super::store::StoreId;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

// =============================================================================
// Region ID
// =============================================================================

/// Unique identifier for a region
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RegionId(pub u64);

impl std::fmt::Display for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RegionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// =============================================================================
// Peers
// =============================================================================

/// Replica role
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    /// Participates in consensus
    #[default]
    Voter,
    /// Receives data, does not vote
    Learner,
}

impl std::fmt::Display for PeerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerRole::Voter => write!(f, "voter"),
            PeerRole::Learner => write!(f, "learner"),
        }
    }
}

/// One replica placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub store_id: StoreId,
    #[serde(default)]
    pub role: PeerRole,
}

impl Peer {
    pub fn voter(store_id: impl Into<StoreId>) -> Self {
        Self {
            store_id: store_id.into(),
            role: PeerRole::Voter,
        }
    }

    pub fn learner(store_id: impl Into<StoreId>) -> Self {
        Self {
            store_id: store_id.into(),
            role: PeerRole::Learner,
        }
    }
}

// =============================================================================
// Region
// =============================================================================

/// A replicated data partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    /// Approximate size in MiB
    #[serde(default)]
    pub approximate_size_mb: u64,
    pub peers: Vec<Peer>,
}

impl Region {
    pub fn new(id: impl Into<RegionId>, approximate_size_mb: u64, peers: Vec<Peer>) -> Self {
        Self {
            id: id.into(),
            approximate_size_mb,
            peers,
        }
    }

    /// Peer hosted on a store, if any
    pub fn peer_on(&self, store_id: StoreId) -> Option<&Peer> {
        self.peers.iter().find(|p| p.store_id == store_id)
    }

    pub fn has_peer_on(&self, store_id: StoreId) -> bool {
        self.peer_on(store_id).is_some()
    }

    pub fn store_ids(&self) -> impl Iterator<Item = StoreId> + '_ {
        self.peers.iter().map(|p| p.store_id)
    }

    /// First store hosting two peers of this region
    pub fn duplicate_store(&self) -> Option<StoreId> {
        self.peers.iter().enumerate().find_map(|(i, p)| {
            self.peers[..i]
                .iter()
                .any(|q| q.store_id == p.store_id)
                .then_some(p.store_id)
        })
    }

    /// Structural checks every stored region must pass: at least one peer
    /// and no store hosting two of them
    pub fn validate(&self) -> Result<()> {
        if self.peers.is_empty() {
            return Err(Error::InvalidRegion {
                region_id: self.id,
                reason: "region has no peers".into(),
            });
        }
        if let Some(store_id) = self.duplicate_store() {
            return Err(Error::InvalidRegion {
                region_id: self.id,
                reason: format!("store {} hosts more than one peer", store_id),
            });
        }
        Ok(())
    }

    /// Peer layout after moving the replica on `source` to `target`,
    /// keeping its role. `None` if `source` holds no peer.
    pub fn peers_after_move(&self, source: StoreId, target: StoreId) -> Option<Vec<Peer>> {
        let role = self.peer_on(source)?.role;
        Some(
            self.peers
                .iter()
                .map(|p| {
                    if p.store_id == source {
                        Peer {
                            store_id: target,
                            role,
                        }
                    } else {
                        *p
                    }
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peers_after_move_keeps_role() {
        let region = Region::new(1, 96, vec![Peer::voter(1), Peer::voter(2), Peer::learner(9)]);

        let moved = region.peers_after_move(StoreId(9), StoreId(10)).unwrap();
        assert_eq!(moved[2], Peer::learner(10));
        assert_eq!(moved[0], Peer::voter(1));

        assert!(region.peers_after_move(StoreId(5), StoreId(6)).is_none());
    }

    #[test]
    fn test_duplicate_store_detection() {
        let ok = Region::new(1, 1, vec![Peer::voter(1), Peer::voter(2)]);
        assert_eq!(ok.duplicate_store(), None);

        let dup = Region::new(2, 1, vec![Peer::voter(1), Peer::learner(1)]);
        assert_eq!(dup.duplicate_store(), Some(StoreId(1)));
    }

    #[test]
    fn test_peer_lookup() {
        let region = Region::new(1, 1, vec![Peer::voter(1), Peer::voter(2), Peer::learner(3)]);
        assert_eq!(region.peer_on(StoreId(3)).unwrap().role, PeerRole::Learner);
        assert!(region.has_peer_on(StoreId(3)));
        assert!(!region.has_peer_on(StoreId(4)));
    }
}
