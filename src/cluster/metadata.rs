//! Cluster Metadata
//!
//! The live, mutable side of the cluster topology. Heartbeats and applied
//! operators mutate it concurrently with scheduling; schedulers never read
//! it directly but take copy-on-read [`ClusterView`] snapshots, each tagged
//! with the version of the state it was copied from.

use super::region::{Peer, PeerRole, Region, RegionId};
use super::store::{Store, StoreId, StoreState};
use super::view::{ClusterSnapshot, ClusterView};
use crate::config::ReplicationConfig;
use crate::error::{Error, Result};
use crate::operator::{Operator, OperatorStep};
use crate::placement::{validate_rules, PlacementRule};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

// =============================================================================
// Metadata State
// =============================================================================

#[derive(Debug, Default)]
struct MetadataState {
    /// Bumped under the write lock on every mutation
    version: u64,
    stores: BTreeMap<StoreId, Store>,
    regions: BTreeMap<RegionId, Region>,
    rules: Vec<PlacementRule>,
    replication: ReplicationConfig,
}

/// Counts describing the current metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataStats {
    pub version: u64,
    pub stores: usize,
    pub up_stores: usize,
    pub regions: usize,
}

impl MetadataState {
    /// Replace a region's peers with the result of the operator's steps;
    /// nothing changes if any step fails
    fn apply_steps(&mut self, op: &Operator) -> Result<()> {
        let region = self
            .regions
            .get_mut(&op.region_id)
            .ok_or(Error::RegionNotFound {
                region_id: op.region_id,
            })?;

        let mut peers = region.peers.clone();
        for step in &op.steps {
            apply_step(&mut peers, step).map_err(|reason| Error::OperatorApply {
                operator_id: op.id,
                reason,
            })?;
        }
        region.peers = peers;
        Ok(())
    }
}

// =============================================================================
// Cluster Metadata
// =============================================================================

/// Thread-safe store/region/rule state with consistent snapshots
#[derive(Debug, Default)]
pub struct ClusterMetadata {
    state: RwLock<MetadataState>,
}

impl ClusterMetadata {
    /// Create empty metadata
    pub fn new(replication: ReplicationConfig) -> Result<Arc<Self>> {
        replication.validate()?;
        Ok(Arc::new(Self {
            state: RwLock::new(MetadataState {
                replication,
                ..Default::default()
            }),
        }))
    }

    /// Seed metadata from a snapshot file
    pub fn from_snapshot(snapshot: ClusterSnapshot) -> Result<Arc<Self>> {
        let metadata = Self::new(snapshot.replication)?;
        metadata.set_rules(snapshot.rules)?;
        for store in snapshot.stores {
            metadata.put_store(store);
        }
        for region in snapshot.regions {
            metadata.put_region(region)?;
        }
        Ok(metadata)
    }

    /// Insert or replace a store
    pub fn put_store(&self, store: Store) {
        let mut state = self.state.write();
        debug!(store_id = %store.id, state = %store.state, "put store");
        state.stores.insert(store.id, store);
        state.version += 1;
    }

    /// Change a store's lifecycle state
    pub fn set_store_state(&self, store_id: StoreId, store_state: StoreState) -> Result<()> {
        let mut state = self.state.write();
        let store = state
            .stores
            .get_mut(&store_id)
            .ok_or(Error::StoreNotFound { store_id })?;
        if store.state != store_state {
            info!(store_id = %store_id, from = %store.state, to = %store_state, "store state changed");
            store.state = store_state;
        }
        state.version += 1;
        Ok(())
    }

    /// Update a store's used space, as reported by its heartbeat
    pub fn update_store_usage(&self, store_id: StoreId, used_mb: u64) -> Result<()> {
        let mut state = self.state.write();
        let store = state
            .stores
            .get_mut(&store_id)
            .ok_or(Error::StoreNotFound { store_id })?;
        store.used_mb = used_mb;
        state.version += 1;
        Ok(())
    }

    /// Insert or replace a region
    pub fn put_region(&self, region: Region) -> Result<()> {
        region.validate()?;
        let mut state = self.state.write();
        state.regions.insert(region.id, region);
        state.version += 1;
        Ok(())
    }

    /// Remove a region (merged or destroyed)
    pub fn remove_region(&self, region_id: RegionId) -> Result<Region> {
        let mut state = self.state.write();
        let region = state
            .regions
            .remove(&region_id)
            .ok_or(Error::RegionNotFound { region_id })?;
        state.version += 1;
        Ok(region)
    }

    /// Replace the placement rules; malformed rules are rejected up front
    pub fn set_rules(&self, rules: Vec<PlacementRule>) -> Result<()> {
        validate_rules(&rules)?;
        let mut state = self.state.write();
        state.rules = rules;
        state.version += 1;
        Ok(())
    }

    /// Copy the current state into an immutable view
    pub fn snapshot(&self) -> Result<Arc<ClusterView>> {
        let state = self.state.read();
        let view = ClusterView::builder()
            .version(state.version)
            .replication(state.replication.clone())
            .stores(state.stores.values().cloned())
            .regions(state.regions.values().cloned())
            .rules(state.rules.iter().cloned())
            .build()?;
        Ok(Arc::new(view))
    }

    /// Get a region by ID
    pub fn region(&self, region_id: RegionId) -> Option<Region> {
        self.state.read().regions.get(&region_id).cloned()
    }

    /// Execute an operator's steps against a region, all or nothing
    pub fn apply_operator(&self, op: &Operator) -> Result<()> {
        let mut state = self.state.write();
        state.apply_steps(op)?;
        state.version += 1;
        info!(operator_id = %op.id, region_id = %op.region_id, "operator applied");
        Ok(())
    }

    /// Execute an operator and shift the region's size from the source's
    /// used space to the target's, as one mutation
    pub fn apply_move(&self, op: &Operator) -> Result<()> {
        let mut state = self.state.write();
        for store_id in op.stores() {
            if !state.stores.contains_key(&store_id) {
                return Err(Error::StoreNotFound { store_id });
            }
        }
        state.apply_steps(op)?;

        if let Some(source) = state.stores.get_mut(&op.source) {
            source.used_mb = source.used_mb.saturating_sub(op.region_size_mb);
        }
        if let Some(target) = state.stores.get_mut(&op.target) {
            target.used_mb = target.used_mb.saturating_add(op.region_size_mb);
        }
        state.version += 1;
        info!(
            operator_id = %op.id,
            region_id = %op.region_id,
            size_mb = op.region_size_mb,
            "move applied"
        );
        Ok(())
    }

    /// Get metadata statistics
    pub fn stats(&self) -> MetadataStats {
        let state = self.state.read();
        MetadataStats {
            version: state.version,
            stores: state.stores.len(),
            up_stores: state.stores.values().filter(|s| s.is_up()).count(),
            regions: state.regions.len(),
        }
    }
}

fn apply_step(peers: &mut Vec<Peer>, step: &OperatorStep) -> std::result::Result<(), String> {
    match *step {
        OperatorStep::AddLearner { store_id } => {
            if peers.iter().any(|p| p.store_id == store_id) {
                return Err(format!("store {} already hosts a peer", store_id));
            }
            peers.push(Peer::learner(store_id));
        }
        OperatorStep::PromoteLearner { store_id } => {
            let peer = peers
                .iter_mut()
                .find(|p| p.store_id == store_id && p.role == PeerRole::Learner)
                .ok_or_else(|| format!("no learner on store {}", store_id))?;
            peer.role = PeerRole::Voter;
        }
        OperatorStep::RemovePeer { store_id } => {
            let before = peers.len();
            peers.retain(|p| p.store_id != store_id);
            if peers.len() == before {
                return Err(format!("no peer on store {}", store_id));
            }
        }
    }
    Ok(())
}
