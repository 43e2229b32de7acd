//! Cluster View
//!
//! An immutable, point-in-time snapshot of stores, regions, placement rules
//! and replication settings. A view is built once per tick (or reused when
//! nothing changed) and is never mutated by the scheduler.

use super::region::{Region, RegionId};
use super::store::{Store, StoreId};
use crate::config::ReplicationConfig;
use crate::error::{Error, Result};
use crate::placement::{validate_rules, PlacementRule};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::warn;

// =============================================================================
// Cluster View
// =============================================================================

/// Read-only snapshot consumed by the scheduler
#[derive(Debug, Clone)]
pub struct ClusterView {
    version: u64,
    stores: BTreeMap<StoreId, Store>,
    regions: BTreeMap<RegionId, Region>,
    /// Regions per store, sorted by region ID
    store_regions: HashMap<StoreId, Vec<RegionId>>,
    rules: Vec<PlacementRule>,
    replication: ReplicationConfig,
    average_region_size_mb: f64,
}

impl ClusterView {
    pub fn builder() -> ClusterViewBuilder {
        ClusterViewBuilder::default()
    }

    /// Snapshot version; equal versions imply equal content
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn store(&self, id: StoreId) -> Option<&Store> {
        self.stores.get(&id)
    }

    /// Stores ordered by ID
    pub fn stores(&self) -> impl Iterator<Item = &Store> {
        self.stores.values()
    }

    pub fn store_count(&self) -> usize {
        self.stores.len()
    }

    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(&id)
    }

    /// Regions ordered by ID
    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Regions with a peer on the store, sorted by region ID
    pub fn regions_on_store(&self, id: StoreId) -> &[RegionId] {
        self.store_regions
            .get(&id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn rules(&self) -> &[PlacementRule] {
        &self.rules
    }

    pub fn replication(&self) -> &ReplicationConfig {
        &self.replication
    }

    /// Mean region size in MiB; 1 for an empty cluster or zero-sized regions
    pub fn average_region_size_mb(&self) -> f64 {
        self.average_region_size_mb
    }

    /// Store lookup that reports a stale snapshot as an error
    pub fn require_store(&self, id: StoreId) -> Result<&Store> {
        self.store(id).ok_or(Error::StoreNotFound { store_id: id })
    }

    /// Region lookup that reports a stale snapshot as an error
    pub fn require_region(&self, id: RegionId) -> Result<&Region> {
        self.region(id).ok_or(Error::RegionNotFound { region_id: id })
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Assembles and validates a [`ClusterView`]
#[derive(Debug, Default)]
pub struct ClusterViewBuilder {
    version: u64,
    stores: Vec<Store>,
    regions: Vec<Region>,
    rules: Vec<PlacementRule>,
    replication: ReplicationConfig,
}

impl ClusterViewBuilder {
    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn replication(mut self, replication: ReplicationConfig) -> Self {
        self.replication = replication;
        self
    }

    pub fn store(mut self, store: Store) -> Self {
        self.stores.push(store);
        self
    }

    pub fn stores(mut self, stores: impl IntoIterator<Item = Store>) -> Self {
        self.stores.extend(stores);
        self
    }

    pub fn region(mut self, region: Region) -> Self {
        self.regions.push(region);
        self
    }

    pub fn regions(mut self, regions: impl IntoIterator<Item = Region>) -> Self {
        self.regions.extend(regions);
        self
    }

    pub fn rule(mut self, rule: PlacementRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(mut self, rules: impl IntoIterator<Item = PlacementRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Validate and index the snapshot.
    ///
    /// Duplicate replicas within a region and malformed rules are rejected.
    /// Peers on unknown stores are kept: the selector skips such regions as
    /// stale instead of failing the whole snapshot.
    pub fn build(self) -> Result<ClusterView> {
        self.replication.validate()?;
        validate_rules(&self.rules)?;

        let mut stores: BTreeMap<StoreId, Store> = BTreeMap::new();
        for mut store in self.stores {
            store.region_count = 0;
            store.region_size_mb = 0;
            stores.insert(store.id, store);
        }

        let mut regions: BTreeMap<RegionId, Region> = BTreeMap::new();
        let mut store_regions: HashMap<StoreId, Vec<RegionId>> = HashMap::new();
        let mut total_size = 0u64;

        for region in self.regions {
            region.validate()?;

            for peer in &region.peers {
                match stores.get_mut(&peer.store_id) {
                    Some(store) => {
                        store.region_count += 1;
                        store.region_size_mb += region.approximate_size_mb;
                        store_regions.entry(peer.store_id).or_default().push(region.id);
                    }
                    None => {
                        warn!(
                            region_id = %region.id,
                            store_id = %peer.store_id,
                            "region references a store missing from the snapshot"
                        );
                    }
                }
            }

            total_size += region.approximate_size_mb;
            if regions.insert(region.id, region).is_some() {
                return Err(Error::Internal("duplicate region in snapshot".into()));
            }
        }

        for ids in store_regions.values_mut() {
            ids.sort_unstable();
        }

        let average_region_size_mb = if regions.is_empty() || total_size == 0 {
            1.0
        } else {
            total_size as f64 / regions.len() as f64
        };

        Ok(ClusterView {
            version: self.version,
            stores,
            regions,
            store_regions,
            rules: self.rules,
            replication: self.replication,
            average_region_size_mb,
        })
    }
}

// =============================================================================
// Snapshot File Format
// =============================================================================

/// Serializable cluster snapshot, used by the binary and by fixtures
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSnapshot {
    pub replication: ReplicationConfig,
    pub stores: Vec<Store>,
    pub regions: Vec<Region>,
    pub rules: Vec<PlacementRule>,
}

impl ClusterSnapshot {
    /// Load from a YAML or JSON file, chosen by extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(serde_json::from_str(&raw)?),
            _ => Ok(serde_yaml::from_str(&raw)?),
        }
    }

    pub fn into_view(self, version: u64) -> Result<ClusterView> {
        ClusterView::builder()
            .version(version)
            .replication(self.replication)
            .stores(self.stores)
            .regions(self.regions)
            .rules(self.rules)
            .build()
    }
}
