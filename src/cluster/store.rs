//! Stores
//!
//! A store is a storage node holding region replicas. Stores are owned by
//! the cluster-metadata side; the scheduler only reads them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label key naming the replica engine of a store
pub const ENGINE_LABEL_KEY: &str = "engine";

/// Engine of stores that carry no engine label
pub const DEFAULT_ENGINE: &str = "default";

// =============================================================================
// Store ID
// =============================================================================

/// Unique identifier for a store
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StoreId(pub u64);

impl std::fmt::Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for StoreId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// =============================================================================
// Store State
// =============================================================================

/// Lifecycle state of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreState {
    /// Serving and eligible for new replicas
    #[default]
    Up,
    /// Unreachable or draining; never a target
    Offline,
    /// Permanently retired; never a target
    Tombstone,
}

impl std::fmt::Display for StoreState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreState::Up => write!(f, "up"),
            StoreState::Offline => write!(f, "offline"),
            StoreState::Tombstone => write!(f, "tombstone"),
        }
    }
}

// =============================================================================
// Store
// =============================================================================

/// A storage node as seen by the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    /// Store ID
    pub id: StoreId,
    /// Advertised address
    #[serde(default)]
    pub address: String,
    /// Lifecycle state
    #[serde(default)]
    pub state: StoreState,
    /// Topology and engine labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Capacity in MiB
    #[serde(default)]
    pub capacity_mb: u64,
    /// Used space in MiB
    #[serde(default)]
    pub used_mb: u64,
    /// Regions hosted, recomputed by the snapshot
    #[serde(default)]
    pub region_count: usize,
    /// Sum of hosted region sizes in MiB, recomputed by the snapshot
    #[serde(default)]
    pub region_size_mb: u64,
}

impl Store {
    /// Create an `Up` store with no labels
    pub fn new(id: impl Into<StoreId>, capacity_mb: u64, used_mb: u64) -> Self {
        Self {
            id: id.into(),
            address: String::new(),
            state: StoreState::Up,
            labels: BTreeMap::new(),
            capacity_mb,
            used_mb,
            region_count: 0,
            region_size_mb: 0,
        }
    }

    /// Builder-style label setter
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Builder-style state setter
    pub fn with_state(mut self, state: StoreState) -> Self {
        self.state = state;
        self
    }

    /// Label value for a key
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Replica engine, taken from the `engine` label
    pub fn engine(&self) -> &str {
        self.label(ENGINE_LABEL_KEY).unwrap_or(DEFAULT_ENGINE)
    }

    /// True when the store runs a non-default engine
    pub fn is_special_engine(&self) -> bool {
        self.engine() != DEFAULT_ENGINE
    }

    #[inline]
    pub fn is_up(&self) -> bool {
        self.state == StoreState::Up
    }

    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.state == StoreState::Tombstone
    }

    /// Offline and tombstone stores are evacuated rather than balanced
    #[inline]
    pub fn is_retired(&self) -> bool {
        matches!(self.state, StoreState::Offline | StoreState::Tombstone)
    }
}
