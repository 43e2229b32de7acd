//! Balancer Configuration
//!
//! Immutable configuration objects handed to each scheduler instance and
//! to the operator controller. Nothing here is process-wide: two
//! schedulers built from two configs never observe each other's settings.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

// =============================================================================
// Replication Configuration
// =============================================================================

/// Cluster-wide replication settings, carried by every cluster snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Number of voter replicas per region
    pub max_replicas: usize,
    /// Topology labels ordered from the widest to the narrowest domain
    pub location_labels: Vec<String>,
    /// Label at which replicas must not share a value (empty = disabled)
    pub isolation_level: String,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            max_replicas: 3,
            location_labels: Vec::new(),
            isolation_level: String::new(),
        }
    }
}

impl ReplicationConfig {
    /// Validate the replication settings
    pub fn validate(&self) -> Result<()> {
        if self.max_replicas == 0 {
            return Err(Error::Configuration(
                "max_replicas must be at least 1".into(),
            ));
        }
        if !self.isolation_level.is_empty()
            && !self.location_labels.iter().any(|l| l == &self.isolation_level)
        {
            return Err(Error::Configuration(format!(
                "isolation_level {} is not one of location_labels {:?}",
                self.isolation_level, self.location_labels
            )));
        }
        Ok(())
    }

    /// Isolation level as an option
    pub fn isolation_level(&self) -> Option<&str> {
        if self.isolation_level.is_empty() {
            None
        } else {
            Some(&self.isolation_level)
        }
    }
}

// =============================================================================
// Scheduler Configuration
// =============================================================================

/// How the tolerance dead-band is derived from `tolerant_size_ratio`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToleranceMode {
    /// band = ratio × average region size of the snapshot
    #[default]
    ScaledByRegionSize,
    /// band = ratio, in score units
    Fixed,
}

/// Weights blending the two load signals of a store
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Weight of region count (scaled by the region size hint)
    pub region_count: f64,
    /// Weight of used space
    pub used_space: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            region_count: 0.5,
            used_space: 0.5,
        }
    }
}

/// Configuration for one balance-region scheduler instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Dead-band multiplier; stores closer than the band are balanced
    pub tolerant_size_ratio: f64,
    /// How the dead-band scales
    pub tolerance_mode: ToleranceMode,
    /// Evaluate explicit placement rules instead of the implicit rule
    pub placement_rules_enabled: bool,
    /// Source/target pairs examined per tick
    pub max_pair_attempts: usize,
    /// Regions sampled from a source store per pair
    pub region_sample_size: usize,
    /// Seed mixed with the snapshot version for region sampling
    pub sample_seed: u64,
    /// Move replicas off offline and tombstone stores regardless of score
    pub evacuate_retired_stores: bool,
    /// Score weights
    pub scoring: ScoringWeights,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tolerant_size_ratio: 5.0,
            tolerance_mode: ToleranceMode::ScaledByRegionSize,
            placement_rules_enabled: false,
            max_pair_attempts: 10,
            region_sample_size: 64,
            sample_seed: 0x5eed_ba1a_0ce5,
            evacuate_retired_stores: true,
            scoring: ScoringWeights::default(),
        }
    }
}

impl SchedulerConfig {
    /// Validate the scheduler settings
    pub fn validate(&self) -> Result<()> {
        if !self.tolerant_size_ratio.is_finite() || self.tolerant_size_ratio < 0.0 {
            return Err(Error::Configuration(format!(
                "tolerant_size_ratio must be a non-negative number, got {}",
                self.tolerant_size_ratio
            )));
        }
        if self.max_pair_attempts == 0 {
            return Err(Error::Configuration(
                "max_pair_attempts must be at least 1".into(),
            ));
        }
        if self.region_sample_size == 0 {
            return Err(Error::Configuration(
                "region_sample_size must be at least 1".into(),
            ));
        }
        let w = &self.scoring;
        if !(w.region_count >= 0.0 && w.used_space >= 0.0) {
            return Err(Error::Configuration(
                "scoring weights must be non-negative".into(),
            ));
        }
        if w.region_count + w.used_space <= 0.0 {
            return Err(Error::Configuration(
                "at least one scoring weight must be positive".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Operator Limits
// =============================================================================

/// Admission limits enforced by the operator controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorLimits {
    /// In-flight operators touching a single store
    pub store_limit: usize,
    /// In-flight operators cluster-wide
    pub global_limit: usize,
    /// Seconds before an in-flight operator is considered failed
    pub operator_timeout_secs: u64,
}

impl Default for OperatorLimits {
    fn default() -> Self {
        Self {
            store_limit: 4,
            global_limit: 64,
            operator_timeout_secs: 600,
        }
    }
}

impl OperatorLimits {
    /// Validate the limits
    pub fn validate(&self) -> Result<()> {
        if self.store_limit == 0 || self.global_limit == 0 {
            return Err(Error::Configuration(
                "store_limit and global_limit must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Operator timeout as a chrono duration
    pub fn operator_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.operator_timeout_secs.min(i64::MAX as u64) as i64)
    }
}

// =============================================================================
// Balancer Configuration
// =============================================================================

/// Top-level configuration file: scheduler settings plus admission limits.
/// Replication settings travel with the cluster snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    pub scheduler: SchedulerConfig,
    pub limits: OperatorLimits,
}

impl BalancerConfig {
    /// Load from a YAML or JSON file, chosen by extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&raw)?,
            _ => serde_yaml::from_str(&raw)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        self.limits.validate()
    }
}
