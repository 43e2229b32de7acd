//! Error types for the Region Balancer
//!
//! Provides structured error types for snapshot construction, placement
//! rule validation, operator bookkeeping and configuration loading.
//!
//! Admission rejections are not errors: they are reported through
//! [`crate::operator::RejectReason`] so that callers can surface them in
//! diagnostics without unwinding the tick.

use crate::cluster::{RegionId, StoreId};
use crate::operator::OperatorId;
use thiserror::Error;

/// Unified error type for the balancer
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Placement Rule Errors
    // =========================================================================
    #[error("Invalid placement rule {rule}: {reason}")]
    InvalidPlacementRule { rule: String, reason: String },

    #[error("Invalid label constraint on key {key}: {reason}")]
    InvalidLabelConstraint { key: String, reason: String },

    #[error("Duplicate placement rule: {rule}")]
    DuplicatePlacementRule { rule: String },

    // =========================================================================
    // Snapshot Errors
    // =========================================================================
    #[error("Store not found: {store_id}")]
    StoreNotFound { store_id: StoreId },

    #[error("Region not found: {region_id}")]
    RegionNotFound { region_id: RegionId },

    #[error("Invalid region {region_id}: {reason}")]
    InvalidRegion { region_id: RegionId, reason: String },

    // =========================================================================
    // Operator Errors
    // =========================================================================
    #[error("Operator not found: {operator_id}")]
    OperatorNotFound { operator_id: OperatorId },

    #[error("Operator {operator_id} cannot be applied: {reason}")]
    OperatorApply {
        operator_id: OperatorId,
        reason: String,
    },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// A transient error only invalidates the candidate that hit it; the
    /// next tick works from a fresh snapshot.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::StoreNotFound { .. }
                | Error::RegionNotFound { .. }
                | Error::OperatorApply { .. }
        )
    }

    /// Check if retrying the same call can succeed without operator action
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::Configuration(_)
                | Error::InvalidPlacementRule { .. }
                | Error::InvalidLabelConstraint { .. }
                | Error::DuplicatePlacementRule { .. }
                | Error::JsonParse(_)
                | Error::YamlParse(_)
        )
    }
}

/// Result type alias for the balancer
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_snapshot_errors_are_transient() {
        let err = Error::StoreNotFound {
            store_id: StoreId(7),
        };
        assert!(err.is_transient());
        assert!(err.is_retryable());

        let err = Error::RegionNotFound {
            region_id: RegionId(42),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn test_configuration_errors_are_not_retryable() {
        let err = Error::Configuration("max_pair_attempts must be positive".into());
        assert!(!err.is_retryable());
        assert!(!err.is_transient());

        let err = Error::InvalidPlacementRule {
            rule: "pd/default".into(),
            reason: "count must be at least 1".into(),
        };
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Invalid placement rule pd/default: count must be at least 1"
        );
    }
}
