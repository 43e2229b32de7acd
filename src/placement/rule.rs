//! Placement Rules
//!
//! Declarative constraints on how many replicas of which role a region
//! keeps, on which stores, and how widely they are spread.

use crate::cluster::{PeerRole, Store, ENGINE_LABEL_KEY};
use crate::config::ReplicationConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Group of the rule synthesized when explicit rules are disabled
pub const DEFAULT_RULE_GROUP: &str = "pd";

/// ID of the rule synthesized when explicit rules are disabled
pub const DEFAULT_RULE_ID: &str = "default";

// =============================================================================
// Label Constraints
// =============================================================================

/// Operator of a label constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LabelOp {
    #[serde(rename = "in")]
    In,
    #[serde(rename = "notIn")]
    NotIn,
    #[serde(rename = "exists")]
    Exists,
    #[serde(rename = "notExists")]
    NotExists,
}

impl std::fmt::Display for LabelOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LabelOp::In => write!(f, "in"),
            LabelOp::NotIn => write!(f, "notIn"),
            LabelOp::Exists => write!(f, "exists"),
            LabelOp::NotExists => write!(f, "notExists"),
        }
    }
}

/// A single `key op values` predicate over store labels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelConstraint {
    pub key: String,
    pub op: LabelOp,
    #[serde(default)]
    pub values: Vec<String>,
}

impl LabelConstraint {
    pub fn new(key: impl Into<String>, op: LabelOp, values: &[&str]) -> Self {
        Self {
            key: key.into(),
            op,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(Error::InvalidLabelConstraint {
                key: self.key.clone(),
                reason: "key must not be empty".into(),
            });
        }
        match self.op {
            LabelOp::In | LabelOp::NotIn if self.values.is_empty() => {
                Err(Error::InvalidLabelConstraint {
                    key: self.key.clone(),
                    reason: format!("operator {} needs at least one value", self.op),
                })
            }
            LabelOp::Exists | LabelOp::NotExists if !self.values.is_empty() => {
                Err(Error::InvalidLabelConstraint {
                    key: self.key.clone(),
                    reason: format!("operator {} takes no values", self.op),
                })
            }
            _ => Ok(()),
        }
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.op {
            LabelOp::In => value.is_some_and(|v| self.values.contains(v)),
            LabelOp::NotIn => value.map_or(true, |v| !self.values.contains(v)),
            LabelOp::Exists => value.is_some(),
            LabelOp::NotExists => value.is_none(),
        }
    }
}

// =============================================================================
// Rule Key
// =============================================================================

/// `(group, id)` identity of a rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleKey {
    pub group_id: String,
    pub id: String,
}

impl std::fmt::Display for RuleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.group_id, self.id)
    }
}

// =============================================================================
// Placement Rule
// =============================================================================

/// Replica count, role, store constraints and spread for a region group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRule {
    pub group_id: String,
    pub id: String,
    #[serde(default)]
    pub role: PeerRole,
    pub count: usize,
    #[serde(default)]
    pub label_constraints: Vec<LabelConstraint>,
    /// Topology labels ordered from the widest to the narrowest domain
    #[serde(default)]
    pub location_labels: Vec<String>,
    /// Label at which replicas must be spread; defaults to the first
    /// location label
    #[serde(default)]
    pub isolation_level: Option<String>,
}

impl PlacementRule {
    /// A voter rule with no constraints
    pub fn voters(group_id: impl Into<String>, id: impl Into<String>, count: usize) -> Self {
        Self {
            group_id: group_id.into(),
            id: id.into(),
            role: PeerRole::Voter,
            count,
            label_constraints: Vec::new(),
            location_labels: Vec::new(),
            isolation_level: None,
        }
    }

    /// A learner rule with no constraints
    pub fn learners(group_id: impl Into<String>, id: impl Into<String>, count: usize) -> Self {
        Self {
            role: PeerRole::Learner,
            ..Self::voters(group_id, id, count)
        }
    }

    pub fn with_constraint(mut self, constraint: LabelConstraint) -> Self {
        self.label_constraints.push(constraint);
        self
    }

    pub fn with_location_labels(mut self, labels: &[&str]) -> Self {
        self.location_labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_isolation_level(mut self, level: impl Into<String>) -> Self {
        self.isolation_level = Some(level.into());
        self
    }

    /// The rule every region follows when explicit rules are disabled
    pub fn implicit(replication: &ReplicationConfig) -> Self {
        Self {
            group_id: DEFAULT_RULE_GROUP.into(),
            id: DEFAULT_RULE_ID.into(),
            role: PeerRole::Voter,
            count: replication.max_replicas,
            label_constraints: Vec::new(),
            location_labels: replication.location_labels.clone(),
            isolation_level: replication.isolation_level().map(str::to_string),
        }
    }

    pub fn key(&self) -> RuleKey {
        RuleKey {
            group_id: self.group_id.clone(),
            id: self.id.clone(),
        }
    }

    /// Label whose values replicas are spread over
    pub fn isolation_key(&self) -> Option<&str> {
        self.isolation_level
            .as_deref()
            .or_else(|| self.location_labels.first().map(String::as_str))
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidPlacementRule {
            rule: self.key().to_string(),
            reason: reason.to_string(),
        };
        if self.group_id.is_empty() || self.id.is_empty() {
            return Err(invalid("group_id and id must not be empty"));
        }
        if self.count == 0 {
            return Err(invalid("count must be at least 1"));
        }
        if let Some(level) = &self.isolation_level {
            if !self.location_labels.iter().any(|l| l == level) {
                return Err(invalid("isolation_level must be one of location_labels"));
            }
        }
        for constraint in &self.label_constraints {
            constraint.validate()?;
        }
        Ok(())
    }

    /// Whether a store may host a replica governed by this rule.
    ///
    /// Stores of a non-default engine only match rules that constrain the
    /// engine label explicitly, so columnar replicas never satisfy general
    /// voter rules.
    pub fn matches_store(&self, store: &Store) -> bool {
        if store.is_special_engine()
            && !self
                .label_constraints
                .iter()
                .any(|c| c.key == ENGINE_LABEL_KEY)
        {
            return false;
        }
        self.label_constraints
            .iter()
            .all(|c| c.matches(&store.labels))
    }
}

/// Validate a rule set: every rule individually, plus unique keys
pub fn validate_rules(rules: &[PlacementRule]) -> Result<()> {
    let mut seen = HashSet::new();
    for rule in rules {
        rule.validate()?;
        if !seen.insert(rule.key()) {
            return Err(Error::DuplicatePlacementRule {
                rule: rule.key().to_string(),
            });
        }
    }
    Ok(())
}
