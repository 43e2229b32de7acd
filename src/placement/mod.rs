//! Placement
//!
//! Placement rules describe where the replicas of a region may live and how
//! widely they must be spread. The [`PlacementEvaluator`] checks replica
//! layouts, current or proposed, against the rules of one snapshot.
//!
//! When explicit rules are disabled, a single implicit voter rule
//! (`pd/default`) is derived from the replication settings.

pub mod evaluator;
pub mod rule;

pub use evaluator::{PlacementEvaluator, PlacementViolation, RegionFit, RuleFit};
pub use rule::{
    validate_rules, LabelConstraint, LabelOp, PlacementRule, RuleKey, DEFAULT_RULE_GROUP,
    DEFAULT_RULE_ID,
};
