use thiserror::Error;

use crate::condition::Condition;

/// Construction-time failures. These are real errors: a rule set that refers
/// to unknown attributes or declares no matchers is rejected before it can
/// ever run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    #[error("invalid condition: {reason}")]
    InvalidCondition { reason: String },

    #[error("invalid condition set: {reason}")]
    InvalidConditionSet { reason: String },

    #[error("could not parse rule set: {reason}")]
    Parse { reason: String },
}

/// Evaluation-time outcomes that are carried as data. The engine never
/// propagates these across its `apply` boundary; they end up in the
/// invalid-conditions list of a [`crate::MatchedRule`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionIssue {
    /// The condition could not be evaluated against this context
    /// (unresolvable attribute path, invalid regex, ...).
    Invalid {
        condition: Condition,
        location: String,
        reason: String,
    },

    /// A required condition produced no matches.
    RequiredNotMatched {
        condition: Condition,
        location: String,
    },
}

impl ConditionIssue {
    pub fn condition(&self) -> &Condition {
        match self {
            ConditionIssue::Invalid { condition, .. } => condition,
            ConditionIssue::RequiredNotMatched { condition, .. } => condition,
        }
    }

    pub fn is_required_miss(&self) -> bool {
        matches!(self, ConditionIssue::RequiredNotMatched { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            ConditionIssue::Invalid {
                location, reason, ..
            } => format!("Invalid Condition: {location}: {reason}"),
            ConditionIssue::RequiredNotMatched {
                condition,
                location,
            } => format!(
                "Required Condition: Expect {location} {}",
                condition.describe_matchers()
            ),
        }
    }
}
