//! Rules: a named condition set plus what to do when it fires.

use std::fmt;

use serde::{Deserialize, Serialize};

use drone_client::AnalysisContext;

use crate::condition::{Condition, ConditionSet, MatchedCondition};
use crate::error::{ConditionIssue, RuleError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleAction {
    NextRule,
    OmitFailed,
    SkipAnalysis,
    RequestCancelation,
    AbruptInterruption,
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuleAction::NextRule => "NEXT_RULE",
            RuleAction::OmitFailed => "OMIT_FAILED",
            RuleAction::SkipAnalysis => "SKIP_ANALYSIS",
            RuleAction::RequestCancelation => "REQUEST_CANCELATION",
            RuleAction::AbruptInterruption => "ABRUPT_INTERRUPTION",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub conditions: ConditionSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<RuleAction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notify: Vec<String>,
}

impl Rule {
    pub fn new(name: impl Into<String>, conditions: Vec<Condition>) -> Result<Self, RuleError> {
        let name = name.into();
        if conditions.is_empty() {
            return Err(RuleError::InvalidConditionSet {
                reason: format!("rule {name} declares no conditions"),
            });
        }
        Ok(Self {
            name,
            conditions: ConditionSet::new(conditions)?,
            action: None,
            notify: Vec::new(),
        })
    }

    pub fn with_action(mut self, action: RuleAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_notify(mut self, targets: Vec<String>) -> Self {
        self.notify = targets;
        self
    }

    /// New rule with `preconditions` spliced in front of its own conditions.
    pub fn with_preconditions(&self, preconditions: &[Condition]) -> Rule {
        Rule {
            name: self.name.clone(),
            conditions: self.conditions.spliced_before(preconditions),
            action: self.action,
            notify: self.notify.clone(),
        }
    }

    /// Re-run construction-time validation, for rules built by
    /// deserialization rather than [`Rule::new`].
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.conditions.is_empty() {
            return Err(RuleError::InvalidConditionSet {
                reason: format!("rule {} declares no conditions", self.name),
            });
        }
        self.conditions.validate()
    }

    /// Fill the action only when unset.
    pub fn with_default_action(mut self, default_action: Option<RuleAction>) -> Self {
        if self.action.is_none() {
            self.action = default_action;
        }
        self
    }

    /// Apply the condition set. A rule with a required condition that did not
    /// match is inapplicable, not failed: both lists come back empty.
    pub fn apply(
        &self,
        ctx: &AnalysisContext<'_>,
    ) -> (Vec<MatchedCondition>, Vec<ConditionIssue>) {
        let (matched, invalid) = self.conditions.apply(ctx);
        if invalid.iter().any(ConditionIssue::is_required_miss) {
            return (Vec::new(), Vec::new());
        }
        (matched, invalid)
    }
}
