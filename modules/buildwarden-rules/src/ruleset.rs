//! Rule sets: ordered rules with shared required and default conditions.

use serde::{Deserialize, Serialize};
use tracing::warn;

use drone_client::AnalysisContext;

use crate::condition::{ConditionSet, MatchedCondition};
use crate::error::ConditionIssue;
use crate::rule::{Rule, RuleAction};

/// The outcome of one rule firing (or of a required-condition failure when
/// the rule set's default action interrupts analysis).
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedRule {
    pub rule: Rule,
    pub matched: Vec<MatchedCondition>,
    pub invalid: Vec<ConditionIssue>,
    /// Set when an interrupting match also asks for the build's cancelation.
    pub cancelation_requested: bool,
}

impl MatchedRule {
    pub fn describe(&self) -> String {
        let mut lines = vec![format!("Matched Rule **{}**:", self.rule.name)];
        for matched in &self.matched {
            lines.push(format!("  {}", matched.describe()));
        }
        if !self.invalid.is_empty() {
            lines.push("  **Invalid Conditions**:".to_string());
            for issue in &self.invalid {
                lines.push(format!("    {}", issue.describe()));
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub name: String,
    #[serde(default)]
    pub required_conditions: ConditionSet,
    #[serde(default)]
    pub default_conditions: ConditionSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_action: Option<RuleAction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_notify: Vec<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl RuleSet {
    /// Load a rule set from its YAML declaration, validating every condition
    /// before the set can be applied.
    pub fn from_yaml(yaml: &str) -> Result<Self, crate::error::RuleError> {
        let ruleset: RuleSet =
            serde_yaml::from_str(yaml).map_err(|e| crate::error::RuleError::Parse {
                reason: e.to_string(),
            })?;
        ruleset.validate()?;
        Ok(ruleset)
    }

    /// Construction-time validation for deserialized rule sets.
    pub fn validate(&self) -> Result<(), crate::error::RuleError> {
        self.required_conditions.validate()?;
        self.default_conditions.validate()?;
        for rule in &self.rules {
            rule.validate()?;
        }
        Ok(())
    }

    /// Evaluate the rule set against a context. Deterministic: rules run in
    /// declaration order, conditions in splice order (required, default,
    /// rule's own).
    pub fn apply(&self, ctx: &AnalysisContext<'_>) -> Vec<MatchedRule> {
        // Step 1: evaluate the shared required conditions on their own to
        // decide whether analysis is worth starting at all.
        let (_, required_issues) = self.required_conditions.apply(ctx);
        let required_total = self.required_conditions.len();
        let missed = required_issues
            .iter()
            .filter(|issue| issue.condition().required)
            .count();

        if required_total > 0 && missed >= required_total {
            match self.default_action {
                None | Some(RuleAction::NextRule) | Some(RuleAction::OmitFailed) => {}
                Some(RuleAction::SkipAnalysis) => return Vec::new(),
                Some(RuleAction::AbruptInterruption) => {
                    return vec![self.interruption(required_issues, false)];
                }
                Some(RuleAction::RequestCancelation) => {
                    return vec![self.interruption(required_issues, true)];
                }
            }
        }

        // Step 2: run each rule with the shared conditions spliced in front.
        let mut results = Vec::new();
        for rule in &self.rules {
            let rule = rule
                .with_preconditions(self.default_conditions.conditions())
                .with_preconditions(self.required_conditions.conditions())
                .with_default_action(self.default_action);

            let (matched, invalid) = rule.apply(ctx);
            if matched.is_empty() && invalid.is_empty() {
                continue;
            }

            let action = rule.action;
            if action != Some(RuleAction::OmitFailed) {
                results.push(MatchedRule {
                    rule,
                    matched,
                    invalid,
                    cancelation_requested: false,
                });
            }

            match action {
                None
                | Some(RuleAction::NextRule)
                | Some(RuleAction::OmitFailed) => continue,
                Some(RuleAction::SkipAnalysis) => break,
                Some(other) => {
                    warn!(
                        ruleset = %self.name,
                        action = %other,
                        "Rule action only applies as a ruleset default, continuing"
                    );
                }
            }
        }
        results
    }

    /// Synthetic result describing a required-condition failure that stopped
    /// analysis.
    fn interruption(&self, issues: Vec<ConditionIssue>, cancelation: bool) -> MatchedRule {
        MatchedRule {
            rule: Rule {
                name: self.name.clone(),
                conditions: self.required_conditions.clone(),
                action: self.default_action,
                notify: self.default_notify.clone(),
            },
            matched: Vec::new(),
            invalid: issues,
            cancelation_requested: cancelation,
        }
    }
}
