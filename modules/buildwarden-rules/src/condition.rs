//! Conditions: single-attribute predicates and their evaluation results.

use std::fmt;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use drone_client::AnalysisContext;

use crate::context::{self, ContextElement};
use crate::error::{ConditionIssue, RuleError};
use crate::value::{describe_value, render_value, value_strings, ValueList, ValueMatcher};

/// Which matcher produced a [`MatchedCondition`]. Variants are listed in
/// evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchType {
    ContainsString,
    MatchesRegex,
    MatchesValue,
    IsNot,
    ValueExact,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchType::ContainsString => "CONTAINS_STRING",
            MatchType::MatchesRegex => "MATCHES_REGEX",
            MatchType::MatchesValue => "MATCHES_VALUE",
            MatchType::IsNot => "IS_NOT",
            MatchType::ValueExact => "VALUE_EXACT",
        };
        write!(f, "{name}")
    }
}

/// A predicate over one attribute of one context element. At least one
/// matcher must be declared; `required` defaults to true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub context_element: ContextElement,
    /// Dot-path into the element. Declared in config either as a list
    /// (`[output, lines]`) or a dotted string (`output.lines`).
    #[serde(deserialize_with = "attribute_path")]
    pub target_attribute: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains_string: Option<ValueList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches_value: Option<ValueMatcher>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_exact: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_not: Option<Value>,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

fn attribute_path<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PathOrDotted {
        Dotted(String),
        Path(Vec<String>),
    }
    Ok(match PathOrDotted::deserialize(deserializer)? {
        PathOrDotted::Dotted(path) => path.split('.').map(str::to_string).collect(),
        PathOrDotted::Path(path) => path,
    })
}

impl Condition {
    pub fn on<I, S>(element: ContextElement, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            context_element: element,
            target_attribute: path.into_iter().map(Into::into).collect(),
            contains_string: None,
            matches_regex: None,
            matches_value: None,
            value_exact: None,
            is_not: None,
            required: true,
        }
    }

    pub fn contains(mut self, needles: impl Into<ValueList>) -> Self {
        self.contains_string = Some(needles.into());
        self
    }

    pub fn matches_regex(mut self, pattern: impl Into<String>) -> Self {
        self.matches_regex = Some(pattern.into());
        self
    }

    pub fn matches_value(mut self, matcher: impl Into<ValueMatcher>) -> Self {
        self.matches_value = Some(matcher.into());
        self
    }

    pub fn value_exact(mut self, value: impl Into<Value>) -> Self {
        self.value_exact = Some(value.into());
        self
    }

    pub fn is_not(mut self, value: impl Into<Value>) -> Self {
        self.is_not = Some(value.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// `element.attr1.attr2` — where the condition points.
    pub fn location(&self) -> String {
        format!("{}.{}", self.context_element, self.target_attribute.join("."))
    }

    fn has_matcher(&self) -> bool {
        self.contains_string.is_some()
            || self.matches_regex.is_some()
            || self.matches_value.is_some()
            || self.value_exact.is_some()
            || self.is_not.is_some()
    }

    /// Construction-time validation: a condition must point somewhere known
    /// and declare at least one matcher.
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.target_attribute.is_empty() {
            return Err(RuleError::InvalidCondition {
                reason: format!("missing target_attribute on {}", self.context_element),
            });
        }
        if !self.has_matcher() {
            return Err(RuleError::InvalidCondition {
                reason: format!("no matchers declared for {}", self.location()),
            });
        }
        if !context::path_is_known(self.context_element, &self.target_attribute) {
            return Err(RuleError::InvalidCondition {
                reason: format!("unknown attribute path {}", self.location()),
            });
        }
        Ok(())
    }

    /// Evaluate every declared matcher against the resolved attribute, in
    /// declaration order. A required condition with zero matches is an issue,
    /// not an empty result.
    pub fn apply(&self, ctx: &AnalysisContext<'_>) -> Result<Vec<MatchedCondition>, ConditionIssue> {
        let location = self.location();
        let value = context::resolve(ctx, self.context_element, &self.target_attribute).map_err(
            |reason| ConditionIssue::Invalid {
                condition: self.clone(),
                location: location.clone(),
                reason,
            },
        )?;

        let mut matched = Vec::new();

        if let Some(needles) = &self.contains_string {
            if needles.contains(&value_strings(&value)).is_some() {
                matched.push(self.matched(MatchType::ContainsString, &location, &value));
            }
        }

        if let Some(pattern) = &self.matches_regex {
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .multi_line(true)
                .dot_matches_new_line(true)
                .build()
                .map_err(|e| ConditionIssue::Invalid {
                    condition: self.clone(),
                    location: location.clone(),
                    reason: format!("cannot match invalid regex `{pattern}`: {e}"),
                })?;
            if regex.is_match(&render_value(&value)) {
                matched.push(self.matched(MatchType::MatchesRegex, &location, &value));
            }
        }

        if let Some(matcher) = &self.matches_value {
            if matcher.matches(&value) {
                matched.push(self.matched(MatchType::MatchesValue, &location, &value));
            }
        }

        if let Some(expected) = &self.is_not {
            if value != *expected {
                matched.push(self.matched(MatchType::IsNot, &location, &value));
            }
        }

        if let Some(expected) = &self.value_exact {
            if value == *expected {
                matched.push(self.matched(MatchType::ValueExact, &location, &value));
            }
        }

        if self.required && matched.is_empty() {
            return Err(ConditionIssue::RequiredNotMatched {
                condition: self.clone(),
                location,
            });
        }
        Ok(matched)
    }

    fn matched(&self, match_type: MatchType, location: &str, value: &Value) -> MatchedCondition {
        MatchedCondition {
            condition: self.clone(),
            location: location.to_string(),
            value: value.clone(),
            match_type,
        }
    }

    /// Human-readable rendering of the declared matchers.
    pub fn describe_matchers(&self) -> String {
        let mut parts = Vec::new();
        if let Some(needles) = &self.contains_string {
            parts.push(format!("to contain string `{}`", needles.name()));
        }
        if let Some(pattern) = &self.matches_regex {
            parts.push(format!("to match regular expression `{pattern}`"));
        }
        if let Some(matcher) = &self.matches_value {
            parts.push(format!("to match value `{}`", matcher.describe()));
        }
        if let Some(value) = &self.is_not {
            parts.push(format!("to not be `{}`", describe_value(value)));
        }
        if let Some(value) = &self.value_exact {
            parts.push(format!("to be exactly `{}`", describe_value(value)));
        }
        parts.join(", ")
    }

    pub fn describe(&self) -> String {
        format!(
            "Condition: Expect {} {}",
            self.location(),
            self.describe_matchers()
        )
    }
}

/// The record of one matcher firing. Identity is
/// `(condition, location, value, match_type)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedCondition {
    pub condition: Condition,
    pub location: String,
    pub value: Value,
    pub match_type: MatchType,
}

impl MatchedCondition {
    pub fn describe(&self) -> String {
        format!(
            "Matched Condition: Expect {} `{}` {}",
            self.location,
            describe_value(&self.value),
            self.condition.describe_matchers()
        )
    }
}

/// Ordered, duplicate-free collection of conditions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionSet {
    conditions: Vec<Condition>,
}

impl ConditionSet {
    pub fn new(conditions: Vec<Condition>) -> Result<Self, RuleError> {
        let mut set = Self::empty();
        for condition in conditions {
            condition.validate()?;
            set.push_unique(condition);
        }
        Ok(set)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.conditions.iter()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    fn push_unique(&mut self, condition: Condition) {
        if !self.conditions.contains(&condition) {
            self.conditions.push(condition);
        }
    }

    /// Re-run construction-time validation, for sets built by
    /// deserialization rather than [`ConditionSet::new`].
    pub fn validate(&self) -> Result<(), RuleError> {
        for condition in &self.conditions {
            condition.validate()?;
        }
        Ok(())
    }

    /// New set with `preconditions` in front of these conditions.
    pub fn spliced_before(&self, preconditions: &[Condition]) -> ConditionSet {
        let mut set = Self::empty();
        for condition in preconditions.iter().chain(self.conditions.iter()) {
            set.push_unique(condition.clone());
        }
        set
    }

    /// Evaluate every condition; failures become issues and evaluation
    /// continues. Matches appear in declaration order.
    pub fn apply(
        &self,
        ctx: &AnalysisContext<'_>,
    ) -> (Vec<MatchedCondition>, Vec<ConditionIssue>) {
        let mut matched = Vec::new();
        let mut invalid = Vec::new();
        for condition in &self.conditions {
            match condition.apply(ctx) {
                Ok(results) => matched.extend(results),
                Err(issue) => invalid.push(issue),
            }
        }
        (matched, invalid)
    }
}

impl From<ConditionSet> for Vec<Condition> {
    fn from(set: ConditionSet) -> Self {
        set.conditions
    }
}
