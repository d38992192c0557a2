//! Rule engine for CI build-log analysis.
//!
//! A [`RuleSet`] is an ordered list of [`Rule`]s sharing required and default
//! [`Condition`]s. Applying a rule set to an [`AnalysisContext`] yields
//! [`MatchedRule`]s; evaluation failures travel inside the results as
//! [`ConditionIssue`]s and never cross the engine boundary as errors.

pub mod condition;
pub mod context;
pub mod default_rules;
pub mod error;
pub mod rule;
pub mod ruleset;
pub mod value;

pub use condition::{Condition, ConditionSet, MatchType, MatchedCondition};
pub use context::ContextElement;
pub use default_rules::pull_request_rules;
pub use error::{ConditionIssue, RuleError};
pub use rule::{Rule, RuleAction};
pub use ruleset::{MatchedRule, RuleSet};
pub use value::{ValueList, ValueMatcher};

pub use drone_client::AnalysisContext;
