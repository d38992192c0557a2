//! Scalar-or-list values and the matching primitives conditions build on.

use globset::Glob;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Shell-style glob match. An unparsable pattern never matches; substring
/// checks cover the literal case separately.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    match Glob::new(pattern) {
        Ok(glob) => glob.compile_matcher().is_match(text),
        Err(_) => false,
    }
}

/// A value that may be declared as one string or a list of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValueList(pub Vec<String>);

impl<'de> Deserialize<'de> for ValueList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum StringOrList {
            One(String),
            Many(Vec<String>),
        }
        Ok(match StringOrList::deserialize(deserializer)? {
            StringOrList::One(value) => ValueList(vec![value]),
            StringOrList::Many(values) => ValueList(values),
        })
    }
}

impl ValueList {
    pub fn name(&self) -> String {
        self.0.join(".")
    }

    /// A value list "contains" a candidate set when any needle and any
    /// candidate agree by glob or by substring, in either direction.
    /// Returns the first agreeing candidate.
    pub fn contains(&self, candidates: &[String]) -> Option<String> {
        for candidate in candidates {
            for needle in &self.0 {
                if glob_match(needle, candidate)
                    || glob_match(candidate, needle)
                    || candidate.contains(needle.as_str())
                    || needle.contains(candidate.as_str())
                {
                    return Some(candidate.clone());
                }
            }
        }
        None
    }
}

impl From<&str> for ValueList {
    fn from(value: &str) -> Self {
        ValueList(vec![value.to_string()])
    }
}

impl From<String> for ValueList {
    fn from(value: String) -> Self {
        ValueList(vec![value])
    }
}

impl From<Vec<String>> for ValueList {
    fn from(values: Vec<String>) -> Self {
        ValueList(values)
    }
}

impl From<&[&str]> for ValueList {
    fn from(values: &[&str]) -> Self {
        ValueList(values.iter().map(|v| v.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for ValueList {
    fn from(values: [&str; N]) -> Self {
        ValueList(values.iter().map(|v| v.to_string()).collect())
    }
}

/// The `matches_value` matcher: a list means "any pattern glob-matches the
/// value", a scalar means exact equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueMatcher {
    Patterns(Vec<String>),
    Scalar(Value),
}

impl ValueMatcher {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ValueMatcher::Patterns(patterns) => {
                let rendered = render_value(value);
                patterns.iter().any(|p| glob_match(p, &rendered))
            }
            ValueMatcher::Scalar(expected) => {
                value == expected || render_value(value) == render_value(expected)
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ValueMatcher::Patterns(patterns) => format!("{patterns:?}"),
            ValueMatcher::Scalar(value) => describe_value(value),
        }
    }
}

impl From<&str> for ValueMatcher {
    fn from(value: &str) -> Self {
        ValueMatcher::Scalar(Value::String(value.to_string()))
    }
}

impl From<i64> for ValueMatcher {
    fn from(value: i64) -> Self {
        ValueMatcher::Scalar(Value::from(value))
    }
}

impl<const N: usize> From<[&str; N]> for ValueMatcher {
    fn from(patterns: [&str; N]) -> Self {
        ValueMatcher::Patterns(patterns.iter().map(|p| p.to_string()).collect())
    }
}

impl From<Vec<String>> for ValueMatcher {
    fn from(patterns: Vec<String>) -> Self {
        ValueMatcher::Patterns(patterns)
    }
}

/// Flatten a resolved attribute into the strings `contains_string` scans.
pub fn value_strings(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().map(render_value).collect(),
        other => vec![render_value(other)],
    }
}

/// Render a resolved attribute as one string: strings stay raw, arrays join
/// line by line, everything else uses its JSON form.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(render_value)
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

/// Compact rendering for descriptions: raw strings, JSON for the rest.
pub fn describe_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn glob_matches_shell_style() {
        assert!(glob_match("fail*", "failure"));
        assert!(!glob_match("fail*", "running"));
        assert!(!glob_match("[", "["), "unparsable patterns never match");
    }

    #[test]
    fn value_list_contains_by_substring_both_ways() {
        let needles = ValueList::from("acme/widgets");
        assert!(needles
            .contains(&["https://drone/acme/widgets/7".to_string()])
            .is_some());

        let needles = ValueList::from("https://drone/acme/widgets/7");
        assert!(needles.contains(&["acme/widgets".to_string()]).is_some());
    }

    #[test]
    fn value_list_contains_by_glob() {
        let needles = ValueList::from("*ECONNREFUSED*");
        assert!(needles
            .contains(&["error ECONNREFUSED 127.0.0.1".to_string()])
            .is_some());
    }

    #[test]
    fn value_matcher_scalar_equality() {
        assert!(ValueMatcher::from(0).matches(&json!(0)));
        assert!(!ValueMatcher::from(0).matches(&json!(1)));
        assert!(ValueMatcher::from("node_modules").matches(&json!("node_modules")));
    }

    #[test]
    fn value_matcher_pattern_list_uses_glob() {
        let matcher = ValueMatcher::from(["fail*", "running"]);
        assert!(matcher.matches(&json!("failure")));
        assert!(matcher.matches(&json!("running")));
        assert!(!matcher.matches(&json!("success")));
    }

    #[test]
    fn render_joins_arrays() {
        assert_eq!(render_value(&json!(["a", "b"])), "a\nb");
        assert_eq!(render_value(&json!("x")), "x");
        assert_eq!(render_value(&json!(3)), "3");
    }
}
