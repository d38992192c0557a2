//! The stock rule set applied to pull-request builds of a repository.
//!
//! Rules cover the failure modes the team actually sees in CI logs; each one
//! names the failing step pattern it recognizes. Shared conditions keep the
//! rules scoped to the watched repository's PR builds with a non-zero exit.

use crate::condition::Condition;
use crate::context::ContextElement;
use crate::error::RuleError;
use crate::rule::{Rule, RuleAction};
use crate::ruleset::RuleSet;
use crate::ConditionSet;

const GITHUB_PULL_REQUEST_PATTERN: &str = r"github\.com/[^/]+/[^/]+/pull/\d+";

/// Build the default rule set for `owner/repo` pull-request builds.
pub fn pull_request_rules(repo_slug: &str) -> Result<RuleSet, RuleError> {
    let rules = vec![
        Rule::new(
            "ValidateDocsPrettified",
            vec![Condition::on(ContextElement::Step, ["output", "lines"])
                .matches_regex("prettier:docs")],
        )?,
        Rule::new(
            "SlackServerError",
            vec![
                Condition::on(ContextElement::Step, ["name"]).contains("slack"),
                Condition::on(ContextElement::Step, ["output", "lines"])
                    .contains("server error"),
            ],
        )?,
        Rule::new(
            "GitBranchNameInvalidForDeploy",
            vec![Condition::on(ContextElement::Step, ["output", "lines"])
                .matches_regex("a DNS-1123 label must consist of lower case")],
        )?,
        Rule::new(
            "ConnectionRefused",
            vec![Condition::on(ContextElement::Step, ["output", "lines"])
                .contains("ECONNREFUSED")],
        )?,
        Rule::new(
            "GitMergeConflict",
            vec![Condition::on(ContextElement::Step, ["output", "lines"]).matches_regex(
                "(not something we can merge|Automatic merge failed; fix conflicts)",
            )],
        )?
        .with_action(RuleAction::SkipAnalysis),
        Rule::new(
            "YarnDependencyNotResolved",
            vec![
                Condition::on(ContextElement::Step, ["name"]).matches_value("node_modules"),
                Condition::on(ContextElement::Step, ["output", "lines"]).matches_regex(
                    r#"Couldn't find any versions for\s*("([^"]+)" that matches "([^"]+)")?"#,
                ),
            ],
        )?,
    ];

    Ok(RuleSet {
        name: format!("{}-pr", repo_slug.replace('/', "-")),
        required_conditions: ConditionSet::new(vec![
            Condition::on(ContextElement::Build, ["link"]).contains(repo_slug.to_string()),
            Condition::on(ContextElement::Build, ["link"])
                .matches_regex(GITHUB_PULL_REQUEST_PATTERN)
                .optional(),
            Condition::on(ContextElement::Step, ["status"]).matches_value(["fail*", "running"]),
        ])?,
        default_conditions: ConditionSet::new(vec![
            Condition::on(ContextElement::Step, ["exit_code"]).is_not(0),
        ])?,
        default_action: Some(RuleAction::NextRule),
        default_notify: vec!["slack".to_string()],
        rules,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rules_construct() {
        let ruleset = pull_request_rules("acme/widgets").unwrap();
        assert_eq!(ruleset.name, "acme-widgets-pr");
        assert_eq!(ruleset.rules.len(), 6);
        assert_eq!(ruleset.required_conditions.len(), 3);
        assert_eq!(ruleset.default_conditions.len(), 1);
    }
}
