//! Rule-set behavior over a fake build context.

use drone_client::{AnalysisContext, Build, Output, OutputLine, Stage, Step};

use buildwarden_rules::{
    pull_request_rules, Condition, ConditionSet, ContextElement, MatchType, Rule, RuleAction,
    RuleSet,
};

struct Fixture {
    build: Build,
    stage: Stage,
    step: Step,
}

impl Fixture {
    fn ctx(&self) -> AnalysisContext<'_> {
        AnalysisContext {
            build: &self.build,
            stage: &self.stage,
            step: &self.step,
        }
    }
}

fn fake_context_with_output_lines(build_link: &str, step_name: &str, lines: &[&str]) -> Fixture {
    Fixture {
        build: Build {
            link: build_link.to_string(),
            number: 138_785,
            ..Default::default()
        },
        stage: Stage {
            number: 1,
            name: "build".to_string(),
            status: "failure".to_string(),
            ..Default::default()
        },
        step: Step {
            number: 2,
            name: step_name.to_string(),
            status: "failure".to_string(),
            exit_code: 1,
            output: Output {
                lines: lines
                    .iter()
                    .enumerate()
                    .map(|(i, out)| OutputLine {
                        time: i as i64,
                        pos: i as i64,
                        out: out.to_string(),
                    })
                    .collect(),
                message: None,
            },
            ..Default::default()
        },
    }
}

#[test]
fn yarn_dependency_not_resolved_end_to_end() {
    let fixture = fake_context_with_output_lines(
        "https://drone.example.com/acme/repo/138785",
        "node_modules",
        &[r#"Couldn't find any versions for "react" that matches "2021""#],
    );

    let ruleset = pull_request_rules("acme/repo").unwrap();
    let matches = ruleset.apply(&fixture.ctx());

    assert_eq!(matches.len(), 1);
    let matched = &matches[0];
    assert_eq!(matched.rule.name, "YarnDependencyNotResolved");
    assert!(!matched.cancelation_requested);

    // Five matched conditions: required (link, status), default (exit_code),
    // then the rule's own (name, output regex). The PR-link condition misses
    // and it alone is non-required, so nothing else appears.
    assert_eq!(matched.matched.len(), 5);
    let locations: Vec<&str> = matched
        .matched
        .iter()
        .map(|m| m.location.as_str())
        .collect();
    assert_eq!(
        locations,
        vec![
            "build.link",
            "step.status",
            "step.exit_code",
            "step.name",
            "step.output.lines",
        ]
    );
    let types: Vec<MatchType> = matched.matched.iter().map(|m| m.match_type).collect();
    assert_eq!(
        types,
        vec![
            MatchType::ContainsString,
            MatchType::MatchesValue,
            MatchType::IsNot,
            MatchType::MatchesValue,
            MatchType::MatchesRegex,
        ]
    );
}

#[test]
fn ruleset_apply_is_deterministic() {
    let fixture = fake_context_with_output_lines(
        "https://drone.example.com/acme/repo/138785",
        "node_modules",
        &[r#"Couldn't find any versions for "react" that matches "2021""#],
    );
    let ruleset = pull_request_rules("acme/repo").unwrap();

    let first = ruleset.apply(&fixture.ctx());
    let second = ruleset.apply(&fixture.ctx());
    assert_eq!(first, second);
}

#[test]
fn omit_failed_suppresses_the_match() {
    let fixture = fake_context_with_output_lines(
        "https://drone.example.com/acme/repo/138785",
        "node_modules",
        &[r#"Couldn't find any versions for "react" that matches "2021""#],
    );

    let ruleset = RuleSet {
        name: "my-ruleset".to_string(),
        rules: vec![Rule::new(
            "StepSucceeded",
            vec![Condition::on(ContextElement::Step, ["exit_code"]).value_exact(0)],
        )
        .unwrap()
        .with_action(RuleAction::OmitFailed)],
        ..Default::default()
    };

    let matches = ruleset.apply(&fixture.ctx());
    assert!(matches.is_empty());
}

fn all_required_invalid_ruleset(default_action: RuleAction) -> RuleSet {
    RuleSet {
        name: "gated".to_string(),
        default_action: Some(default_action),
        required_conditions: ConditionSet::new(vec![
            Condition::on(ContextElement::Step, ["exit_code"]).value_exact(0),
            Condition::on(ContextElement::Step, ["name"]).matches_value("does-not-exist"),
        ])
        .unwrap(),
        rules: vec![Rule::new(
            "NeverReached",
            vec![Condition::on(ContextElement::Step, ["status"]).matches_value("failure")],
        )
        .unwrap()],
        ..Default::default()
    }
}

#[test]
fn skip_analysis_short_circuits_to_nothing() {
    let fixture =
        fake_context_with_output_lines("https://drone.example.com/acme/repo/1", "yarn", &[]);
    let ruleset = all_required_invalid_ruleset(RuleAction::SkipAnalysis);
    assert!(ruleset.apply(&fixture.ctx()).is_empty());
}

#[test]
fn abrupt_interruption_yields_exactly_one_synthetic_match() {
    let fixture =
        fake_context_with_output_lines("https://drone.example.com/acme/repo/1", "yarn", &[]);
    let ruleset = all_required_invalid_ruleset(RuleAction::AbruptInterruption);

    let matches = ruleset.apply(&fixture.ctx());
    assert_eq!(matches.len(), 1);
    let interruption = &matches[0];
    assert_eq!(interruption.rule.name, "gated");
    assert!(interruption.matched.is_empty());
    assert_eq!(interruption.invalid.len(), 2);
    assert!(!interruption.cancelation_requested);
}

#[test]
fn request_cancelation_marks_the_synthetic_match() {
    let fixture =
        fake_context_with_output_lines("https://drone.example.com/acme/repo/1", "yarn", &[]);
    let ruleset = all_required_invalid_ruleset(RuleAction::RequestCancelation);

    let matches = ruleset.apply(&fixture.ctx());
    assert_eq!(matches.len(), 1);
    assert!(matches[0].cancelation_requested);
}

#[test]
fn partially_valid_required_conditions_proceed_to_rules() {
    let fixture =
        fake_context_with_output_lines("https://drone.example.com/acme/repo/1", "yarn", &[]);

    // One required condition matches (status), one misses (exit_code == 0),
    // so the gate does not trigger even under ABRUPT_INTERRUPTION.
    let ruleset = RuleSet {
        name: "half-gated".to_string(),
        default_action: Some(RuleAction::AbruptInterruption),
        required_conditions: ConditionSet::new(vec![
            Condition::on(ContextElement::Step, ["exit_code"]).value_exact(0),
            Condition::on(ContextElement::Step, ["status"]).matches_value("failure"),
        ])
        .unwrap(),
        rules: vec![Rule::new(
            "FailingStep",
            vec![Condition::on(ContextElement::Step, ["name"]).matches_value("yarn")],
        )
        .unwrap()],
        ..Default::default()
    };

    let matches = ruleset.apply(&fixture.ctx());
    // The required exit_code condition still gates each rule via the splice.
    assert!(matches.is_empty());
}

#[test]
fn skip_analysis_rule_stops_iteration_after_emitting() {
    let fixture = fake_context_with_output_lines(
        "https://drone.example.com/acme/repo/1",
        "merge",
        &["Automatic merge failed; fix conflicts"],
    );

    let make_rule = |name: &str| {
        Rule::new(
            name,
            vec![Condition::on(ContextElement::Step, ["output", "lines"])
                .contains("Automatic merge failed")],
        )
        .unwrap()
    };

    let ruleset = RuleSet {
        name: "short-circuit".to_string(),
        default_action: Some(RuleAction::NextRule),
        rules: vec![
            make_rule("First").with_action(RuleAction::SkipAnalysis),
            make_rule("Second"),
        ],
        ..Default::default()
    };

    let matches = ruleset.apply(&fixture.ctx());
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].rule.name, "First");
}

#[test]
fn matched_rule_description_lists_conditions() {
    let fixture = fake_context_with_output_lines(
        "https://drone.example.com/acme/repo/138785",
        "node_modules",
        &[r#"Couldn't find any versions for "react" that matches "2021""#],
    );
    let ruleset = pull_request_rules("acme/repo").unwrap();
    let matches = ruleset.apply(&fixture.ctx());

    let description = matches[0].describe();
    assert!(description.starts_with("Matched Rule **YarnDependencyNotResolved**:"));
    assert!(description.contains("Matched Condition: Expect step.exit_code `1` to not be `0`"));
    assert!(description.contains("to contain string `acme/repo`"));
}
