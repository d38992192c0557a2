//! Attribute resolution over the (build, stage, step) triple.
//!
//! The rule DSL references attributes by name; instead of reflective
//! traversal this is an explicit dispatch over the fixed vocabulary each
//! element exposes. Unknown paths fail at rule construction when statically
//! checkable, and resolve to an invalid-condition issue at apply time.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use drone_client::{AnalysisContext, Build, Stage, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextElement {
    Build,
    Stage,
    Step,
}

impl fmt::Display for ContextElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextElement::Build => write!(f, "build"),
            ContextElement::Stage => write!(f, "stage"),
            ContextElement::Step => write!(f, "step"),
        }
    }
}

const BUILD_ATTRS: &[&str] = &[
    "id",
    "number",
    "status",
    "event",
    "action",
    "link",
    "message",
    "before",
    "after",
    "ref",
    "source",
    "target",
    "source_repo",
    "author_login",
    "author_name",
    "author_email",
    "sender",
    "started",
    "finished",
    "created",
    "updated",
];

const STAGE_ATTRS: &[&str] = &[
    "id",
    "number",
    "name",
    "kind",
    "type",
    "status",
    "exit_code",
    "errignore",
    "machine",
    "os",
    "arch",
    "on_success",
    "on_failure",
    "started",
    "stopped",
    "created",
    "updated",
];

const STEP_ATTRS: &[&str] = &[
    "id", "number", "name", "status", "exit_code", "started", "stopped",
];

/// Whether a dot-path is part of the vocabulary for an element.
pub fn path_is_known(element: ContextElement, path: &[String]) -> bool {
    let Some(first) = path.first() else {
        return false;
    };
    match element {
        ContextElement::Build => path.len() == 1 && BUILD_ATTRS.contains(&first.as_str()),
        ContextElement::Stage => path.len() == 1 && STAGE_ATTRS.contains(&first.as_str()),
        ContextElement::Step => {
            if first == "output" {
                match path.len() {
                    1 => true,
                    2 => matches!(path[1].as_str(), "lines" | "message"),
                    _ => false,
                }
            } else {
                path.len() == 1 && STEP_ATTRS.contains(&first.as_str())
            }
        }
    }
}

/// Resolve a dot-path against the context. Returns the reason on failure.
pub fn resolve(
    ctx: &AnalysisContext<'_>,
    element: ContextElement,
    path: &[String],
) -> Result<Value, String> {
    if path.is_empty() {
        return Err(format!("empty target attribute for {element}"));
    }
    let value = match element {
        ContextElement::Build => build_attr(ctx.build, &path[0]),
        ContextElement::Stage => stage_attr(ctx.stage, &path[0]),
        ContextElement::Step => return step_path(ctx.step, path),
    };
    match value {
        Some(value) if path.len() == 1 => Ok(value),
        Some(_) => Err(format!(
            "attribute {}.{} has no nested attributes",
            element,
            path.join(".")
        )),
        None => Err(format!("unknown attribute {}.{}", element, path.join("."))),
    }
}

fn build_attr(build: &Build, name: &str) -> Option<Value> {
    Some(match name {
        "id" => Value::from(build.id),
        "number" => Value::from(build.number),
        "status" => Value::from(build.status.clone()),
        "event" => Value::from(build.event.clone()),
        "action" => Value::from(build.action.clone()),
        "link" => Value::from(build.link.clone()),
        "message" => Value::from(build.message.clone()),
        "before" => Value::from(build.before.clone()),
        "after" => Value::from(build.after.clone()),
        "ref" => Value::from(build.git_ref.clone()),
        "source" => Value::from(build.source.clone()),
        "target" => Value::from(build.target.clone()),
        "source_repo" => Value::from(build.source_repo.clone()),
        "author_login" => Value::from(build.author_login.clone()),
        "author_name" => Value::from(build.author_name.clone()),
        "author_email" => Value::from(build.author_email.clone()),
        "sender" => Value::from(build.sender.clone()),
        "started" => Value::from(build.started),
        "finished" => Value::from(build.finished),
        "created" => Value::from(build.created),
        "updated" => Value::from(build.updated),
        _ => return None,
    })
}

fn stage_attr(stage: &Stage, name: &str) -> Option<Value> {
    Some(match name {
        "id" => Value::from(stage.id),
        "number" => Value::from(stage.number),
        "name" => Value::from(stage.name.clone()),
        "kind" => Value::from(stage.kind.clone()),
        "type" => Value::from(stage.stage_type.clone()),
        "status" => Value::from(stage.status.clone()),
        "exit_code" => Value::from(stage.exit_code),
        "errignore" => Value::from(stage.errignore),
        "machine" => Value::from(stage.machine.clone()),
        "os" => Value::from(stage.os.clone()),
        "arch" => Value::from(stage.arch.clone()),
        "on_success" => Value::from(stage.on_success),
        "on_failure" => Value::from(stage.on_failure),
        "started" => Value::from(stage.started),
        "stopped" => Value::from(stage.stopped),
        "created" => Value::from(stage.created),
        "updated" => Value::from(stage.updated),
        _ => return None,
    })
}

fn step_path(step: &Step, path: &[String]) -> Result<Value, String> {
    let first = path[0].as_str();
    if first == "output" {
        return match path.len() {
            1 => serde_json::to_value(&step.output)
                .map_err(|e| format!("could not encode step.output: {e}")),
            2 => match path[1].as_str() {
                "lines" => Ok(Value::from(
                    step.output
                        .sorted_lines()
                        .into_iter()
                        .map(Value::from)
                        .collect::<Vec<Value>>(),
                )),
                "message" => Ok(step
                    .output
                    .message
                    .clone()
                    .map(Value::from)
                    .unwrap_or(Value::Null)),
                other => Err(format!("unknown attribute step.output.{other}")),
            },
            _ => Err(format!("unknown attribute step.{}", path.join("."))),
        };
    }
    if path.len() != 1 {
        return Err(format!("unknown attribute step.{}", path.join(".")));
    }
    let value = match first {
        "id" => Value::from(step.id),
        "number" => Value::from(step.number),
        "name" => Value::from(step.name.clone()),
        "status" => Value::from(step.status.clone()),
        "exit_code" => Value::from(step.exit_code),
        "started" => Value::from(step.started),
        "stopped" => Value::from(step.stopped),
        other => return Err(format!("unknown attribute step.{other}")),
    };
    Ok(value)
}
