//! Domain models for the Drone REST payloads.
//!
//! Drone omits most fields when they are zero-valued, so everything here
//! deserializes with defaults. Parents own their children (build → stages →
//! steps → output); nothing stores a back-pointer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One line of a step log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub pos: i64,
    #[serde(default)]
    pub out: String,
}

/// The captured log of a step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    #[serde(default)]
    pub lines: Vec<OutputLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Output {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.message.is_none()
    }

    /// Line texts ordered by `pos` ascending. This is the canonical rendering.
    pub fn sorted_lines(&self) -> Vec<&str> {
        let mut lines: Vec<&OutputLine> = self.lines.iter().collect();
        lines.sort_by_key(|l| l.pos);
        lines.into_iter().map(|l| l.out.as_str()).collect()
    }

    pub fn to_text(&self) -> String {
        self.sorted_lines().join("\n")
    }
}

/// A single command within a stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub step_id: i64,
    #[serde(default)]
    pub number: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub exit_code: i64,
    #[serde(default)]
    pub started: i64,
    #[serde(default)]
    pub stopped: i64,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub output: Output,
}

impl Step {
    pub fn is_skipped(&self) -> bool {
        self.status == "skipped"
    }

    /// A step counts as failed when it exited non-zero or is still in a
    /// failure/running state.
    pub fn is_failed(&self) -> bool {
        self.exit_code != 0 || matches!(self.status.as_str(), "failure" | "running")
    }
}

/// An execution phase within a build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub repo_id: i64,
    #[serde(default)]
    pub build_id: i64,
    #[serde(default)]
    pub number: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, rename = "type")]
    pub stage_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub errignore: bool,
    #[serde(default)]
    pub exit_code: i64,
    #[serde(default)]
    pub machine: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub started: i64,
    #[serde(default)]
    pub stopped: i64,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub updated: i64,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub on_success: bool,
    #[serde(default)]
    pub on_failure: bool,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Stage {
    pub fn is_failed(&self) -> bool {
        self.exit_code != 0 || matches!(self.status.as_str(), "failure" | "running")
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|s| s.is_failed())
    }
}

/// One CI build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Build {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub repo_id: i64,
    #[serde(default)]
    pub number: i64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub before: String,
    #[serde(default)]
    pub after: String,
    #[serde(default, rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub source_repo: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub author_login: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub author_email: String,
    #[serde(default)]
    pub author_avatar: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub started: i64,
    #[serde(default)]
    pub finished: i64,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub updated: i64,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub stages: Vec<Stage>,
}

impl Build {
    /// Sort key for build lists: the most recent of `finished` and `updated`.
    pub fn recency(&self) -> i64 {
        self.finished.max(self.updated)
    }

    pub fn failed_stages(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter().filter(|s| s.is_failed())
    }

    pub fn iter_steps(&self) -> impl Iterator<Item = &Step> {
        self.stages.iter().flat_map(|stage| stage.steps.iter())
    }

    pub fn get_step(&self, stage_number: i64, step_number: i64) -> Option<&Step> {
        self.stages
            .iter()
            .find(|stage| stage.number == stage_number)?
            .steps
            .iter()
            .find(|step| step.number == step_number)
    }
}

/// The triple handed to the rule engine. Borrows an existing build tree for
/// the duration of one engine invocation; the stage must belong to the build
/// and the step to the stage.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisContext<'a> {
    pub build: &'a Build,
    pub stage: &'a Stage,
    pub step: &'a Step,
}

impl fmt::Display for AnalysisContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "build='{}' stage='{}' step='{}'",
            self.build.link, self.stage.number, self.step.number
        )
    }
}
