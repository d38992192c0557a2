//! Per-job orchestration: fetch the build, gate it, pull its logs, persist,
//! analyze, notify.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use tracing::{debug, error, info, warn};

use buildwarden_rules::{MatchedRule, RuleSet};
use buildwarden_store::{BuildStore, StepStore, UserStore};
use drone_client::{AnalysisContext, Build, DroneClient, DroneError};
use search_client::SearchClient;

use crate::notify::Notifier;

static PULL_REQUEST_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"github\.com/(?P<owner>[^/]+)/(?P<repo>[^/]+)/pull/(?P<number>\d+)")
        .expect("pull request link regex")
});

/// Extract the pull-request number from a build link, if it has one.
pub fn parse_pull_request_number(link: &str) -> Option<i64> {
    PULL_REQUEST_LINK
        .captures(link)?
        .name("number")?
        .as_str()
        .parse()
        .ok()
}

pub struct BuildProcessor {
    client: Arc<DroneClient>,
    builds: BuildStore,
    steps: StepStore,
    users: UserStore,
    notifier: Arc<dyn Notifier>,
    search: Option<Arc<SearchClient>>,
    ruleset: RuleSet,
    owner: String,
    repo: String,
}

impl BuildProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<DroneClient>,
        builds: BuildStore,
        steps: StepStore,
        users: UserStore,
        notifier: Arc<dyn Notifier>,
        search: Option<Arc<SearchClient>>,
        ruleset: RuleSet,
        owner: &str,
        repo: &str,
    ) -> Self {
        Self {
            client,
            builds,
            steps,
            users,
            notifier,
            search,
            ruleset,
            owner: owner.to_string(),
            repo: repo.to_string(),
        }
    }

    /// Process one enqueued build. Drop paths return `Ok`; only persistence
    /// failures that make the job retryable surface as errors.
    pub async fn process(&self, build_id: i64, ignore_filters: bool) -> anyhow::Result<()> {
        let owner = self.owner.as_str();
        let repo = self.repo.as_str();

        // Fetch. The broker has already acked the job, so a failed fetch
        // drops it.
        let build = match self.client.get_build_info(owner, repo, build_id).await {
            Ok(build) => build,
            Err(e) => {
                error!(owner, repo, build_id, error = %e, "Failed to retrieve build, dropping job");
                return Ok(());
            }
        };

        // Deduplication gate.
        let stored = self.builds.find_by_link(owner, repo, &build.link).await?;
        if let Some(stored) = &stored {
            if stored.last_ruleset_processed_at.is_some() {
                warn!(
                    author = %build.author_login,
                    link = %build.link,
                    status = %stored.status,
                    "Build has already been processed, skipping"
                );
                return Ok(());
            }
            if !ignore_filters && stored.is_settled() {
                warn!(
                    author = %build.author_login,
                    link = %build.link,
                    status = %stored.status,
                    "Build is terminal and its output was already retrieved, skipping"
                );
                return Ok(());
            }
        }

        // Filter gate: only pull-request builds are in scope.
        let Some(pr_number) = parse_pull_request_number(&build.link) else {
            debug!(
                link = %build.link,
                author = %build.author_login,
                "Ignoring build that is not from a GitHub pull request"
            );
            return Ok(());
        };

        let user = self
            .users
            .find_by_github_username(&build.author_login)
            .await?;

        if !ignore_filters {
            if user.is_none() {
                warn!(
                    author = %build.author_login,
                    "Ignoring build from an author who has not opted in"
                );
                return Ok(());
            }
            if !matches!(build.status.as_str(), "running" | "failure") {
                warn!(
                    status = %build.status,
                    build = build.number,
                    pr = pr_number,
                    author = %build.author_login,
                    "Ignoring build in an uninteresting state"
                );
                return Ok(());
            }
        }

        // Inject logs. Upstream failures abort this build only.
        let build = match self.client.get_build_with_logs(owner, repo, build_id).await {
            Ok(build) => build,
            Err(e) => {
                error!(owner, repo, build_id, error = %e, "Failed to retrieve build logs, dropping job");
                if let Some(stored) = &stored {
                    let _ = self.builds.record_error(stored.id, error_kind(&e)).await;
                }
                return Ok(());
            }
        };

        // Persist the full snapshot and stamp the output retrieval.
        debug!(
            build = build.number,
            link = %build.link,
            author = %build.author_login,
            status = %build.status,
            "Storing build"
        );
        let stored = self
            .builds
            .get_or_create(owner, repo, build.number, &build)
            .await?;
        let stored = self
            .builds
            .update_from_api(stored.id, &build, Some(Utc::now()))
            .await?;

        // Capture per-step output rows for everything that failed.
        let mut step_rows: HashMap<(i64, i64), i64> = HashMap::new();
        for stage in build.failed_stages() {
            for step in stage.failed_steps() {
                match self.steps.record_output(&stored, stage.number, step).await {
                    Ok(row) => {
                        step_rows.insert((stage.number, step.number), row.id);
                    }
                    Err(e) => warn!(
                        error = %e,
                        stage = stage.number,
                        step = step.number,
                        "Failed to record step output"
                    ),
                }
            }
        }

        // Analyze every failed step of every failed stage.
        let mut descriptions: Vec<String> = Vec::new();
        let mut hits: Vec<(i64, i64, Vec<MatchedRule>)> = Vec::new();
        for stage in build.failed_stages() {
            for step in stage.failed_steps() {
                let ctx = AnalysisContext {
                    build: &build,
                    stage,
                    step,
                };
                debug!(ruleset = %self.ruleset.name, %ctx, "Applying ruleset");
                let matches = self.ruleset.apply(&ctx);
                if matches.is_empty() {
                    continue;
                }
                descriptions.extend(matches.iter().map(MatchedRule::describe));
                hits.push((stage.number, step.number, matches));
            }
        }

        let stored = self.builds.update_matches(stored.id, &descriptions).await?;

        if hits.is_empty() {
            warn!(
                build = build.number,
                link = %build.link,
                author = %build.author_login,
                "No ruleset matches for build"
            );
            return Ok(());
        }

        let Some(user) = user else {
            // Filters were ignored and the author never opted in; the
            // decision is persisted but nobody gets notified.
            return Ok(());
        };

        for (stage_number, step_number, matches) in &hits {
            let Some((stage, step)) = find_step(&build, *stage_number, *step_number) else {
                continue;
            };
            let ctx = AnalysisContext {
                build: &build,
                stage,
                step,
            };
            info!(
                build = build.number,
                stage = stage_number,
                step = step_number,
                matches = matches.len(),
                "Ruleset matches for step"
            );

            match self.notifier.notify(&user, &ctx, matches).await {
                Ok(()) => {
                    if let Some(row_id) = step_rows.get(&(*stage_number, *step_number)) {
                        if let Err(e) = self.steps.mark_notified(*row_id).await {
                            warn!(error = %e, "Failed to stamp step notification");
                        }
                    }
                }
                Err(e) => {
                    error!(
                        error = %e,
                        build = build.number,
                        author = %build.author_login,
                        "Failed to notify user, continuing"
                    );
                }
            }

            self.index_context(&stored.to_document(), &ctx).await;
        }

        Ok(())
    }

    /// Best-effort search indexing of the stored projection enriched with the
    /// matched stage and step.
    async fn index_context(&self, document: &serde_json::Value, ctx: &AnalysisContext<'_>) {
        let Some(search) = &self.search else {
            return;
        };
        let mut document = document.clone();
        if let Some(body) = document.as_object_mut() {
            body.insert(
                "stage".to_string(),
                serde_json::to_value(ctx.stage).unwrap_or_default(),
            );
            body.insert(
                "step".to_string(),
                serde_json::to_value(ctx.step).unwrap_or_default(),
            );
        }
        let index = format!("drone_builds_{}_{}", self.owner, self.repo);
        if let Err(e) = search
            .index(&index, &ctx.build.number.to_string(), &document)
            .await
        {
            warn!(error = %e, build = ctx.build.number, "Failed to index matched build");
        }
    }
}

fn find_step(build: &Build, stage_number: i64, step_number: i64) -> Option<(&drone_client::Stage, &drone_client::Step)> {
    let stage = build.stages.iter().find(|s| s.number == stage_number)?;
    let step = stage.steps.iter().find(|s| s.number == step_number)?;
    Some((stage, step))
}

fn error_kind(error: &DroneError) -> &'static str {
    match error {
        DroneError::NotFound { .. } => "not_found",
        DroneError::Upstream { .. } => "upstream_error",
        DroneError::UnexpectedShape { .. } => "unexpected_shape",
        DroneError::Url(_) => "url",
        DroneError::Http(_) => "http",
        DroneError::Decode(_) => "decode",
    }
}
