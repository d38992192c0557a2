//! Typed client for the Drone CI REST API.
//!
//! Every GET goes through the shared interaction cache (see [`cache`]) unless
//! the call site explicitly bypasses it, and every fetch announces itself on
//! the event bus.

pub mod cache;
pub mod error;
pub mod types;

pub use cache::{InteractionCache, MemoryCache, NoopCache, RecordedRequest, RecordedResponse};
pub use error::{DroneError, Result};
pub use types::{AnalysisContext, Build, Output, OutputLine, Stage, Step};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use url::Url;

use buildwarden_common::{Event, EventBus};

const USER_AGENT: &str = concat!("buildwarden v", env!("CARGO_PKG_VERSION"));

const DEFAULT_MAX_PAGES: u32 = 100;
const DEFAULT_MAX_BUILDS: usize = 100;

pub struct DroneClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
    timeout: Duration,
    max_pages: u32,
    max_builds: usize,
    cache: Arc<dyn InteractionCache>,
    bus: Arc<EventBus>,
}

impl DroneClient {
    pub fn new(
        base_url: &str,
        access_token: &str,
        cache: Arc<dyn InteractionCache>,
        bus: Arc<EventBus>,
    ) -> Result<Self> {
        // A trailing slash keeps Url::join from eating the last path segment.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: Url::parse(&normalized)?,
            token: access_token.to_string(),
            timeout: Duration::from_secs(30),
            max_pages: DEFAULT_MAX_PAGES,
            max_builds: DEFAULT_MAX_BUILDS,
            cache,
            bus,
        })
    }

    pub fn with_limits(mut self, max_pages: u32, max_builds: usize) -> Self {
        self.max_pages = max_pages;
        self.max_builds = max_builds;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// One upstream GET, cache-integrated. A 404 is `NotFound`, any other
    /// non-200 is `Upstream`; both bypass the cache write.
    async fn request(
        &self,
        path: &str,
        params: &[(&str, String)],
        skip_cache: bool,
    ) -> Result<RecordedResponse> {
        let mut url = self.base_url.join(path.trim_start_matches('/'))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        let url_text = url.to_string();

        if !skip_cache {
            match self.cache.lookup("GET", &url_text).await {
                Ok(Some(hit)) => return Ok(hit),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, url = %url_text, "Cache lookup failed, going to network")
                }
            }
        }

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;

        if status == 404 {
            return Err(DroneError::NotFound { url: url_text });
        }
        if status != 200 {
            return Err(DroneError::Upstream {
                status,
                url: url_text,
                message: body,
            });
        }

        let recorded = RecordedResponse {
            status,
            headers,
            body,
        };

        if !skip_cache {
            let request = RecordedRequest {
                method: "GET".to_string(),
                url: url_text.clone(),
                headers: BTreeMap::from([("user-agent".to_string(), USER_AGENT.to_string())]),
                params: params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
                body: None,
            };
            if let Err(e) = self.cache.store(&request, &recorded).await {
                tracing::warn!(error = %e, url = %url_text, "Failed to store interaction");
            }
        }

        Ok(recorded)
    }

    /// Fetch builds page by page until `max_builds` are collected or
    /// `max_pages` is reached. Page fetches always bypass the cache so the
    /// listing stays fresh. Result is sorted by recency descending (stable on
    /// ties) and truncated to `max_builds`.
    pub async fn get_builds(
        &self,
        owner: &str,
        repo: &str,
        limit: u32,
        page: u32,
    ) -> Result<Vec<Build>> {
        let mut collected: Vec<Build> = Vec::new();
        let mut page = page;
        loop {
            tracing::info!(owner, repo, page, "Retrieving builds page");
            let response = self
                .request(
                    &format!("api/repos/{owner}/{repo}/builds"),
                    &[("page", page.to_string()), ("limit", limit.to_string())],
                    true,
                )
                .await?;
            let builds: Vec<Build> = serde_json::from_str(&response.body)?;
            let fetched = builds.len();
            collected.extend(builds);

            self.bus.publish(&Event::GetBuilds {
                owner: owner.to_string(),
                repo: repo.to_string(),
                limit,
                page,
                builds: fetched,
                max_builds: self.max_builds,
                max_pages: self.max_pages,
            });

            if fetched == 0 || collected.len() >= self.max_builds || page >= self.max_pages {
                break;
            }
            page += 1;
        }

        collected.sort_by(|a, b| b.recency().cmp(&a.recency()));
        collected.truncate(self.max_builds);
        Ok(collected)
    }

    /// Lazy page-by-page traversal of the build listing. The pager is finite
    /// and not restartable; call again for a fresh traversal.
    pub fn iter_builds_by_page(
        &self,
        owner: &str,
        repo: &str,
        limit: u32,
        start_page: u32,
    ) -> BuildPager<'_> {
        BuildPager {
            client: self,
            owner: owner.to_string(),
            repo: repo.to_string(),
            limit,
            page: start_page,
            fetched: 0,
            done: false,
        }
    }

    pub async fn get_build_info(&self, owner: &str, repo: &str, build_number: i64) -> Result<Build> {
        let response = self
            .request(
                &format!("api/repos/{owner}/{repo}/builds/{build_number}"),
                &[],
                false,
            )
            .await?;
        let build: Build = serde_json::from_str(&response.body)?;
        self.bus.publish(&Event::GetBuildInfo {
            owner: owner.to_string(),
            repo: repo.to_string(),
            build_number,
        });
        Ok(build)
    }

    /// Fetch one step's log output. Upstream 404 means the step has no
    /// retrievable logs and maps to `None`. An object payload is the Output
    /// itself; a bare array is a list of output lines.
    pub async fn get_build_step_output(
        &self,
        owner: &str,
        repo: &str,
        build_number: i64,
        stage_number: i64,
        step_number: i64,
    ) -> Result<Option<Output>> {
        let path = format!(
            "api/repos/{owner}/{repo}/builds/{build_number}/logs/{stage_number}/{step_number}"
        );
        let response = match self.request(&path, &[], false).await {
            Ok(response) => response,
            Err(DroneError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        let payload: Value = serde_json::from_str(&response.body)?;
        let output = match payload {
            Value::Object(_) => serde_json::from_value(payload)?,
            Value::Array(_) => Output {
                lines: serde_json::from_value(payload)?,
                message: None,
            },
            other => {
                return Err(DroneError::UnexpectedShape {
                    detail: format!("expected object or array, got {other}"),
                })
            }
        };

        self.bus.publish(&Event::GetBuildStepOutput {
            owner: owner.to_string(),
            repo: repo.to_string(),
            build_number,
            stage_number,
            step_number,
            lines: output.lines.len(),
        });
        Ok(Some(output))
    }

    /// Fetch the latest build on a branch, logs included.
    pub async fn get_latest_build(&self, owner: &str, repo: &str, branch: &str) -> Result<Build> {
        let response = self
            .request(
                &format!("api/repos/{owner}/{repo}/builds/latest"),
                &[("branch", branch.to_string())],
                false,
            )
            .await?;
        let mut build: Build = serde_json::from_str(&response.body)?;
        self.bus.publish(&Event::GetBuildInfo {
            owner: owner.to_string(),
            repo: repo.to_string(),
            build_number: build.number,
        });
        self.inject_logs(owner, repo, &mut build).await?;
        Ok(build)
    }

    /// Populate the output of every non-skipped step. A step whose logs are
    /// missing or whose fetch fails upstream keeps an empty output; transport
    /// errors still propagate.
    pub async fn inject_logs(&self, owner: &str, repo: &str, build: &mut Build) -> Result<()> {
        let build_number = build.number;
        for stage_index in 0..build.stages.len() {
            let stage_number = build.stages[stage_index].number;
            for step_index in 0..build.stages[stage_index].steps.len() {
                let (step_number, skipped) = {
                    let step = &build.stages[stage_index].steps[step_index];
                    (step.number, step.is_skipped())
                };
                if skipped {
                    continue;
                }
                match self
                    .get_build_step_output(owner, repo, build_number, stage_number, step_number)
                    .await
                {
                    Ok(Some(output)) => {
                        build.stages[stage_index].steps[step_index].output = output;
                    }
                    Ok(None) => {
                        tracing::warn!(
                            owner,
                            repo,
                            build = build_number,
                            stage = stage_number,
                            step = step_number,
                            "No log output available for step"
                        );
                    }
                    Err(e @ DroneError::Upstream { .. }) => {
                        tracing::warn!(
                            error = %e,
                            owner,
                            repo,
                            build = build_number,
                            stage = stage_number,
                            step = step_number,
                            "Failed to retrieve step logs"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    pub async fn get_build_with_logs(
        &self,
        owner: &str,
        repo: &str,
        build_number: i64,
    ) -> Result<Build> {
        let mut build = self.get_build_info(owner, repo, build_number).await?;
        self.inject_logs(owner, repo, &mut build).await?;
        Ok(build)
    }
}

/// One page from [`DroneClient::iter_builds_by_page`].
#[derive(Debug, Clone)]
pub struct BuildPage {
    pub builds: Vec<Build>,
    pub page: u32,
    pub max_pages: u32,
}

pub struct BuildPager<'a> {
    client: &'a DroneClient,
    owner: String,
    repo: String,
    limit: u32,
    page: u32,
    fetched: usize,
    done: bool,
}

impl BuildPager<'_> {
    pub async fn next_page(&mut self) -> Result<Option<BuildPage>> {
        if self.done
            || self.page > self.client.max_pages
            || self.fetched >= self.client.max_builds
        {
            self.done = true;
            return Ok(None);
        }

        let response = self
            .client
            .request(
                &format!("api/repos/{}/{}/builds", self.owner, self.repo),
                &[
                    ("page", self.page.to_string()),
                    ("limit", self.limit.to_string()),
                ],
                true,
            )
            .await?;
        let builds: Vec<Build> = serde_json::from_str(&response.body)?;
        if builds.is_empty() {
            self.done = true;
            return Ok(None);
        }

        let page = self.page;
        self.page += 1;
        self.fetched += builds.len();

        self.client.bus.publish(&Event::IterBuildsByPage {
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            page,
            builds: builds.len(),
            max_pages: self.client.max_pages,
        });

        Ok(Some(BuildPage {
            builds,
            page,
            max_pages: self.client.max_pages,
        }))
    }
}
