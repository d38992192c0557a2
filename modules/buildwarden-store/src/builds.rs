//! Persistence of observed builds, plus the best-effort search-index
//! side-channel.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgPool;
use tracing::warn;

use buildwarden_common::utc_from_epoch;
use drone_client::Build;
use search_client::SearchClient;

use crate::error::Result;

/// A row from the drone_build table. Identity is (owner, repo, number).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredBuild {
    pub id: i64,
    pub number: i64,
    pub status: String,
    pub link: String,
    pub owner: String,
    pub repo: String,
    pub author_login: String,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub drone_api_data: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub output_retrieved_at: Option<DateTime<Utc>>,
    pub last_ruleset_processed_at: Option<DateTime<Utc>>,
    pub error_type: Option<String>,
    pub matches_json: Option<String>,
}

impl StoredBuild {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }

    /// Terminal with output already captured: nothing left to do unless the
    /// caller ignores filters.
    pub fn is_settled(&self) -> bool {
        !self.is_running() && self.output_retrieved_at.is_some()
    }

    /// Decode the captured Drone payload.
    pub fn build(&self) -> Option<Build> {
        self.drone_api_data
            .as_deref()
            .and_then(|data| serde_json::from_str(data).ok())
    }

    pub fn matches(&self) -> Vec<String> {
        self.matches_json
            .as_deref()
            .and_then(|data| serde_json::from_str(data).ok())
            .unwrap_or_default()
    }

    /// Projection for the search index: the row plus decoded payloads.
    pub fn to_document(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "number": self.number,
            "status": self.status,
            "link": self.link,
            "owner": self.owner,
            "repo": self.repo,
            "author_login": self.author_login,
            "author_name": self.author_name,
            "author_email": self.author_email,
            "created_at": self.created_at,
            "started_at": self.started_at,
            "finished_at": self.finished_at,
            "updated_at": self.updated_at,
            "output_retrieved_at": self.output_retrieved_at,
            "last_ruleset_processed_at": self.last_ruleset_processed_at,
            "error_type": self.error_type,
            "build": self.build(),
            "matches": self.matches(),
        })
    }
}

#[derive(Clone)]
pub struct BuildStore {
    pool: PgPool,
    search: Option<Arc<SearchClient>>,
}

impl BuildStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, search: None }
    }

    pub fn with_search(mut self, search: Arc<SearchClient>) -> Self {
        self.search = Some(search);
        self
    }

    pub async fn find_by_link(
        &self,
        owner: &str,
        repo: &str,
        link: &str,
    ) -> Result<Option<StoredBuild>> {
        let row = sqlx::query_as::<_, StoredBuild>(
            r#"
            SELECT * FROM drone_build
            WHERE owner = $1 AND repo = $2 AND link = $3
            "#,
        )
        .bind(owner)
        .bind(repo)
        .bind(link)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn find_by_number(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<Option<StoredBuild>> {
        let row = sqlx::query_as::<_, StoredBuild>(
            r#"
            SELECT * FROM drone_build
            WHERE owner = $1 AND repo = $2 AND number = $3
            "#,
        )
        .bind(owner)
        .bind(repo)
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Upsert by natural key, refreshing the row from the latest API payload.
    pub async fn get_or_create(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        build: &Build,
    ) -> Result<StoredBuild> {
        let row = sqlx::query_as::<_, StoredBuild>(
            r#"
            INSERT INTO drone_build
                (number, status, link, owner, repo, author_login, author_name,
                 author_email, drone_api_data, created_at, started_at,
                 finished_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (owner, repo, number) DO UPDATE SET
                status = EXCLUDED.status,
                link = EXCLUDED.link,
                author_login = EXCLUDED.author_login,
                author_name = EXCLUDED.author_name,
                author_email = EXCLUDED.author_email,
                drone_api_data = EXCLUDED.drone_api_data,
                created_at = EXCLUDED.created_at,
                started_at = EXCLUDED.started_at,
                finished_at = EXCLUDED.finished_at,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(number)
        .bind(&build.status)
        .bind(&build.link)
        .bind(owner)
        .bind(repo)
        .bind(&build.author_login)
        .bind(&build.author_name)
        .bind(&build.author_email)
        .bind(serde_json::to_string(build)?)
        .bind(utc_from_epoch(build.created))
        .bind(utc_from_epoch(build.started))
        .bind(utc_from_epoch(build.finished))
        .bind(utc_from_epoch(build.updated))
        .fetch_one(&self.pool)
        .await?;

        self.index_best_effort(&row).await;
        Ok(row)
    }

    /// Refresh a stored row from the latest API snapshot, optionally stamping
    /// when the output was retrieved.
    pub async fn update_from_api(
        &self,
        id: i64,
        build: &Build,
        output_retrieved_at: Option<DateTime<Utc>>,
    ) -> Result<StoredBuild> {
        let row = sqlx::query_as::<_, StoredBuild>(
            r#"
            UPDATE drone_build SET
                status = $2,
                link = $3,
                author_login = $4,
                author_name = $5,
                author_email = $6,
                drone_api_data = $7,
                created_at = $8,
                started_at = $9,
                finished_at = $10,
                updated_at = $11,
                output_retrieved_at = COALESCE($12, output_retrieved_at)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&build.status)
        .bind(&build.link)
        .bind(&build.author_login)
        .bind(&build.author_name)
        .bind(&build.author_email)
        .bind(serde_json::to_string(build)?)
        .bind(utc_from_epoch(build.created))
        .bind(utc_from_epoch(build.started))
        .bind(utc_from_epoch(build.finished))
        .bind(utc_from_epoch(build.updated))
        .bind(output_retrieved_at)
        .fetch_one(&self.pool)
        .await?;

        self.index_best_effort(&row).await;
        Ok(row)
    }

    /// Record the rule-set outcome. Descriptions are stored as a JSON array
    /// and the processing watermark moves to now.
    pub async fn update_matches(&self, id: i64, descriptions: &[String]) -> Result<StoredBuild> {
        let row = sqlx::query_as::<_, StoredBuild>(
            r#"
            UPDATE drone_build SET
                matches_json = $2,
                last_ruleset_processed_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(serde_json::to_string(descriptions)?)
        .fetch_one(&self.pool)
        .await?;

        self.index_best_effort(&row).await;
        Ok(row)
    }

    pub async fn record_error(&self, id: i64, error_type: &str) -> Result<StoredBuild> {
        let row = sqlx::query_as::<_, StoredBuild>(
            "UPDATE drone_build SET error_type = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(error_type)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Publish the row to the search index. Indexing failures are logged and
    /// swallowed, never surfaced to the caller.
    async fn index_best_effort(&self, stored: &StoredBuild) {
        let Some(search) = &self.search else {
            return;
        };
        let index = format!("drone_builds_{}_{}", stored.owner, stored.repo);
        if let Err(e) = search
            .index(&index, &stored.number.to_string(), &stored.to_document())
            .await
        {
            warn!(error = %e, build = stored.number, "Failed to index stored build");
        }
    }
}
