//! Per-step log captures, located by `(stage_number, step_number)` under a
//! stored build.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use buildwarden_common::utc_from_epoch;
use drone_client::Step;

use crate::builds::StoredBuild;
use crate::error::{Result, StoreError};

/// A row from the drone_step table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredStep {
    pub id: i64,
    pub stored_build_id: i64,
    pub build_number: i64,
    pub stage_number: i64,
    pub number: i64,
    pub status: Option<String>,
    pub exit_code: Option<i64>,
    pub output_drone_api_data: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_notified_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct StepStore {
    pool: PgPool,
}

impl StepStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert the captured output of one step. The parent build must have
    /// been stored first.
    pub async fn record_output(
        &self,
        stored_build: &StoredBuild,
        stage_number: i64,
        step: &Step,
    ) -> Result<StoredStep> {
        let row = sqlx::query_as::<_, StoredStep>(
            r#"
            INSERT INTO drone_step
                (stored_build_id, build_number, stage_number, number, status,
                 exit_code, output_drone_api_data, started_at, stopped_at,
                 updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
            ON CONFLICT (stored_build_id, stage_number, number) DO UPDATE SET
                status = EXCLUDED.status,
                exit_code = EXCLUDED.exit_code,
                output_drone_api_data = EXCLUDED.output_drone_api_data,
                started_at = EXCLUDED.started_at,
                stopped_at = EXCLUDED.stopped_at,
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(stored_build.id)
        .bind(stored_build.number)
        .bind(stage_number)
        .bind(step.number)
        .bind(&step.status)
        .bind(step.exit_code)
        .bind(serde_json::to_string(&step.output)?)
        .bind(utc_from_epoch(step.started))
        .bind(utc_from_epoch(step.stopped))
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Find the parent build for a step capture, failing with `BuildNotFound`
    /// when it was never stored.
    pub async fn require_build(
        &self,
        owner: &str,
        repo: &str,
        build_number: i64,
    ) -> Result<StoredBuild> {
        let row = sqlx::query_as::<_, StoredBuild>(
            r#"
            SELECT * FROM drone_build
            WHERE owner = $1 AND repo = $2 AND number = $3
            "#,
        )
        .bind(owner)
        .bind(repo)
        .bind(build_number)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| StoreError::BuildNotFound {
            owner: owner.to_string(),
            repo: repo.to_string(),
            number: build_number,
        })
    }

    /// Stamp the moment a step's matches were delivered to the author.
    pub async fn mark_notified(&self, id: i64) -> Result<StoredStep> {
        let row = sqlx::query_as::<_, StoredStep>(
            "UPDATE drone_step SET last_notified_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }
}
