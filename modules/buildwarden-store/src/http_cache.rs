//! Postgres-backed store of upstream HTTP interactions.
//!
//! Only GET requests with a 200 response are ever written; everything else
//! is a no-op upsert. Concurrent writers on the same `(method, url)` key
//! converge to one row, last writer wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Arc;

use buildwarden_common::{Event, EventBus};
use drone_client::{InteractionCache, RecordedRequest, RecordedResponse};

use crate::error::Result;

/// A row from the http_interaction table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HttpInteraction {
    pub id: i64,
    pub request_url: String,
    pub request_method: String,
    pub request_headers: Option<String>,
    pub request_params: Option<String>,
    pub request_body: Option<String>,
    pub response_status: Option<i32>,
    pub response_headers: Option<String>,
    pub response_body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HttpInteraction {
    /// Rebuild the captured response for replay.
    pub fn response(&self) -> RecordedResponse {
        RecordedResponse {
            status: self.response_status.unwrap_or_default() as u16,
            headers: decode_headers(self.response_headers.as_deref()),
            body: self.response_body.clone().unwrap_or_default(),
        }
    }

    pub fn request(&self) -> RecordedRequest {
        RecordedRequest {
            method: self.request_method.clone(),
            url: self.request_url.clone(),
            headers: decode_headers(self.request_headers.as_deref()),
            params: decode_headers(self.request_params.as_deref()),
            body: self.request_body.clone(),
        }
    }
}

fn decode_headers(raw: Option<&str>) -> BTreeMap<String, String> {
    raw.and_then(|r| serde_json::from_str(r).ok())
        .unwrap_or_default()
}

#[derive(Clone)]
pub struct HttpInteractionStore {
    pool: PgPool,
    bus: Arc<EventBus>,
}

impl HttpInteractionStore {
    pub fn new(pool: PgPool, bus: Arc<EventBus>) -> Self {
        Self { pool, bus }
    }

    /// Find the stored interaction for `(method, url)`. A hit is announced
    /// on the bus.
    pub async fn lookup(&self, method: &str, url: &str) -> Result<Option<HttpInteraction>> {
        let row = sqlx::query_as::<_, HttpInteraction>(
            r#"
            SELECT * FROM http_interaction
            WHERE request_url = $1 AND request_method = $2
            "#,
        )
        .bind(url)
        .bind(method)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(interaction) = &row {
            self.bus.publish(&Event::HttpCacheHit {
                method: method.to_string(),
                url: url.to_string(),
                status: interaction.response_status.unwrap_or_default() as u16,
            });
        }
        Ok(row)
    }

    /// Store a GET/200 interaction, replacing any previous capture for the
    /// same key. Anything else is a no-op returning `None`.
    pub async fn upsert(
        &self,
        request: &RecordedRequest,
        response: &RecordedResponse,
    ) -> Result<Option<HttpInteraction>> {
        if request.method != "GET" || response.status != 200 {
            return Ok(None);
        }

        let row = sqlx::query_as::<_, HttpInteraction>(
            r#"
            INSERT INTO http_interaction
                (request_url, request_method, request_headers, request_params,
                 request_body, response_status, response_headers, response_body)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (request_url, request_method) DO UPDATE SET
                request_headers = EXCLUDED.request_headers,
                request_params = EXCLUDED.request_params,
                request_body = EXCLUDED.request_body,
                response_status = EXCLUDED.response_status,
                response_headers = EXCLUDED.response_headers,
                response_body = EXCLUDED.response_body,
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(&request.url)
        .bind(&request.method)
        .bind(serde_json::to_string(&request.headers)?)
        .bind(serde_json::to_string(&request.params)?)
        .bind(&request.body)
        .bind(response.status as i32)
        .bind(serde_json::to_string(&response.headers)?)
        .bind(&response.body)
        .fetch_one(&self.pool)
        .await?;

        self.bus.publish(&Event::HttpCacheMiss {
            method: request.method.clone(),
            url: request.url.clone(),
            status: response.status,
        });
        Ok(Some(row))
    }

    /// Remove every stored interaction.
    pub async fn purge(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM http_interaction")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM http_interaction")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl InteractionCache for HttpInteractionStore {
    async fn lookup(&self, method: &str, url: &str) -> anyhow::Result<Option<RecordedResponse>> {
        let row = HttpInteractionStore::lookup(self, method, url).await?;
        Ok(row.map(|interaction| interaction.response()))
    }

    async fn store(
        &self,
        request: &RecordedRequest,
        response: &RecordedResponse,
    ) -> anyhow::Result<()> {
        self.upsert(request, response).await?;
        Ok(())
    }
}
