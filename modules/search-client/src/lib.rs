//! Minimal document-index client for an Elasticsearch-compatible server.
//!
//! The pipeline only ever writes documents; indexing is best-effort at the
//! call sites, so the surface here is deliberately small.

pub mod error;

pub use error::{Result, SearchError};

pub struct SearchClient {
    http: reqwest::Client,
    base_url: String,
}

impl SearchClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("http://{host}:{port}"),
        }
    }

    /// Index (upsert) one document under `index/_doc/id`.
    pub async fn index(&self, index: &str, id: &str, document: &serde_json::Value) -> Result<()> {
        let url = format!("{}/{index}/_doc/{id}", self.base_url);
        let resp = self.http.put(&url).json(document).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SearchError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        tracing::debug!(index, id, "Indexed document");
        Ok(())
    }

    /// Liveness probe against the cluster root.
    pub async fn ping(&self) -> Result<bool> {
        let resp = self.http.get(&self.base_url).send().await?;
        Ok(resp.status().is_success())
    }
}
