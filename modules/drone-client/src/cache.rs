//! Seam between the client and the shared HTTP interaction store.
//!
//! The client records every upstream exchange as a request/response pair and
//! asks the cache before going to the network. The Postgres-backed
//! implementation lives in the store crate; the client only sees this trait.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A request as captured for the interaction store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// A response as captured for the interaction store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// Shared cache of upstream interactions, keyed by `(method, url)`.
///
/// Implementations decide what is cacheable; the contract is that only
/// GET requests with a 200 response are ever stored.
#[async_trait]
pub trait InteractionCache: Send + Sync {
    async fn lookup(&self, method: &str, url: &str) -> anyhow::Result<Option<RecordedResponse>>;

    async fn store(
        &self,
        request: &RecordedRequest,
        response: &RecordedResponse,
    ) -> anyhow::Result<()>;
}

/// Cache that never hits and never stores. Used in tests and cache-less runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl InteractionCache for NoopCache {
    async fn lookup(&self, _method: &str, _url: &str) -> anyhow::Result<Option<RecordedResponse>> {
        Ok(None)
    }

    async fn store(
        &self,
        _request: &RecordedRequest,
        _response: &RecordedResponse,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// In-memory cache with the production storage rule (GET + 200 only).
/// Lives here so client tests and the processor tests can share it.
#[derive(Default)]
pub struct MemoryCache {
    entries: std::sync::Mutex<BTreeMap<(String, String), RecordedResponse>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl InteractionCache for MemoryCache {
    async fn lookup(&self, method: &str, url: &str) -> anyhow::Result<Option<RecordedResponse>> {
        let entries = self.entries.lock().expect("cache lock poisoned");
        Ok(entries.get(&(method.to_string(), url.to_string())).cloned())
    }

    async fn store(
        &self,
        request: &RecordedRequest,
        response: &RecordedResponse,
    ) -> anyhow::Result<()> {
        if request.method != "GET" || response.status != 200 {
            return Ok(());
        }
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.insert((request.method.clone(), request.url.clone()), response.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_cache_round_trip() {
        let cache = MemoryCache::new();
        let request = RecordedRequest {
            method: "GET".into(),
            url: "https://x/api/y".into(),
            ..Default::default()
        };
        let response = RecordedResponse {
            status: 200,
            body: "{}".into(),
            ..Default::default()
        };
        cache.store(&request, &response).await.unwrap();
        let hit = cache.lookup("GET", "https://x/api/y").await.unwrap().unwrap();
        assert_eq!(hit.body, "{}");
    }

    #[tokio::test]
    async fn memory_cache_refuses_non_get_and_non_200() {
        let cache = MemoryCache::new();
        let post = RecordedRequest {
            method: "POST".into(),
            url: "https://x/api/y".into(),
            ..Default::default()
        };
        let ok = RecordedResponse {
            status: 200,
            ..Default::default()
        };
        cache.store(&post, &ok).await.unwrap();

        let get = RecordedRequest {
            method: "GET".into(),
            url: "https://x/api/y".into(),
            ..Default::default()
        };
        let error = RecordedResponse {
            status: 500,
            ..Default::default()
        };
        cache.store(&get, &error).await.unwrap();

        assert!(cache.is_empty());
    }
}
