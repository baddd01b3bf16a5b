//! HTTP-backed [`MemoryClient`]: a thin transport to an external entity-graph
//! sink, following the same request/response shape as the LLM provider
//! (`llm::openai_compatible`) rather than reimplementing graph semantics here.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Episode, MemoryClient, MemoryHit};
use crate::error::MemoryError;

pub struct HttpMemoryClient {
    client: Client,
    base_url: String,
    user: Option<String>,
    password: Option<String>,
}

impl HttpMemoryClient {
    pub fn new(base_url: impl Into<String>, user: Option<&str>, password: Option<&str>) -> Result<Self, MemoryError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| MemoryError::RequestFailed(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            user: user.map(str::to_string),
            password: password.map(str::to_string),
        })
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let req = self.client.request(method, url);
        match (&self.user, &self.password) {
            (Some(user), pass) => req.basic_auth(user, pass.as_ref()),
            _ => req,
        }
    }
}

#[async_trait]
impl MemoryClient for HttpMemoryClient {
    async fn search(&self, group_id: &str, query: &str, limit: usize) -> Result<Vec<MemoryHit>, MemoryError> {
        let url = format!("{}/search", self.base_url.trim_end_matches('/'));
        let body = SearchRequest { group_id, query, limit };
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&body)
            .send()
            .await
            .map_err(|e| MemoryError::RequestFailed(e.to_string()))?;
        if response.status().is_client_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(MemoryError::Terminal(text));
        }
        if !response.status().is_success() {
            return Err(MemoryError::RequestFailed(response.status().to_string()));
        }
        let parsed: SearchResponse = response.json().await.map_err(|e| MemoryError::RequestFailed(e.to_string()))?;
        Ok(parsed.hits.into_iter().map(Into::into).collect())
    }

    async fn add_episode(&self, episode: &Episode) -> Result<String, MemoryError> {
        let url = format!("{}/episodes", self.base_url.trim_end_matches('/'));
        let response = self
            .request(reqwest::Method::POST, url)
            .json(episode)
            .send()
            .await
            .map_err(|e| MemoryError::RequestFailed(e.to_string()))?;
        if response.status().is_client_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(MemoryError::Terminal(text));
        }
        if !response.status().is_success() {
            return Err(MemoryError::RequestFailed(response.status().to_string()));
        }
        let parsed: AddEpisodeResponse = response.json().await.map_err(|e| MemoryError::RequestFailed(e.to_string()))?;
        Ok(parsed.episode_id)
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    group_id: &'a str,
    query: &'a str,
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    content: String,
    score: f64,
    timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<RawHit> for MemoryHit {
    fn from(hit: RawHit) -> Self {
        MemoryHit {
            content: hit.content,
            raw_score: hit.score,
            decayed_score: hit.score,
            timestamp: hit.timestamp,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AddEpisodeResponse {
    episode_id: String,
}

/// No-op sink used when the entity-graph memory feature is disabled
/// (`GTD_DISABLE_MEMORY`) or no `MEMORY_URI` is configured.
pub struct NullMemoryClient;

#[async_trait]
impl MemoryClient for NullMemoryClient {
    async fn search(&self, _group_id: &str, _query: &str, _limit: usize) -> Result<Vec<MemoryHit>, MemoryError> {
        Ok(Vec::new())
    }

    async fn add_episode(&self, _episode: &Episode) -> Result<String, MemoryError> {
        Ok("disabled".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_client_search_is_always_empty() {
        let client = NullMemoryClient;
        let hits = client.search("group", "query", 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn null_client_add_episode_succeeds_without_network() {
        let client = NullMemoryClient;
        let episode = Episode::new(
            super::super::EpisodeType::Interaction,
            crate::scheduler::Phase::Startup,
            serde_json::json!({}),
            "session-1",
            "user-1",
        );
        let id = client.add_episode(&episode).await.unwrap();
        assert_eq!(id, "disabled");
    }
}
