//! Web search tool

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use crate::agents::domain::Passage;
use crate::agents::error::{AgentError, AgentResult, RemoteError, RemoteResult};
use crate::agents::hosting::{with_retry, RetryPolicy};
use crate::config::ConnectionConfig;

/// Port for web search backends
#[async_trait]
pub trait WebSearchPort: Send + Sync {
    async fn search(&self, connection: &str, query: &str, top_k: usize) -> AgentResult<Vec<Passage>>;
}

/// Bing-style search over a named connection
pub struct BingWebSearch {
    client: reqwest::Client,
    connections: HashMap<String, ConnectionConfig>,
    retry: RetryPolicy,
}

impl BingWebSearch {
    pub fn new(client: reqwest::Client, connections: &[ConnectionConfig], retry: RetryPolicy) -> Self {
        Self {
            client,
            connections: connections.iter().map(|c| (c.name.clone(), c.clone())).collect(),
            retry,
        }
    }

    async fn fetch(&self, endpoint: &str, credential: Option<&(String, String)>, query: &str, top_k: usize) -> RemoteResult<Vec<Passage>> {
        let mut request = self
            .client
            .get(endpoint)
            .query(&[("q", query), ("count", &top_k.to_string())]);
        if let Some((header, key)) = credential {
            request = request.header(header.as_str(), key.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(status.as_u16(), error_text));
        }

        let body: BingResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Parse(format!("Failed to parse search response: {}", e)))?;

        Ok(body.into_passages(top_k))
    }
}

#[async_trait]
impl WebSearchPort for BingWebSearch {
    async fn search(&self, connection: &str, query: &str, top_k: usize) -> AgentResult<Vec<Passage>> {
        let conn = self
            .connections
            .get(connection)
            .ok_or_else(|| AgentError::NotFound(format!("connection '{}'", connection)))?;
        let endpoint = conn
            .endpoint
            .as_deref()
            .ok_or_else(|| AgentError::Configuration(format!("connection '{}' has no endpoint", connection)))?;
        let credential = conn.credential();

        let passages = with_retry(&self.retry, "web_search", || {
            self.fetch(endpoint, credential.as_ref(), query, top_k)
        })
        .await?;
        Ok(passages)
    }
}

#[derive(Debug, Deserialize)]
struct BingResponse {
    #[serde(rename = "webPages")]
    web_pages: Option<BingWebPages>,
}

#[derive(Debug, Deserialize)]
struct BingWebPages {
    #[serde(default)]
    value: Vec<BingWebPage>,
}

#[derive(Debug, Deserialize)]
struct BingWebPage {
    name: String,
    url: String,
    #[serde(default)]
    snippet: String,
}

impl BingResponse {
    fn into_passages(self, top_k: usize) -> Vec<Passage> {
        self.web_pages
            .map(|pages| pages.value)
            .unwrap_or_default()
            .into_iter()
            .take(top_k)
            .map(|page| Passage::new(format!("{}: {}", page.name, page.snippet)).with_source(page.url))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bing_payload() {
        let body: BingResponse = serde_json::from_str(
            r#"{
                "webPages": {
                    "value": [
                        {"name": "Zoning map", "url": "https://city.example/zoning", "snippet": "R-2 district"},
                        {"name": "Permits", "url": "https://city.example/permits", "snippet": "Apply online"}
                    ]
                }
            }"#,
        )
        .unwrap();

        let passages = body.into_passages(1);
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].content, "Zoning map: R-2 district");
        assert_eq!(passages[0].source.as_deref(), Some("https://city.example/zoning"));
    }

    #[test]
    fn test_missing_web_pages() {
        let body: BingResponse = serde_json::from_str("{}").unwrap();
        assert!(body.into_passages(5).is_empty());
    }
}
