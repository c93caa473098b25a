use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{AgentCategory, ResearchAgent, ResearchContext, ResearchResult, SearchResult};
use crate::config::RequestConfig;
use crate::error::{AgentError, AgentResult};

/// Body sent to a search endpoint.
#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a ResearchContext>,
}

/// One hit as returned by a search endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Response body of a search endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<SearchHit>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub subtopics: Vec<String>,
}

/// Agent backed by a JSON search endpoint.
///
/// POSTs `{"query", "context"}` and expects a [`SearchResponse`]. HTTP and
/// decoding failures are reported as error-status results, not `Err`.
#[derive(Clone)]
pub struct HttpSearchAgent {
    name: String,
    endpoint: String,
    category: AgentCategory,
    client: Client,
}

impl HttpSearchAgent {
    /// Create a new search agent for `endpoint`.
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        request_config: &RequestConfig,
    ) -> AgentResult<Self> {
        let name = name.into();
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()?;

        Ok(Self {
            category: AgentCategory::from_name(&name),
            name,
            endpoint: endpoint.into(),
            client,
        })
    }

    /// Override the inferred category.
    pub fn with_category(mut self, category: AgentCategory) -> Self {
        self.category = category;
        self
    }

    #[cfg(test)]
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn search(
        &self,
        topic: &str,
        context: Option<&ResearchContext>,
    ) -> AgentResult<SearchResponse> {
        debug!(agent = %self.name, endpoint = %self.endpoint, "Calling search endpoint");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&SearchRequest {
                query: topic,
                context,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Search {
                agent: self.name.clone(),
                message: format!("{} - {}", status.as_u16(), body),
            });
        }

        response
            .json::<SearchResponse>()
            .await
            .map_err(|e| AgentError::InvalidResponse {
                agent: self.name.clone(),
                message: e.to_string(),
            })
    }

    fn to_result(&self, topic: &str, response: SearchResponse) -> ResearchResult {
        let results = response
            .results
            .into_iter()
            .map(|hit| {
                let mut result = SearchResult::new(
                    hit.title,
                    hit.url,
                    hit.snippet,
                    &self.name,
                    hit.score.unwrap_or(0.5),
                );
                if let Some(kind) = hit.kind {
                    result = result.with_metadata("type", kind);
                }
                result
            })
            .collect();

        let mut result =
            ResearchResult::success(&self.name, topic, results).with_subtopics(response.subtopics);
        result.summary = response.summary;
        result
    }
}

#[async_trait]
impl ResearchAgent for HttpSearchAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> AgentCategory {
        self.category
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["search".to_string(), self.category.to_string()]
    }

    async fn execute(
        &self,
        topic: &str,
        context: Option<&ResearchContext>,
    ) -> AgentResult<ResearchResult> {
        let start = Instant::now();

        match self.search(topic, context).await {
            Ok(response) => {
                let result = self.to_result(topic, response);
                info!(
                    agent = %self.name,
                    results = result.results.len(),
                    latency_ms = start.elapsed().as_millis(),
                    "Search completed"
                );
                Ok(result)
            }
            Err(e) => {
                warn!(
                    agent = %self.name,
                    error = %e,
                    latency_ms = start.elapsed().as_millis(),
                    "Search failed"
                );
                Ok(ResearchResult::error(&self.name, topic, e.to_string()))
            }
        }
    }
}
