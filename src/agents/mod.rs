//! Research agent abstraction.
//!
//! An agent wraps one search strategy behind the uniform
//! [`ResearchAgent::execute`] capability. Agents are stateless per call and are
//! shared across sessions as [`SharedAgent`] handles.

mod http;

pub use http::{HttpSearchAgent, SearchHit, SearchResponse};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AgentResult;

/// Opaque caller-supplied context forwarded to every agent.
pub type ResearchContext = HashMap<String, Value>;

/// Broad family of search strategy an agent belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCategory {
    /// Scholarly papers and preprints.
    Academic,
    /// Computational knowledge engines.
    Computational,
    /// General web search.
    General,
    /// Video platforms.
    Video,
    /// Forums and community Q&A.
    Community,
    /// Anything else.
    Other,
}

impl AgentCategory {
    /// All categories with a known default weight, best first.
    pub const RANKED: [AgentCategory; 5] = [
        AgentCategory::Academic,
        AgentCategory::Computational,
        AgentCategory::General,
        AgentCategory::Video,
        AgentCategory::Community,
    ];

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentCategory::Academic => "academic",
            AgentCategory::Computational => "computational",
            AgentCategory::General => "general",
            AgentCategory::Video => "video",
            AgentCategory::Community => "community",
            AgentCategory::Other => "other",
        }
    }

    /// Infer the category from an agent or engine name.
    pub fn from_name(name: &str) -> Self {
        let name = name.to_lowercase();
        let contains_any = |needles: &[&str]| needles.iter().any(|n| name.contains(n));

        if contains_any(&["academic", "scholar", "arxiv", "pubmed", "paper"]) {
            AgentCategory::Academic
        } else if contains_any(&["computational", "wolfram", "math"]) {
            AgentCategory::Computational
        } else if contains_any(&["video", "youtube"]) {
            AgentCategory::Video
        } else if contains_any(&["community", "reddit", "forum", "stackoverflow"]) {
            AgentCategory::Community
        } else if contains_any(&["general", "web", "search", "google", "bing"]) {
            AgentCategory::General
        } else {
            AgentCategory::Other
        }
    }

    /// Default source weight used when ranking duplicate results.
    pub fn default_weight(&self) -> f64 {
        match self {
            AgentCategory::Academic => 1.0,
            AgentCategory::Computational => 0.9,
            AgentCategory::General => 0.8,
            AgentCategory::Video => 0.7,
            AgentCategory::Community => 0.6,
            AgentCategory::Other => 0.5,
        }
    }
}

impl std::fmt::Display for AgentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AgentCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "academic" => Ok(AgentCategory::Academic),
            "computational" => Ok(AgentCategory::Computational),
            "general" => Ok(AgentCategory::General),
            "video" => Ok(AgentCategory::Video),
            "community" => Ok(AgentCategory::Community),
            "other" => Ok(AgentCategory::Other),
            _ => Err(format!("Unknown agent category: {}", s)),
        }
    }
}

/// A single hit returned by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Engine or agent that produced the hit.
    pub source: String,
    /// Relevance in `0.0..=1.0`.
    pub relevance_score: f64,
    /// Free-form annotations (source agent, weight, merge provenance, ...).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl SearchResult {
    /// Create a result with empty metadata.
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        snippet: impl Into<String>,
        source: impl Into<String>,
        relevance_score: f64,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
            source: source.into(),
            relevance_score: relevance_score.clamp(0.0, 1.0),
            metadata: Map::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Read a string metadata entry.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Outcome class of an agent execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Partial,
    Error,
}

impl ResultStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Success => "success",
            ResultStatus::Partial => "partial",
            ResultStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for ResultStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(ResultStatus::Success),
            "partial" => Ok(ResultStatus::Partial),
            "error" => Ok(ResultStatus::Error),
            _ => Err(format!("Unknown result status: {}", s)),
        }
    }
}

/// Everything one agent produced for one topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchResult {
    pub agent: String,
    pub topic: String,
    pub results: Vec<SearchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtopics: Vec<String>,
    pub status: ResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ResearchResult {
    /// A successful result carrying the given hits.
    pub fn success(
        agent: impl Into<String>,
        topic: impl Into<String>,
        results: Vec<SearchResult>,
    ) -> Self {
        Self {
            agent: agent.into(),
            topic: topic.into(),
            results,
            summary: None,
            subtopics: Vec::new(),
            status: ResultStatus::Success,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// An error-valued result with no hits.
    pub fn error(
        agent: impl Into<String>,
        topic: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            agent: agent.into(),
            topic: topic.into(),
            results: Vec::new(),
            summary: None,
            subtopics: Vec::new(),
            status: ResultStatus::Error,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }

    /// Set the summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Set the subtopics.
    pub fn with_subtopics(mut self, subtopics: Vec<String>) -> Self {
        self.subtopics = subtopics;
        self
    }

    /// Override the status.
    pub fn with_status(mut self, status: ResultStatus) -> Self {
        self.status = status;
        self
    }

    /// Whether this result counts towards session success.
    pub fn is_success(&self) -> bool {
        self.status != ResultStatus::Error
    }
}

/// Uniform capability implemented by every search strategy.
///
/// Ordinary search failures should be reported as an error-status
/// [`ResearchResult`]; returning `Err` is reserved for unexpected failures.
/// The orchestrator handles both the same way.
#[async_trait]
pub trait ResearchAgent: Send + Sync {
    /// Unique agent name.
    fn name(&self) -> &str;

    /// Search family, used for priority ordering and weighting.
    fn category(&self) -> AgentCategory {
        AgentCategory::from_name(self.name())
    }

    /// Advertised capabilities, recorded in the health registry.
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// Run the search for `topic`.
    async fn execute(
        &self,
        topic: &str,
        context: Option<&ResearchContext>,
    ) -> AgentResult<ResearchResult>;
}

/// Shared handle to an agent.
pub type SharedAgent = Arc<dyn ResearchAgent>;

/// The set of agents an orchestrator fans out to.
///
/// Names are not required to be unique.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: Vec<SharedAgent>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent.
    pub fn register(&mut self, agent: SharedAgent) {
        self.agents.push(agent);
    }

    /// Builder-style registration.
    pub fn with_agent(mut self, agent: SharedAgent) -> Self {
        self.register(agent);
        self
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agents are registered.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Agent names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name().to_string()).collect()
    }

    /// Agents sorted by the position of their category in `priority`.
    ///
    /// The sort is stable; categories missing from `priority` go last.
    pub fn ordered(&self, priority: &[AgentCategory]) -> Vec<SharedAgent> {
        let rank = |agent: &SharedAgent| {
            priority
                .iter()
                .position(|c| *c == agent.category())
                .unwrap_or(priority.len())
        };
        let mut agents = self.agents.clone();
        agents.sort_by_key(rank);
        agents
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.names())
            .finish()
    }
}
