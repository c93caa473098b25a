//! Graceful degradation chain.
//!
//! When an agent fails, the orchestrator hands the failure to a
//! [`DegradationChain`]. Strategies run in ascending priority until one
//! produces a result. A strategy that errors is logged and skipped; the chain
//! itself never fails.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::agents::{ResearchContext, ResearchResult, ResultStatus, SearchResult};
use crate::error::DegradationError;
use crate::similarity::text_similarity;
use crate::storage::SharedResultStore;

/// Minimum topic similarity for a stored result to be reused.
const CACHED_TOPIC_SIMILARITY: f64 = 0.6;
/// Stored results inspected per lookup.
const CACHED_LOOKUP_LIMIT: usize = 20;

/// Everything a strategy knows about the failure it is recovering from.
#[derive(Debug, Clone, Copy)]
pub struct FailureContext<'a> {
    pub agent: &'a str,
    pub topic: &'a str,
    pub context: Option<&'a ResearchContext>,
    pub error: &'a str,
}

/// One fallback step.
#[async_trait]
pub trait DegradationStrategy: Send + Sync {
    /// Strategy name, recorded in fallback metadata.
    fn name(&self) -> &str;

    /// Lower runs first.
    fn priority(&self) -> u32;

    /// Try to produce a replacement result. `Ok(None)` passes to the next strategy.
    async fn execute(
        &self,
        failure: &FailureContext<'_>,
    ) -> Result<Option<ResearchResult>, DegradationError>;
}

fn label(mut result: SearchResult, strategy: &str) -> SearchResult {
    result
        .metadata
        .insert("fallback".to_string(), strategy.into());
    result
}

/// Reuses a recent stored result for a similar topic.
pub struct CachedFallback {
    store: Option<SharedResultStore>,
}

impl CachedFallback {
    pub fn new(store: Option<SharedResultStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DegradationStrategy for CachedFallback {
    fn name(&self) -> &str {
        "cached_fallback"
    }

    fn priority(&self) -> u32 {
        1
    }

    async fn execute(
        &self,
        failure: &FailureContext<'_>,
    ) -> Result<Option<ResearchResult>, DegradationError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };

        let recent = store
            .recent_results(failure.agent, CACHED_LOOKUP_LIMIT)
            .await
            .map_err(|e| DegradationError::Strategy {
                strategy: self.name().to_string(),
                message: e.to_string(),
            })?;

        let topic = failure.topic.to_lowercase();
        let hit = recent.into_iter().find(|stored| {
            text_similarity(&stored.result.topic.to_lowercase(), &topic) >= CACHED_TOPIC_SIMILARITY
        });

        Ok(hit.map(|stored| {
            let cached = stored.result;
            let results = cached
                .results
                .into_iter()
                .map(|r| label(r, self.name()))
                .collect();
            let mut result = ResearchResult::success(failure.agent, failure.topic, results)
                .with_status(ResultStatus::Partial)
                .with_subtopics(cached.subtopics);
            result.summary = cached.summary;
            result
        }))
    }
}

/// Emits a single low-relevance placeholder pointing at the topic.
#[derive(Debug, Default)]
pub struct SimplifiedSearch;

#[async_trait]
impl DegradationStrategy for SimplifiedSearch {
    fn name(&self) -> &str {
        "simplified_search"
    }

    fn priority(&self) -> u32 {
        2
    }

    async fn execute(
        &self,
        failure: &FailureContext<'_>,
    ) -> Result<Option<ResearchResult>, DegradationError> {
        let hit = SearchResult::new(
            format!("{} (simplified results)", failure.topic),
            format!("fallback://{}/{}", failure.agent, self.name()),
            format!(
                "Simplified results for \"{}\" while {} is unavailable.",
                failure.topic, failure.agent
            ),
            failure.agent,
            0.3,
        );

        Ok(Some(
            ResearchResult::success(failure.agent, failure.topic, vec![label(hit, self.name())])
                .with_status(ResultStatus::Partial)
                .with_summary(format!("Fallback result: {}", failure.error)),
        ))
    }
}

/// Last resort: a minimal result so the agent is still represented.
#[derive(Debug, Default)]
pub struct DefaultContent;

#[async_trait]
impl DegradationStrategy for DefaultContent {
    fn name(&self) -> &str {
        "default_content"
    }

    fn priority(&self) -> u32 {
        3
    }

    async fn execute(
        &self,
        failure: &FailureContext<'_>,
    ) -> Result<Option<ResearchResult>, DegradationError> {
        let hit = SearchResult::new(
            failure.topic,
            format!("fallback://{}/{}", failure.agent, self.name()),
            format!("No results are currently available for \"{}\".", failure.topic),
            failure.agent,
            0.1,
        );

        Ok(Some(
            ResearchResult::success(failure.agent, failure.topic, vec![label(hit, self.name())])
                .with_status(ResultStatus::Partial),
        ))
    }
}

/// Priority-ordered list of strategies.
#[derive(Clone, Default)]
pub struct DegradationChain {
    strategies: Vec<Arc<dyn DegradationStrategy>>,
}

impl DegradationChain {
    /// An empty chain; [`handle_agent_failure`](Self::handle_agent_failure) always yields `None`.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The builtin chain: cached fallback, simplified search, default content.
    pub fn new(store: Option<SharedResultStore>) -> Self {
        let mut chain = Self::empty();
        chain.add_strategy(Arc::new(CachedFallback::new(store)));
        chain.add_strategy(Arc::new(SimplifiedSearch));
        chain.add_strategy(Arc::new(DefaultContent));
        chain
    }

    /// Insert a strategy, keeping the list sorted by priority.
    ///
    /// Strategies with equal priority keep insertion order.
    pub fn add_strategy(&mut self, strategy: Arc<dyn DegradationStrategy>) {
        self.strategies.push(strategy);
        self.strategies.sort_by_key(|s| s.priority());
    }

    /// Strategy names in execution order.
    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Run strategies in order until one yields a result.
    pub async fn handle_agent_failure(
        &self,
        agent: &str,
        topic: &str,
        context: Option<&ResearchContext>,
        error: &str,
    ) -> Option<ResearchResult> {
        let failure = FailureContext {
            agent,
            topic,
            context,
            error,
        };

        for strategy in &self.strategies {
            match strategy.execute(&failure).await {
                Ok(Some(result)) => {
                    info!(agent = %agent, strategy = %strategy.name(), "Degradation strategy recovered agent failure");
                    return Some(result);
                }
                Ok(None) => {
                    debug!(agent = %agent, strategy = %strategy.name(), "Degradation strategy declined");
                }
                Err(e) => {
                    warn!(agent = %agent, strategy = %strategy.name(), error = %e, "Degradation strategy failed");
                }
            }
        }

        warn!(agent = %agent, "All degradation strategies exhausted");
        None
    }
}

impl std::fmt::Debug for DegradationChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DegradationChain")
            .field("strategies", &self.strategy_names())
            .finish()
    }
}
