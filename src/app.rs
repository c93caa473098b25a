//! Composition root.
//!
//! [`AppState`] owns the shared services and runs the full research
//! pipeline: orchestrate, deduplicate, attribute and synthesise.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::agents::{AgentRegistry, HttpSearchAgent, ResearchContext, ResearchResult};
use crate::attribution::{AttributionReport, SourceAttributionAnalyzer};
use crate::circuit_breaker::CircuitBreakerManager;
use crate::config::Config;
use crate::dedup::{DeduplicationEngine, DeduplicationResult};
use crate::degradation::DegradationChain;
use crate::error::{AppResult, LlmError};
use crate::health::HealthRegistry;
use crate::limiter::ConcurrencyLimiter;
use crate::llm::LlmClient;
use crate::orchestrator::{OrchestrationOptions, ResearchOrchestrator, ResearchSession};
use crate::storage::{SharedResultStore, SqliteResultStore};
use crate::synthesis::{SynthesisEngine, SynthesisResult, TextGenerator};

/// Everything produced for one research request.
#[derive(Debug, Clone, Serialize)]
pub struct ResearchReport {
    pub session: ResearchSession,
    pub deduplication: DeduplicationResult,
    /// Agent results with duplicates removed
    pub results: Vec<ResearchResult>,
    pub attribution: AttributionReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<SynthesisResult>,
}

/// Application state shared by every request.
pub struct AppState {
    pub config: Config,
    pub orchestrator: ResearchOrchestrator,
    pub dedup: DeduplicationEngine,
    pub attribution: SourceAttributionAnalyzer,
    pub synthesis: SynthesisEngine,
}

impl AppState {
    /// Build the state from configuration: SQLite store, one HTTP agent per
    /// configured endpoint and an LLM client when an API key is set.
    pub async fn new(config: Config) -> AppResult<Self> {
        let store = SqliteResultStore::new(&config.database).await?;
        info!(path = %config.database.path.display(), "Database initialized");

        let mut registry = AgentRegistry::new();
        for endpoint in &config.agents {
            let agent = HttpSearchAgent::new(&endpoint.name, &endpoint.url, &config.request)?;
            registry.register(Arc::new(agent));
        }
        if registry.is_empty() {
            warn!("No search agents configured, set SEARCH_AGENTS to name=url pairs");
        }

        let generator: Option<Arc<dyn TextGenerator>> =
            match LlmClient::new(&config.llm, config.request.clone()) {
                Ok(client) => {
                    info!(base_url = %client.base_url(), model = %client.model(), "LLM client initialized");
                    Some(Arc::new(client))
                }
                Err(LlmError::NotConfigured) => {
                    info!("LLM_API_KEY not set, synthesis will use templated summaries");
                    None
                }
                Err(e) => return Err(e.into()),
            };

        Ok(Self::from_parts(
            config,
            registry,
            Some(Arc::new(store)),
            generator,
        ))
    }

    /// Wire the services around an existing registry, store and generator.
    pub fn from_parts(
        config: Config,
        registry: AgentRegistry,
        store: Option<SharedResultStore>,
        generator: Option<Arc<dyn TextGenerator>>,
    ) -> Self {
        let health = Arc::new(HealthRegistry::new(config.health.clone()));
        let breakers = Arc::new(CircuitBreakerManager::new(config.circuit_breaker.clone()));
        let limiter = ConcurrencyLimiter::new(config.orchestrator.max_concurrent_agents);

        let mut orchestrator = ResearchOrchestrator::new(registry, config.orchestrator.clone())
            .with_health_registry(health)
            .with_circuit_breakers(breakers)
            .with_limiter(limiter)
            .with_degradation_chain(DegradationChain::new(store.clone()));
        if let Some(store) = store {
            orchestrator = orchestrator.with_result_store(store);
        }

        let dedup = DeduplicationEngine::new(config.dedup.clone());
        let attribution = SourceAttributionAnalyzer::new(dedup.clone());
        let synthesis = SynthesisEngine::new(generator, config.synthesis.clone());

        Self {
            config,
            orchestrator,
            dedup,
            attribution,
            synthesis,
        }
    }

    /// Run the whole pipeline for `topic`.
    pub async fn research(
        &self,
        topic: &str,
        context: Option<ResearchContext>,
        options: OrchestrationOptions,
        synthesize: bool,
    ) -> AppResult<ResearchReport> {
        let session = self.orchestrator.orchestrate(topic, context, options).await?;

        let deduplication = self.dedup.deduplicate_results(&session.results, topic);
        let results = self
            .dedup
            .apply_deduplication(&session.results, &deduplication);
        let attribution = self
            .attribution
            .analyze(&session.results, &deduplication, topic);

        let synthesis = if synthesize {
            Some(self.synthesis.synthesize(topic, &results).await)
        } else {
            None
        };

        info!(
            session_id = %session.id,
            status = %session.status,
            results = deduplication.deduplicated_count,
            duplicates_removed = deduplication.duplicates_removed,
            "Research complete"
        );

        Ok(ResearchReport {
            session,
            deduplication,
            results,
            attribution,
            synthesis,
        })
    }
}
