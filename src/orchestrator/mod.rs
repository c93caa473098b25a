//! Research orchestrator.
//!
//! Fans one topic out to every registered agent and collects the outcome as
//! a [`ResearchSession`].
//!
//! ```text
//! orchestrate ─┬─ limiter.acquire ─ breaker gate ─ agent.execute (80% timeout) ─┐
//!              ├─ ...                                                            ├─ classify
//!              └─ ...                         (global timeout over the batch) ───┘
//! ```
//!
//! Agent failures, timeouts and open circuits are absorbed into the session
//! as data. Only a catastrophic failure of the batch itself (the limiter
//! closing, a task aborting) is returned as an error.
//!
//! The health registry, circuit breakers and limiter are shared by every
//! session of one orchestrator, so concurrent sessions compete for the same
//! execution slots and see the same breaker state.

mod events;
mod session;

pub use events::{
    BroadcastProgressSink, NoopProgressSink, ProgressEvent, ProgressEventType, ProgressSink,
    SinkError, TracingProgressSink,
};
#[cfg(test)]
pub use events::MockProgressSink;
pub use session::{
    classify_session, AgentRunStatus, AgentStatus, ResearchSession, SessionStatus,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::agents::{AgentCategory, AgentRegistry, ResearchContext, ResearchResult, ResultStatus, SharedAgent};
use crate::circuit_breaker::{CircuitBreakerManager, CircuitError};
use crate::config::OrchestratorConfig;
use crate::degradation::DegradationChain;
use crate::error::{AgentError, AgentResult, OrchestrationError, OrchestrationResult};
use crate::health::HealthRegistry;
use crate::limiter::ConcurrencyLimiter;
use crate::storage::{SessionRecord, SharedResultStore};

/// Share of the global timeout granted to each agent.
const AGENT_TIMEOUT_RATIO: f64 = 0.8;

type SharedSession = Arc<RwLock<ResearchSession>>;

/// Per-session options.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationOptions {
    /// Global timeout for the whole batch (milliseconds)
    pub timeout_ms: u64,
    /// Extra per-session cap, applied on top of the shared limiter
    pub max_concurrent_agents: Option<usize>,
    pub failure_tolerance: f64,
    pub priority: Vec<AgentCategory>,
    pub circuit_breaker_enabled: bool,
    pub graceful_degradation_enabled: bool,
}

impl Default for OrchestrationOptions {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

impl From<&OrchestratorConfig> for OrchestrationOptions {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            timeout_ms: config.timeout_ms,
            max_concurrent_agents: None,
            failure_tolerance: config.failure_tolerance,
            priority: config.priority.clone(),
            circuit_breaker_enabled: config.circuit_breaker_enabled,
            graceful_degradation_enabled: config.graceful_degradation_enabled,
        }
    }
}

impl OrchestrationOptions {
    /// Session-wide timeout; each agent gets a fixed share of it.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Cap on agents running at once within this session.
    pub fn with_max_concurrent_agents(mut self, max: usize) -> Self {
        self.max_concurrent_agents = Some(max);
        self
    }

    /// Fraction of agents allowed to fail before the session is `Failed`, clamped to `0.0..=1.0`.
    pub fn with_failure_tolerance(mut self, tolerance: f64) -> Self {
        self.failure_tolerance = tolerance.clamp(0.0, 1.0);
        self
    }

    /// Category order used to schedule agents.
    pub fn with_priority(mut self, priority: Vec<AgentCategory>) -> Self {
        self.priority = priority;
        self
    }

    /// Gate agent calls through their circuit breakers.
    pub fn with_circuit_breaker(mut self, enabled: bool) -> Self {
        self.circuit_breaker_enabled = enabled;
        self
    }

    /// Try the degradation chain when an agent fails.
    pub fn with_graceful_degradation(mut self, enabled: bool) -> Self {
        self.graceful_degradation_enabled = enabled;
        self
    }

    /// Timeout applied to each individual agent call.
    pub fn agent_timeout(&self) -> Duration {
        let ms = (self.timeout_ms as f64 * AGENT_TIMEOUT_RATIO) as u64;
        Duration::from_millis(ms.max(1))
    }
}

/// Aggregate view over the active-session table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub active_sessions: usize,
    pub running: usize,
    pub completed: usize,
    pub partial: usize,
    pub failed: usize,
    pub total_results: usize,
    pub average_duration_ms: f64,
}

/// Central coordinator for research sessions.
pub struct ResearchOrchestrator {
    registry: AgentRegistry,
    health: Arc<HealthRegistry>,
    breakers: Arc<CircuitBreakerManager>,
    degradation: DegradationChain,
    limiter: ConcurrencyLimiter,
    sink: Arc<dyn ProgressSink>,
    store: Option<SharedResultStore>,
    sessions: Arc<RwLock<HashMap<String, SharedSession>>>,
    config: OrchestratorConfig,
}

impl ResearchOrchestrator {
    /// Orchestrator with fresh shared services and the builtin degradation chain.
    pub fn new(registry: AgentRegistry, config: OrchestratorConfig) -> Self {
        Self {
            registry,
            health: Arc::new(HealthRegistry::default()),
            breakers: Arc::new(CircuitBreakerManager::default()),
            degradation: DegradationChain::new(None),
            limiter: ConcurrencyLimiter::new(config.max_concurrent_agents),
            sink: Arc::new(TracingProgressSink),
            store: None,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Share a health registry with other components.
    pub fn with_health_registry(mut self, health: Arc<HealthRegistry>) -> Self {
        self.health = health;
        self
    }

    /// Share circuit breakers with other components.
    pub fn with_circuit_breakers(mut self, breakers: Arc<CircuitBreakerManager>) -> Self {
        self.breakers = breakers;
        self
    }

    /// Replace the builtin degradation chain.
    pub fn with_degradation_chain(mut self, chain: DegradationChain) -> Self {
        self.degradation = chain;
        self
    }

    /// Deliver progress events to `sink` instead of the log.
    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Persist sessions and successful results to `store`.
    pub fn with_result_store(mut self, store: SharedResultStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a process-wide limiter shared with other orchestrators.
    pub fn with_limiter(mut self, limiter: ConcurrencyLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    pub fn circuit_breakers(&self) -> &Arc<CircuitBreakerManager> {
        &self.breakers
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Options derived from this orchestrator's configuration.
    pub fn default_options(&self) -> OrchestrationOptions {
        OrchestrationOptions::from(&self.config)
    }

    /// Run one research session to a terminal status.
    pub async fn orchestrate(
        &self,
        topic: &str,
        context: Option<ResearchContext>,
        options: OrchestrationOptions,
    ) -> OrchestrationResult<ResearchSession> {
        let agents = self.registry.ordered(&options.priority);
        let names: Vec<String> = agents.iter().map(|a| a.name().to_string()).collect();

        let mut initial = ResearchSession::new(topic, context.clone(), names.clone());
        initial.status = SessionStatus::Running;
        let session_id = initial.id.clone();

        info!(
            session_id = %session_id,
            topic = %topic,
            agents = agents.len(),
            timeout_ms = options.timeout_ms,
            "Research session started"
        );

        if let Some(store) = &self.store {
            if let Err(e) = store.create_session(&SessionRecord::from_session(&initial)).await {
                warn!(session_id = %session_id, error = %e, "Failed to persist session");
            }
        }

        let session: SharedSession = Arc::new(RwLock::new(initial));
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), Arc::clone(&session));

        self.publish(ProgressEvent::initiated(&session_id, topic, &names))
            .await;

        for agent in &agents {
            self.health.register(agent.name(), agent.capabilities()).await;
        }

        let runner = AgentRunner {
            session_id: session_id.clone(),
            session: Arc::clone(&session),
            topic: Arc::from(topic),
            context: context.map(Arc::new),
            agent_timeout: options.agent_timeout(),
            circuit_breaker_enabled: options.circuit_breaker_enabled,
            graceful_degradation_enabled: options.graceful_degradation_enabled,
            session_limiter: options.max_concurrent_agents.map(ConcurrencyLimiter::new),
            limiter: self.limiter.clone(),
            health: Arc::clone(&self.health),
            breakers: Arc::clone(&self.breakers),
            degradation: self.degradation.clone(),
            sink: Arc::clone(&self.sink),
            store: self.store.clone(),
        };

        let outcome = self
            .run_batch(&runner, agents, Duration::from_millis(options.timeout_ms))
            .await;

        let result = match outcome {
            Ok(()) => Ok(self.finish(&session, options.failure_tolerance).await),
            Err(e) => {
                self.fail(&session, &e).await;
                Err(e)
            }
        };

        self.schedule_removal(session_id);
        result
    }

    /// Spawn every agent and wait for them or the global timeout, whichever is first.
    async fn run_batch(
        &self,
        runner: &AgentRunner,
        agents: Vec<SharedAgent>,
        global_timeout: Duration,
    ) -> OrchestrationResult<()> {
        let mut tasks = JoinSet::new();
        for (index, agent) in agents.into_iter().enumerate() {
            let runner = runner.clone();
            tasks.spawn(async move { runner.run(index, agent).await });
        }

        let mut failure: Option<OrchestrationError> = None;
        let join_all = async {
            while let Some(joined) = tasks.join_next().await {
                let outcome = joined.map_err(|e| OrchestrationError::Aborted {
                    message: format!("agent task failed: {}", e),
                });
                if let Err(e) = outcome.and_then(|r| r) {
                    failure = Some(e);
                    break;
                }
            }
        };
        let timed_out = tokio::time::timeout(global_timeout, join_all).await.is_err();

        // Abandon whatever is still in flight and wait for the aborts to land
        // so no task writes to the session after this point.
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        if let Some(e) = failure {
            return Err(e);
        }

        if timed_out {
            let mut session = runner.session.write().await;
            let mut expired = Vec::new();
            for agent in session.agents.iter_mut().filter(|a| !a.status.is_terminal()) {
                agent.finish(
                    AgentRunStatus::Timeout,
                    0,
                    Some(format!("global timeout after {}ms", global_timeout.as_millis())),
                );
                expired.push(agent.name.clone());
            }
            for name in &expired {
                session
                    .errors
                    .push(format!("{}: timed out before the session deadline", name));
            }
            warn!(
                session_id = %runner.session_id,
                timed_out = ?expired,
                "Global research timeout reached"
            );
        }

        Ok(())
    }

    async fn finish(&self, session: &SharedSession, failure_tolerance: f64) -> ResearchSession {
        let snapshot = {
            let mut session = session.write().await;
            let success_rate = session.success_rate();
            session.status = classify_session(success_rate, failure_tolerance);
            session.end_time = Some(Utc::now());
            session.clone()
        };

        let success_rate = snapshot.success_rate();
        let confidence = success_rate * 0.4 + snapshot.average_relevance() * 0.6;
        let duration_ms = snapshot.duration_ms().unwrap_or(0);

        info!(
            session_id = %snapshot.id,
            status = %snapshot.status,
            success_rate,
            results = snapshot.total_results(),
            duration_ms,
            "Research session finished"
        );

        self.publish(ProgressEvent::completed(
            &snapshot.id,
            snapshot.status.as_str(),
            duration_ms,
            confidence,
            success_rate,
        ))
        .await;
        self.persist(&snapshot).await;

        snapshot
    }

    async fn fail(&self, session: &SharedSession, error: &OrchestrationError) {
        let snapshot = {
            let mut session = session.write().await;
            session.status = SessionStatus::Failed;
            session.end_time = Some(Utc::now());
            session.errors.push(error.to_string());
            session.clone()
        };

        error!(session_id = %snapshot.id, error = %error, "Research session failed");
        self.publish(ProgressEvent::failed(&snapshot.id, &error.to_string()))
            .await;
        self.persist(&snapshot).await;
    }

    async fn persist(&self, session: &ResearchSession) {
        if let Some(store) = &self.store {
            if let Err(e) = store
                .update_session(&SessionRecord::from_session(session))
                .await
            {
                warn!(session_id = %session.id, error = %e, "Failed to persist session outcome");
            }
        }
    }

    async fn publish(&self, event: ProgressEvent) {
        publish(self.sink.as_ref(), event).await;
    }

    fn schedule_removal(&self, session_id: String) {
        let sessions = Arc::clone(&self.sessions);
        let retention = Duration::from_secs(self.config.session_retention_secs);
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            if sessions.write().await.remove(&session_id).is_some() {
                debug!(session_id = %session_id, "Session evicted from active table");
            }
        });
    }

    /// Snapshot of a session still in the active table.
    pub async fn get_active_session(&self, id: &str) -> Option<ResearchSession> {
        let session = self.sessions.read().await.get(id).cloned()?;
        let snapshot = session.read().await.clone();
        Some(snapshot)
    }

    /// Snapshots of every session in the active table, oldest first.
    pub async fn get_all_active_sessions(&self) -> Vec<ResearchSession> {
        let handles: Vec<SharedSession> = self.sessions.read().await.values().cloned().collect();
        let mut sessions = Vec::with_capacity(handles.len());
        for handle in handles {
            sessions.push(handle.read().await.clone());
        }
        sessions.sort_by_key(|s| s.start_time);
        sessions
    }

    /// Counts and averages over the active table.
    pub async fn get_session_stats(&self) -> SessionStats {
        let sessions = self.get_all_active_sessions().await;
        let mut stats = SessionStats {
            active_sessions: sessions.len(),
            ..SessionStats::default()
        };

        let mut durations = Vec::new();
        for session in &sessions {
            match session.status {
                SessionStatus::Pending | SessionStatus::Running => stats.running += 1,
                SessionStatus::Completed => stats.completed += 1,
                SessionStatus::Partial => stats.partial += 1,
                SessionStatus::Failed => stats.failed += 1,
            }
            stats.total_results += session.total_results();
            if let Some(ms) = session.duration_ms() {
                durations.push(ms as f64);
            }
        }
        if !durations.is_empty() {
            stats.average_duration_ms = durations.iter().sum::<f64>() / durations.len() as f64;
        }
        stats
    }
}

async fn publish(sink: &dyn ProgressSink, event: ProgressEvent) {
    let event_type = event.event_type;
    let session_id = event.session_id.clone();
    if let Err(e) = sink.publish(event).await {
        warn!(session_id = %session_id, event = %event_type, error = %e, "Failed to publish progress event");
    }
}

/// Everything one agent task needs, cloned into each spawned task.
#[derive(Clone)]
struct AgentRunner {
    session_id: String,
    session: SharedSession,
    topic: Arc<str>,
    context: Option<Arc<ResearchContext>>,
    agent_timeout: Duration,
    circuit_breaker_enabled: bool,
    graceful_degradation_enabled: bool,
    session_limiter: Option<ConcurrencyLimiter>,
    limiter: ConcurrencyLimiter,
    health: Arc<HealthRegistry>,
    breakers: Arc<CircuitBreakerManager>,
    degradation: DegradationChain,
    sink: Arc<dyn ProgressSink>,
    store: Option<SharedResultStore>,
}

impl AgentRunner {
    async fn run(self, index: usize, agent: SharedAgent) -> OrchestrationResult<()> {
        let name = agent.name().to_string();

        let _session_permit = match &self.session_limiter {
            Some(limiter) => Some(limiter.acquire().await?),
            None => None,
        };
        let _permit = self.limiter.acquire().await?;

        self.session.write().await.agents[index].start();
        publish(self.sink.as_ref(), ProgressEvent::agent_started(&self.session_id, &name)).await;

        if !self.health.is_healthy(&name).await {
            warn!(session_id = %self.session_id, agent = %name, "Executing agent reported unhealthy");
        }

        let started = Instant::now();
        let outcome = if self.circuit_breaker_enabled {
            match self.breakers.execute(&name, || self.call(&agent)).await {
                Ok(result) => Ok(result),
                Err(CircuitError::Open { retry_after_ms, .. }) => Err(AgentError::CircuitOpen {
                    agent: name.clone(),
                    retry_after_ms,
                }),
                Err(CircuitError::Inner(e)) => Err(e),
            }
        } else {
            self.call(&agent).await
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(result) => self.succeed(index, &name, result, elapsed).await,
            Err(e) => self.recover(index, &name, e, elapsed).await,
        }

        Ok(())
    }

    /// Execute the agent in its own task under the per-agent timeout.
    async fn call(&self, agent: &SharedAgent) -> AgentResult<ResearchResult> {
        let name = agent.name().to_string();
        let mut execution = {
            let agent = Arc::clone(agent);
            let topic = Arc::clone(&self.topic);
            let context = self.context.clone();
            tokio::spawn(async move { agent.execute(&topic, context.as_deref()).await })
        };

        let outcome = match tokio::time::timeout(self.agent_timeout, &mut execution).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_error)) if join_error.is_panic() => {
                Err(AgentError::Panicked { agent: name.clone() })
            }
            Ok(Err(join_error)) => Err(AgentError::Search {
                agent: name.clone(),
                message: join_error.to_string(),
            }),
            Err(_) => {
                execution.abort();
                Err(AgentError::Timeout {
                    agent: name.clone(),
                    timeout_ms: self.agent_timeout.as_millis() as u64,
                })
            }
        }?;

        // An error-valued result is a failure for breaker and health purposes.
        if outcome.status == ResultStatus::Error {
            return Err(AgentError::Search {
                agent: name,
                message: outcome
                    .error
                    .unwrap_or_else(|| "agent returned an error result".to_string()),
            });
        }
        Ok(outcome)
    }

    async fn succeed(&self, index: usize, name: &str, result: ResearchResult, elapsed: Duration) {
        let latency_ms = elapsed.as_millis() as u64;
        self.health.record_success(name, elapsed).await;

        if let Some(store) = &self.store {
            if let Err(e) = store.save_result(&self.session_id, &result).await {
                warn!(session_id = %self.session_id, agent = %name, error = %e, "Failed to persist agent result");
            }
        }

        let count = result.results.len();
        {
            let mut session = self.session.write().await;
            session.agents[index].finish(AgentRunStatus::Completed, count, None);
            session.results.push(result);
        }

        info!(session_id = %self.session_id, agent = %name, results = count, latency_ms, "Agent completed");
        publish(
            self.sink.as_ref(),
            ProgressEvent::agent_completed(&self.session_id, name, count, latency_ms),
        )
        .await;
    }

    async fn recover(&self, index: usize, name: &str, error: AgentError, elapsed: Duration) {
        let message = error.to_string();
        let status = if error.is_timeout() {
            AgentRunStatus::Timeout
        } else {
            AgentRunStatus::Failed
        };

        // An open circuit never reached the agent, so there is nothing to record.
        if !matches!(error, AgentError::CircuitOpen { .. }) {
            self.health.record_failure(name, &message, elapsed).await;
        }
        warn!(session_id = %self.session_id, agent = %name, status = %status, error = %message, "Agent failed");

        let fallback = if self.graceful_degradation_enabled {
            self.degradation
                .handle_agent_failure(name, &self.topic, self.context.as_deref(), &message)
                .await
        } else {
            None
        };

        match fallback {
            Some(result) => {
                let count = result.results.len();
                {
                    let mut session = self.session.write().await;
                    session.agents[index].finish(status, count, Some(message));
                    session.results.push(result);
                }
                let mut event = ProgressEvent::agent_completed(
                    &self.session_id,
                    name,
                    count,
                    elapsed.as_millis() as u64,
                );
                event.data["degraded"] = true.into();
                publish(self.sink.as_ref(), event).await;
            }
            None => {
                {
                    let mut session = self.session.write().await;
                    session.agents[index].finish(status, 0, Some(message.clone()));
                    session.errors.push(format!("{}: {}", name, message));
                    session
                        .results
                        .push(ResearchResult::error(name, self.topic.as_ref(), message.as_str()));
                }
                publish(
                    self.sink.as_ref(),
                    ProgressEvent::agent_failed(&self.session_id, name, &message),
                )
                .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{ResearchAgent, SearchResult};
    use async_trait::async_trait;

    struct Fixed {
        name: &'static str,
        fail: bool,
    }

    #[async_trait]
    impl ResearchAgent for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(
            &self,
            topic: &str,
            _context: Option<&ResearchContext>,
        ) -> AgentResult<ResearchResult> {
            if self.fail {
                return Ok(ResearchResult::error(self.name, topic, "search backend down"));
            }
            Ok(ResearchResult::success(
                self.name,
                topic,
                vec![SearchResult::new("Hit", "https://example.com/hit", "snippet", self.name, 0.8)],
            ))
        }
    }

    fn agent(name: &'static str, fail: bool) -> SharedAgent {
        Arc::new(Fixed { name, fail })
    }

    #[test]
    fn test_agent_timeout_is_eighty_percent() {
        let options = OrchestrationOptions::default().with_timeout_ms(10_000);
        assert_eq!(options.agent_timeout(), Duration::from_millis(8_000));
        assert_eq!(
            OrchestrationOptions::default().with_timeout_ms(0).agent_timeout(),
            Duration::from_millis(1)
        );
    }

    #[tokio::test]
    async fn test_events_are_published_in_lifecycle_order() {
        let mut sink = MockProgressSink::new();
        let mut seq = mockall::Sequence::new();
        for expected in [
            ProgressEventType::ResearchInitiated,
            ProgressEventType::AgentStarted,
            ProgressEventType::AgentFailed,
            ProgressEventType::ResearchCompleted,
        ] {
            sink.expect_publish()
                .withf(move |event| event.event_type == expected)
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
        }

        let registry = AgentRegistry::new().with_agent(agent("web", true));
        let orchestrator = ResearchOrchestrator::new(registry, OrchestratorConfig::default())
            .with_progress_sink(Arc::new(sink));
        let options = OrchestrationOptions::default().with_graceful_degradation(false);

        let session = orchestrator.orchestrate("rust", None, options).await.unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.agents[0].status, AgentRunStatus::Failed);
    }

    #[tokio::test]
    async fn test_sink_errors_do_not_fail_orchestration() {
        let mut sink = MockProgressSink::new();
        sink.expect_publish()
            .returning(|_| Err(SinkError::Closed));

        let registry = AgentRegistry::new().with_agent(agent("web", false));
        let orchestrator = ResearchOrchestrator::new(registry, OrchestratorConfig::default())
            .with_progress_sink(Arc::new(sink));

        let session = orchestrator
            .orchestrate("rust", None, OrchestrationOptions::default())
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_degraded_result_is_not_a_session_error() {
        let registry = AgentRegistry::new()
            .with_agent(agent("web", false))
            .with_agent(agent("video", true));
        let orchestrator = ResearchOrchestrator::new(registry, OrchestratorConfig::default());

        let session = orchestrator
            .orchestrate("rust", None, OrchestrationOptions::default())
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.errors.is_empty());
        assert_eq!(session.agent("video").unwrap().status, AgentRunStatus::Failed);
        let video = session.results.iter().find(|r| r.agent == "video").unwrap();
        assert_eq!(video.status, ResultStatus::Partial);
    }

    #[tokio::test]
    async fn test_closed_limiter_is_catastrophic() {
        let limiter = ConcurrencyLimiter::new(1);
        limiter.close();
        let registry = AgentRegistry::new().with_agent(agent("web", false));
        let orchestrator = ResearchOrchestrator::new(registry, OrchestratorConfig::default())
            .with_limiter(limiter);

        let err = orchestrator
            .orchestrate("rust", None, OrchestrationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::LimiterClosed));

        let sessions = orchestrator.get_all_active_sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Failed);
        assert_eq!(sessions[0].errors.len(), 1);
    }

    #[tokio::test]
    async fn test_session_stats() {
        let registry = AgentRegistry::new()
            .with_agent(agent("web", false))
            .with_agent(agent("arxiv", false));
        let orchestrator = ResearchOrchestrator::new(registry, OrchestratorConfig::default());

        let session = orchestrator
            .orchestrate("rust", None, OrchestrationOptions::default())
            .await
            .unwrap();
        orchestrator
            .orchestrate("tokio", None, OrchestrationOptions::default())
            .await
            .unwrap();

        let stats = orchestrator.get_session_stats().await;
        assert_eq!(stats.active_sessions, 2);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.total_results, 4);

        let active = orchestrator.get_active_session(&session.id).await.unwrap();
        assert_eq!(active.status, SessionStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_are_evicted_after_retention() {
        let config = OrchestratorConfig {
            session_retention_secs: 300,
            ..OrchestratorConfig::default()
        };
        let orchestrator = ResearchOrchestrator::new(AgentRegistry::new(), config);
        let session = orchestrator
            .orchestrate("rust", None, OrchestrationOptions::default())
            .await
            .unwrap();
        assert!(orchestrator.get_active_session(&session.id).await.is_some());

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(orchestrator.get_active_session(&session.id).await.is_none());
    }
}
