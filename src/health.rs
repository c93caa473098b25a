//! Process-wide agent health registry.
//!
//! Tracks a smoothed response time and success rate per agent name using
//! exponential moving averages, keeps the most recent errors, and derives a
//! coarse health state. Entries are shared by every session; each entry has
//! its own lock so concurrent sessions probing the same agent never lose
//! updates.
//!
//! ```text
//! execution → record_success / record_failure → EMA update → classify
//!                                     sweep_stale → offline
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::HealthConfig;

/// Success rate at or above which an agent is healthy.
const HEALTHY_SUCCESS_RATE: f64 = 0.8;
/// Success rate at or above which an agent is degraded rather than unhealthy.
const DEGRADED_SUCCESS_RATE: f64 = 0.5;
/// Response time below which an agent can be healthy.
const HEALTHY_RESPONSE_TIME_MS: f64 = 5000.0;
/// Window used for the throughput count.
const THROUGHPUT_WINDOW_SECS: i64 = 60;

/// Coarse health classification of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    Offline,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Degraded => write!(f, "degraded"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
            HealthState::Offline => write!(f, "offline"),
        }
    }
}

/// Smoothed execution metrics.
///
/// `error_rate` is always `1 - success_rate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMetrics {
    /// EMA of response time in milliseconds
    pub response_time_ms: f64,
    /// EMA of success (1.0) / failure (0.0)
    pub success_rate: f64,
    pub error_rate: f64,
    /// Executions in the trailing minute
    pub throughput: u32,
}

impl Default for HealthMetrics {
    fn default() -> Self {
        Self {
            response_time_ms: 0.0,
            success_rate: 1.0,
            error_rate: 0.0,
            throughput: 0,
        }
    }
}

/// A recorded agent error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Health snapshot for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealthStatus {
    pub agent_name: String,
    pub status: HealthState,
    pub last_heartbeat: DateTime<Utc>,
    pub metrics: HealthMetrics,
    /// Most recent errors, oldest first
    pub errors: Vec<AgentErrorRecord>,
    pub capabilities: Vec<String>,
    pub total_executions: u64,
}

#[derive(Debug)]
struct HealthEntry {
    status: AgentHealthStatus,
    recent_executions: VecDeque<DateTime<Utc>>,
}

impl HealthEntry {
    fn new(agent_name: &str, capabilities: Vec<String>) -> Self {
        Self {
            status: AgentHealthStatus {
                agent_name: agent_name.to_string(),
                status: HealthState::Healthy,
                last_heartbeat: Utc::now(),
                metrics: HealthMetrics::default(),
                errors: Vec::new(),
                capabilities,
                total_executions: 0,
            },
            recent_executions: VecDeque::new(),
        }
    }

    fn record(&mut self, success: bool, response_time: Duration, config: &HealthConfig) {
        let now = Utc::now();
        let sample_ms = response_time.as_secs_f64() * 1000.0;
        let metrics = &mut self.status.metrics;

        metrics.response_time_ms = if self.status.total_executions == 0 {
            sample_ms
        } else {
            config.response_time_alpha * sample_ms
                + (1.0 - config.response_time_alpha) * metrics.response_time_ms
        };

        let outcome = if success { 1.0 } else { 0.0 };
        metrics.success_rate = (config.success_rate_alpha * outcome
            + (1.0 - config.success_rate_alpha) * metrics.success_rate)
            .clamp(0.0, 1.0);
        metrics.error_rate = 1.0 - metrics.success_rate;

        self.recent_executions.push_back(now);
        let window_start = now - ChronoDuration::seconds(THROUGHPUT_WINDOW_SECS);
        while self
            .recent_executions
            .front()
            .is_some_and(|t| *t < window_start)
        {
            self.recent_executions.pop_front();
        }
        metrics.throughput = self.recent_executions.len() as u32;

        self.status.total_executions += 1;
        self.status.last_heartbeat = now;
        self.status.status = classify(&self.status.metrics);
    }

    fn push_error(&mut self, message: &str, max_errors: usize) {
        self.status.errors.push(AgentErrorRecord {
            timestamp: Utc::now(),
            message: message.to_string(),
        });
        if self.status.errors.len() > max_errors {
            let excess = self.status.errors.len() - max_errors;
            self.status.errors.drain(..excess);
        }
    }

    /// Force offline if the heartbeat is older than `timeout`. Returns true on transition.
    fn expire(&mut self, now: DateTime<Utc>, timeout: ChronoDuration) -> bool {
        if self.status.status != HealthState::Offline && now - self.status.last_heartbeat > timeout
        {
            self.status.status = HealthState::Offline;
            return true;
        }
        false
    }
}

fn classify(metrics: &HealthMetrics) -> HealthState {
    if metrics.success_rate >= HEALTHY_SUCCESS_RATE
        && metrics.response_time_ms < HEALTHY_RESPONSE_TIME_MS
    {
        HealthState::Healthy
    } else if metrics.success_rate >= DEGRADED_SUCCESS_RATE {
        HealthState::Degraded
    } else {
        HealthState::Unhealthy
    }
}

/// Registry of agent health, one entry per agent name.
pub struct HealthRegistry {
    entries: RwLock<HashMap<String, Arc<Mutex<HealthEntry>>>>,
    config: HealthConfig,
}

impl HealthRegistry {
    /// Create an empty registry.
    pub fn new(config: HealthConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
        }
    }

    fn heartbeat_timeout(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.config.heartbeat_timeout_secs as i64)
    }

    async fn entry(&self, agent: &str) -> Arc<Mutex<HealthEntry>> {
        if let Some(entry) = self.entries.read().await.get(agent) {
            return Arc::clone(entry);
        }
        let mut entries = self.entries.write().await;
        Arc::clone(
            entries
                .entry(agent.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(HealthEntry::new(agent, Vec::new())))),
        )
    }

    /// Register an agent and its capabilities.
    pub async fn register(&self, agent: &str, capabilities: Vec<String>) {
        let entry = self.entry(agent).await;
        let mut entry = entry.lock().await;
        entry.status.capabilities = capabilities;
        entry.status.last_heartbeat = Utc::now();
    }

    /// Record a successful execution.
    pub async fn record_success(&self, agent: &str, response_time: Duration) {
        let entry = self.entry(agent).await;
        let mut entry = entry.lock().await;
        entry.record(true, response_time, &self.config);
        debug!(
            agent = %agent,
            success_rate = entry.status.metrics.success_rate,
            response_time_ms = entry.status.metrics.response_time_ms,
            "Recorded agent success"
        );
    }

    /// Record a failed execution.
    pub async fn record_failure(&self, agent: &str, error: &str, response_time: Duration) {
        let entry = self.entry(agent).await;
        let mut entry = entry.lock().await;
        let previous = entry.status.status;
        entry.record(false, response_time, &self.config);
        entry.push_error(error, self.config.max_errors);

        if entry.status.status != previous {
            warn!(
                agent = %agent,
                from = %previous,
                to = %entry.status.status,
                success_rate = entry.status.metrics.success_rate,
                "Agent health changed"
            );
        }
    }

    /// Refresh an agent's heartbeat, bringing it back from offline.
    pub async fn heartbeat(&self, agent: &str) {
        let entry = self.entry(agent).await;
        let mut entry = entry.lock().await;
        entry.status.last_heartbeat = Utc::now();
        if entry.status.status == HealthState::Offline {
            entry.status.status = classify(&entry.status.metrics);
        }
    }

    /// Current health of an agent, with stale entries reported offline.
    pub async fn get(&self, agent: &str) -> Option<AgentHealthStatus> {
        let entry = self.entries.read().await.get(agent).cloned()?;
        let mut entry = entry.lock().await;
        entry.expire(Utc::now(), self.heartbeat_timeout());
        Some(entry.status.clone())
    }

    /// Whether the agent is usable. Unknown agents are assumed healthy.
    pub async fn is_healthy(&self, agent: &str) -> bool {
        match self.get(agent).await {
            Some(status) => matches!(status.status, HealthState::Healthy | HealthState::Degraded),
            None => true,
        }
    }

    /// Snapshots of every tracked agent, sorted by name.
    pub async fn all(&self) -> Vec<AgentHealthStatus> {
        let entries: Vec<_> = self.entries.read().await.values().cloned().collect();
        let timeout = self.heartbeat_timeout();
        let now = Utc::now();

        let mut statuses = Vec::with_capacity(entries.len());
        for entry in entries {
            let mut entry = entry.lock().await;
            entry.expire(now, timeout);
            statuses.push(entry.status.clone());
        }
        statuses.sort_by(|a, b| a.agent_name.cmp(&b.agent_name));
        statuses
    }

    /// Force every entry whose heartbeat is older than the timeout offline.
    ///
    /// Returns the names that transitioned.
    pub async fn sweep_stale(&self, now: DateTime<Utc>) -> Vec<String> {
        let entries: Vec<_> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(name, entry)| (name.clone(), Arc::clone(entry)))
            .collect();
        let timeout = self.heartbeat_timeout();

        let mut expired = Vec::new();
        for (name, entry) in entries {
            if entry.lock().await.expire(now, timeout) {
                info!(agent = %name, "Agent marked offline after missed heartbeats");
                expired.push(name);
            }
        }
        expired.sort();
        expired
    }

    /// Run [`sweep_stale`](Self::sweep_stale) periodically until the task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sweep_stale(Utc::now()).await;
            }
        })
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_rates_sum_to_one(status: &AgentHealthStatus) {
        let sum = status.metrics.success_rate + status.metrics.error_rate;
        assert!((sum - 1.0).abs() < 1e-12, "rates sum to {}", sum);
    }

    #[tokio::test]
    async fn test_unknown_agent_is_healthy() {
        let registry = HealthRegistry::default();
        assert!(registry.is_healthy("nobody").await);
        assert!(registry.get("nobody").await.is_none());
    }

    #[tokio::test]
    async fn test_first_sample_seeds_response_time() {
        let registry = HealthRegistry::default();
        registry
            .record_success("web", Duration::from_millis(400))
            .await;

        let status = registry.get("web").await.unwrap();
        assert_eq!(status.metrics.response_time_ms, 400.0);
        assert_eq!(status.metrics.success_rate, 1.0);
        assert_eq!(status.metrics.throughput, 1);
        assert_eq!(status.status, HealthState::Healthy);
    }

    #[tokio::test]
    async fn test_ema_updates() {
        let registry = HealthRegistry::default();
        registry
            .record_success("web", Duration::from_millis(1000))
            .await;
        registry
            .record_failure("web", "boom", Duration::from_millis(2000))
            .await;

        let status = registry.get("web").await.unwrap();
        // 0.2 * 2000 + 0.8 * 1000
        assert!((status.metrics.response_time_ms - 1200.0).abs() < 1e-9);
        // 0.1 * 0 + 0.9 * 1.0
        assert!((status.metrics.success_rate - 0.9).abs() < 1e-9);
        assert_rates_sum_to_one(&status);
        assert_eq!(status.errors.len(), 1);
        assert_eq!(status.total_executions, 2);
    }

    #[tokio::test]
    async fn test_rates_always_sum_to_one() {
        let registry = HealthRegistry::default();
        for i in 0..50 {
            if i % 3 == 0 {
                registry
                    .record_failure("web", "err", Duration::from_millis(10))
                    .await;
            } else {
                registry
                    .record_success("web", Duration::from_millis(10))
                    .await;
            }
            assert_rates_sum_to_one(&registry.get("web").await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_repeated_failures_degrade_then_unhealthy() {
        let registry = HealthRegistry::default();
        for _ in 0..3 {
            registry
                .record_failure("video", "down", Duration::from_millis(10))
                .await;
        }
        // 0.9^3 = 0.729
        assert_eq!(
            registry.get("video").await.unwrap().status,
            HealthState::Degraded
        );
        assert!(registry.is_healthy("video").await);

        for _ in 0..4 {
            registry
                .record_failure("video", "down", Duration::from_millis(10))
                .await;
        }
        // 0.9^7 ≈ 0.478
        assert_eq!(
            registry.get("video").await.unwrap().status,
            HealthState::Unhealthy
        );
        assert!(!registry.is_healthy("video").await);
    }

    #[tokio::test]
    async fn test_slow_agent_is_degraded() {
        let registry = HealthRegistry::default();
        registry
            .record_success("slow", Duration::from_millis(8000))
            .await;
        assert_eq!(
            registry.get("slow").await.unwrap().status,
            HealthState::Degraded
        );
    }

    #[tokio::test]
    async fn test_error_history_is_bounded() {
        let registry = HealthRegistry::default();
        for i in 0..15 {
            registry
                .record_failure("web", &format!("error {}", i), Duration::from_millis(5))
                .await;
        }
        let status = registry.get("web").await.unwrap();
        assert_eq!(status.errors.len(), 10);
        assert_eq!(status.errors[0].message, "error 5");
        assert_eq!(status.errors[9].message, "error 14");
    }

    #[tokio::test]
    async fn test_sweep_marks_stale_agents_offline() {
        let registry = HealthRegistry::default();
        registry.register("academic", vec!["papers".to_string()]).await;
        registry
            .record_success("general", Duration::from_millis(5))
            .await;

        assert!(registry.sweep_stale(Utc::now()).await.is_empty());

        let later = Utc::now() + ChronoDuration::seconds(61);
        let expired = registry.sweep_stale(later).await;
        assert_eq!(expired, vec!["academic", "general"]);

        let statuses = registry.all().await;
        assert!(statuses.iter().all(|s| s.status == HealthState::Offline));
        assert_eq!(statuses[0].capabilities, vec!["papers"]);
        assert!(!registry.is_healthy("academic").await);

        registry.heartbeat("academic").await;
        assert_eq!(
            registry.get("academic").await.unwrap().status,
            HealthState::Healthy
        );
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let registry = Arc::new(HealthRegistry::default());
        let mut handles = Vec::new();
        for _ in 0..20 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry
                    .record_success("shared", Duration::from_millis(1))
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(registry.get("shared").await.unwrap().total_executions, 20);
    }
}
