//! Per-agent circuit breakers.
//!
//! A breaker stops calling a failing agent for a cooldown period. It uses
//! the standard closed/open/half-open state machine pattern.
//!
//! # States
//!
//! - **Closed**: Normal operation, calls are allowed
//! - **Open**: Failing fast after `failure_threshold` failures
//! - **Half-Open**: Recovery timeout elapsed, the next call is a trial
//!
//! Half-open does not limit concurrent trial calls: every caller that
//! arrives while half-open is let through until the first outcome is
//! recorded.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;

/// State of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - calls allowed
    Closed,
    /// Failing fast - too many failures
    Open,
    /// Testing recovery
    HalfOpen,
}

impl CircuitState {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "closed" => Ok(CircuitState::Closed),
            "open" => Ok(CircuitState::Open),
            "half_open" => Ok(CircuitState::HalfOpen),
            _ => Err(format!("Unknown circuit state: {}", s)),
        }
    }
}

/// Error returned by [`CircuitBreakerManager::execute`].
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The call was rejected without running the operation.
    #[error("Service unavailable: circuit open for {name}, retry in {retry_after_ms}ms")]
    Open { name: String, retry_after_ms: u64 },

    /// The operation ran and failed.
    #[error("{0}")]
    Inner(E),
}

/// Three-state gate around calls to one protected resource.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    state: CircuitState,
    /// Failures since the last success
    failures: u32,
    total_failures: u64,
    total_successes: u64,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_state_change: DateTime<Utc>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new closed circuit breaker.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            state: CircuitState::Closed,
            failures: 0,
            total_failures: 0,
            total_successes: 0,
            last_failure: None,
            last_failure_at: None,
            last_state_change: Utc::now(),
            config,
        }
    }

    fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.config.recovery_timeout_ms)
    }

    /// Ask to make a call.
    ///
    /// Returns the remaining wait if the circuit is open. An open circuit
    /// whose recovery timeout has elapsed moves to half-open and admits the
    /// call.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = self
                    .last_failure
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                let timeout = self.recovery_timeout();
                if elapsed >= timeout {
                    self.transition_to(CircuitState::HalfOpen);
                    Ok(())
                } else {
                    Err(timeout - elapsed)
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&mut self) {
        self.failures = 0;
        self.total_successes += 1;

        if self.state != CircuitState::Closed {
            self.transition_to(CircuitState::Closed);
        }
    }

    /// Record a failed call.
    pub fn record_failure(&mut self) {
        self.failures += 1;
        self.total_failures += 1;
        self.last_failure = Some(Instant::now());
        self.last_failure_at = Some(Utc::now());

        match self.state {
            CircuitState::HalfOpen => self.transition_to(CircuitState::Open),
            CircuitState::Closed if self.failures >= self.config.failure_threshold => {
                self.transition_to(CircuitState::Open)
            }
            _ => {}
        }
    }

    fn transition_to(&mut self, new_state: CircuitState) {
        tracing::info!(
            breaker = %self.name,
            from = %self.state,
            to = %new_state,
            failures = self.failures,
            "Circuit breaker state transition"
        );
        self.state = new_state;
        self.last_state_change = Utc::now();
    }

    /// Get the current state.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Check if the circuit is open.
    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }

    /// Time until an open circuit admits a trial call.
    pub fn time_until_recovery(&self) -> Option<Duration> {
        if self.state != CircuitState::Open {
            return None;
        }
        self.last_failure
            .map(|t| self.recovery_timeout().saturating_sub(t.elapsed()))
    }

    /// Manually reset the circuit breaker to closed state.
    pub fn reset(&mut self) {
        tracing::info!(breaker = %self.name, from = %self.state, "Circuit breaker manually reset");
        self.state = CircuitState::Closed;
        self.failures = 0;
        self.last_state_change = Utc::now();
    }

    /// Get a summary of the current state for display.
    pub fn summary(&self) -> CircuitBreakerSummary {
        CircuitBreakerSummary {
            name: self.name.clone(),
            state: self.state,
            failures: self.failures,
            total_failures: self.total_failures,
            total_successes: self.total_successes,
            time_until_recovery_ms: self
                .time_until_recovery()
                .map(|d| d.as_millis() as u64),
            last_failure: self.last_failure_at,
            last_state_change: self.last_state_change,
        }
    }
}

/// Snapshot of a breaker for observability.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSummary {
    pub name: String,
    pub state: CircuitState,
    pub failures: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub time_until_recovery_ms: Option<u64>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_state_change: DateTime<Utc>,
}

impl std::fmt::Display for CircuitBreakerSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} ",
            self.name,
            self.state.to_string().to_uppercase()
        )?;
        match (self.state, self.time_until_recovery_ms) {
            (CircuitState::Open, Some(ms)) => write!(f, "(recovery in {}s)", ms.div_ceil(1000)),
            _ => write!(f, "({} failures)", self.failures),
        }
    }
}

/// Process-wide registry of breakers, one per agent name.
///
/// Breakers are created lazily on first use and shared by all sessions.
pub struct CircuitBreakerManager {
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerManager {
    /// Create an empty manager.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Run `op` through the breaker for `name`.
    ///
    /// The lock is released while `op` runs; only the gate check and the
    /// outcome update are serialised.
    pub async fn execute<T, E, F, Fut>(&self, name: &str, op: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        {
            let mut breakers = self.breakers.lock().await;
            let breaker = breakers
                .entry(name.to_string())
                .or_insert_with(|| CircuitBreaker::new(name, self.config.clone()));
            if let Err(remaining) = breaker.try_acquire() {
                tracing::debug!(
                    breaker = %name,
                    retry_after_ms = remaining.as_millis() as u64,
                    "Circuit open, failing fast"
                );
                return Err(CircuitError::Open {
                    name: name.to_string(),
                    retry_after_ms: remaining.as_millis() as u64,
                });
            }
        }

        let outcome = op().await;

        let mut breakers = self.breakers.lock().await;
        let breaker = breakers
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreaker::new(name, self.config.clone()));
        match outcome {
            Ok(value) => {
                breaker.record_success();
                Ok(value)
            }
            Err(e) => {
                breaker.record_failure();
                Err(CircuitError::Inner(e))
            }
        }
    }

    /// Whether the breaker for `name` is currently open.
    pub async fn is_open(&self, name: &str) -> bool {
        self.breakers
            .lock()
            .await
            .get(name)
            .map(CircuitBreaker::is_open)
            .unwrap_or(false)
    }

    /// Current state for `name`; unknown names are closed.
    pub async fn state(&self, name: &str) -> CircuitState {
        self.breakers
            .lock()
            .await
            .get(name)
            .map(CircuitBreaker::state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Summary for one breaker.
    pub async fn summary(&self, name: &str) -> Option<CircuitBreakerSummary> {
        self.breakers.lock().await.get(name).map(CircuitBreaker::summary)
    }

    /// Summaries of all breakers, sorted by name.
    pub async fn summaries(&self) -> Vec<CircuitBreakerSummary> {
        let mut summaries: Vec<_> = self
            .breakers
            .lock()
            .await
            .values()
            .map(CircuitBreaker::summary)
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Reset one breaker to closed. Returns false for unknown names.
    pub async fn reset(&self, name: &str) -> bool {
        match self.breakers.lock().await.get_mut(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout_ms: 60_000,
        }
    }

    async fn fail(manager: &CircuitBreakerManager, name: &str) {
        let result: Result<(), CircuitError<&str>> =
            manager.execute(name, || async { Err("boom") }).await;
        assert!(matches!(result, Err(CircuitError::Inner("boom"))));
    }

    #[test]
    fn test_initial_state_is_closed() {
        let cb = CircuitBreaker::new("web", test_config());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(!cb.is_open());
        assert_eq!(cb.time_until_recovery(), None);
    }

    #[tokio::test]
    async fn test_opens_after_threshold_failures() {
        let mut cb = CircuitBreaker::new("web", test_config());

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_err());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut cb = CircuitBreaker::new("web", test_config());

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.failures(), 2);

        cb.record_success();
        assert_eq!(cb.failures(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_reopens_on_failure() {
        let mut cb = CircuitBreaker::new("web", test_config());
        for _ in 0..3 {
            cb.record_failure();
        }

        tokio::time::advance(Duration::from_millis(60_000)).await;
        assert!(cb.try_acquire().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manager_state_machine() {
        let manager = CircuitBreakerManager::new(test_config());
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            fail(&manager, "academic").await;
        }
        assert_eq!(manager.state("academic").await, CircuitState::Open);

        // Within the recovery window the operation must not run.
        tokio::time::advance(Duration::from_millis(30_000)).await;
        let result: Result<(), CircuitError<&str>> = manager
            .execute("academic", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        match result {
            Err(CircuitError::Open { retry_after_ms, .. }) => assert_eq!(retry_after_ms, 30_000),
            other => panic!("expected open circuit, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // After the window one trial call runs and closes the circuit.
        tokio::time::advance(Duration::from_millis(30_000)).await;
        let result: Result<&str, CircuitError<&str>> = manager
            .execute("academic", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("ok")
            })
            .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state("academic").await, CircuitState::Closed);
        assert_eq!(manager.summary("academic").await.unwrap().failures, 0);
    }

    #[tokio::test]
    async fn test_manager_isolates_agents() {
        let manager = CircuitBreakerManager::new(test_config());
        for _ in 0..3 {
            fail(&manager, "video").await;
        }
        assert!(manager.is_open("video").await);
        assert!(!manager.is_open("general").await);
        assert_eq!(manager.state("unknown").await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_manager_reset_and_summaries() {
        let manager = CircuitBreakerManager::new(test_config());
        for _ in 0..3 {
            fail(&manager, "video").await;
        }
        fail(&manager, "community").await;

        let summaries = manager.summaries().await;
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].name, "community");
        assert!(summaries[1].to_string().starts_with("video: OPEN"));

        assert!(manager.reset("video").await);
        assert!(!manager.reset("missing").await);
        assert_eq!(manager.state("video").await, CircuitState::Closed);
    }

    #[test]
    fn test_circuit_state_string_conversion() {
        assert_eq!(CircuitState::HalfOpen.as_str(), "half_open");
        assert_eq!("open".parse::<CircuitState>().unwrap(), CircuitState::Open);
        assert!("sideways".parse::<CircuitState>().is_err());
    }
}
