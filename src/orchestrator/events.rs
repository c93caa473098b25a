//! Progress events and the sinks that receive them.
//!
//! Delivery is fire-and-forget: the orchestrator logs a failed publish and
//! carries on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Kind of progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressEventType {
    ResearchInitiated,
    AgentStarted,
    AgentCompleted,
    AgentFailed,
    ResearchCompleted,
    ResearchFailed,
}

impl ProgressEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressEventType::ResearchInitiated => "RESEARCH_INITIATED",
            ProgressEventType::AgentStarted => "AGENT_STARTED",
            ProgressEventType::AgentCompleted => "AGENT_COMPLETED",
            ProgressEventType::AgentFailed => "AGENT_FAILED",
            ProgressEventType::ResearchCompleted => "RESEARCH_COMPLETED",
            ProgressEventType::ResearchFailed => "RESEARCH_FAILED",
        }
    }
}

impl std::fmt::Display for ProgressEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A structured progress message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub event_type: ProgressEventType,
    pub session_id: String,
    pub data: Value,
}

impl ProgressEvent {
    pub fn new(event_type: ProgressEventType, session_id: impl Into<String>, data: Value) -> Self {
        Self {
            event_type,
            session_id: session_id.into(),
            data,
        }
    }

    pub fn initiated(session_id: &str, topic: &str, agents: &[String]) -> Self {
        Self::new(
            ProgressEventType::ResearchInitiated,
            session_id,
            json!({ "topic": topic, "agents": agents }),
        )
    }

    pub fn agent_started(session_id: &str, agent: &str) -> Self {
        Self::new(
            ProgressEventType::AgentStarted,
            session_id,
            json!({ "agent": agent }),
        )
    }

    pub fn agent_completed(session_id: &str, agent: &str, result_count: usize, latency_ms: u64) -> Self {
        Self::new(
            ProgressEventType::AgentCompleted,
            session_id,
            json!({ "agent": agent, "result_count": result_count, "latency_ms": latency_ms }),
        )
    }

    pub fn agent_failed(session_id: &str, agent: &str, error: &str) -> Self {
        Self::new(
            ProgressEventType::AgentFailed,
            session_id,
            json!({ "agent": agent, "error": error }),
        )
    }

    pub fn completed(
        session_id: &str,
        status: &str,
        duration_ms: i64,
        confidence: f64,
        completeness: f64,
    ) -> Self {
        Self::new(
            ProgressEventType::ResearchCompleted,
            session_id,
            json!({
                "status": status,
                "duration_ms": duration_ms,
                "confidence": confidence,
                "completeness": completeness,
            }),
        )
    }

    pub fn failed(session_id: &str, error: &str) -> Self {
        Self::new(
            ProgressEventType::ResearchFailed,
            session_id,
            json!({ "error": error }),
        )
    }
}

/// Failure to deliver an event.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Progress sink closed")]
    Closed,
}

/// Receiver of progress events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn publish(&self, event: ProgressEvent) -> Result<(), SinkError>;
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgressSink;

#[async_trait]
impl ProgressSink for NoopProgressSink {
    async fn publish(&self, _event: ProgressEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Mirrors events into the log stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgressSink;

#[async_trait]
impl ProgressSink for TracingProgressSink {
    async fn publish(&self, event: ProgressEvent) -> Result<(), SinkError> {
        match event.event_type {
            ProgressEventType::ResearchInitiated
            | ProgressEventType::ResearchCompleted
            | ProgressEventType::ResearchFailed => info!(
                session_id = %event.session_id,
                event = %event.event_type,
                data = %event.data,
                "Research progress"
            ),
            _ => debug!(
                session_id = %event.session_id,
                event = %event.event_type,
                data = %event.data,
                "Agent progress"
            ),
        }
        Ok(())
    }
}

/// Fans events out to any number of subscribers.
///
/// Having no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastProgressSink {
    sender: broadcast::Sender<ProgressEvent>,
}

impl BroadcastProgressSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl ProgressSink for BroadcastProgressSink {
    async fn publish(&self, event: ProgressEvent) -> Result<(), SinkError> {
        // send only fails when nobody is listening
        let _ = self.sender.send(event);
        Ok(())
    }
}
