use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agents::{ResearchContext, ResearchResult};

/// Lifecycle of a research session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Partial,
}

impl SessionStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Partial => "partial",
        }
    }

    /// Whether the session can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Partial
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SessionStatus::Pending),
            "running" => Ok(SessionStatus::Running),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            "partial" => Ok(SessionStatus::Partial),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

/// Per-agent progress within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl AgentRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRunStatus::Pending => "pending",
            AgentRunStatus::Running => "running",
            AgentRunStatus::Completed => "completed",
            AgentRunStatus::Failed => "failed",
            AgentRunStatus::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentRunStatus::Completed | AgentRunStatus::Failed | AgentRunStatus::Timeout
        )
    }
}

impl std::fmt::Display for AgentRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of one agent in one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub name: String,
    pub status: AgentRunStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// 0 to 100
    pub progress: u8,
    pub result_count: usize,
    pub error: Option<String>,
}

impl AgentStatus {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: AgentRunStatus::Pending,
            start_time: None,
            end_time: None,
            progress: 0,
            result_count: 0,
            error: None,
        }
    }

    pub(crate) fn start(&mut self) {
        self.status = AgentRunStatus::Running;
        self.start_time = Some(Utc::now());
        self.progress = 10;
    }

    pub(crate) fn finish(&mut self, status: AgentRunStatus, result_count: usize, error: Option<String>) {
        self.status = status;
        self.end_time = Some(Utc::now());
        self.progress = 100;
        self.result_count = result_count;
        self.error = error;
    }
}

/// One end-to-end orchestration run for a single topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchSession {
    pub id: String,
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ResearchContext>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    /// Ordered by agent priority at session start
    pub agents: Vec<AgentStatus>,
    /// In completion order
    pub results: Vec<ResearchResult>,
    pub errors: Vec<String>,
}

impl ResearchSession {
    /// A pending session for the given agents.
    pub fn new(
        topic: impl Into<String>,
        context: Option<ResearchContext>,
        agent_names: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic: topic.into(),
            context,
            start_time: Utc::now(),
            end_time: None,
            status: SessionStatus::Pending,
            agents: agent_names.into_iter().map(AgentStatus::pending).collect(),
            results: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Status entry for `name`. With duplicate names the last entry wins.
    pub fn agent(&self, name: &str) -> Option<&AgentStatus> {
        self.agents.iter().rev().find(|a| a.name == name)
    }

    /// Wall-clock duration, if finished.
    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds().max(0))
    }

    /// Agents whose result did not end in error.
    pub fn successful_agents(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Total number of search hits across all results.
    pub fn total_results(&self) -> usize {
        self.results.iter().map(|r| r.results.len()).sum()
    }

    /// Mean relevance over every hit, 0 when there are none.
    pub fn average_relevance(&self) -> f64 {
        let total = self.total_results();
        if total == 0 {
            return 0.0;
        }
        self.results
            .iter()
            .flat_map(|r| r.results.iter())
            .map(|r| r.relevance_score)
            .sum::<f64>()
            / total as f64
    }

    /// Fraction of agents that produced a non-error result (1.0 with no agents).
    pub fn success_rate(&self) -> f64 {
        if self.agents.is_empty() {
            return 1.0;
        }
        self.successful_agents() as f64 / self.agents.len() as f64
    }
}

/// Session status implied by a success rate.
pub fn classify_session(success_rate: f64, failure_tolerance: f64) -> SessionStatus {
    const EPSILON: f64 = 1e-9;
    if success_rate >= 1.0 - EPSILON {
        SessionStatus::Completed
    } else if success_rate + EPSILON >= 1.0 - failure_tolerance {
        SessionStatus::Partial
    } else {
        SessionStatus::Failed
    }
}
