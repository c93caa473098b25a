//! Persistence for research sessions and agent results.
//!
//! The orchestrator records each session and the successful agent results
//! it produced; the cached-fallback degradation strategy reads them back.
//! Storage is best-effort from the orchestrator's point of view: failures
//! are logged, never propagated into a session.

mod sqlite;

pub use sqlite::SqliteResultStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::ResearchResult;
use crate::error::StorageResult;
use crate::orchestrator::{ResearchSession, SessionStatus};

/// Persisted summary of a research session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub topic: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result_count: usize,
    pub errors: Vec<String>,
    pub metadata: Option<serde_json::Value>,
}

impl SessionRecord {
    /// Create a record for a new session.
    pub fn new(id: impl Into<String>, topic: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            topic: topic.into(),
            status: SessionStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
            result_count: 0,
            errors: Vec::new(),
            metadata: None,
        }
    }

    /// Snapshot a live session.
    pub fn from_session(session: &ResearchSession) -> Self {
        Self {
            id: session.id.clone(),
            topic: session.topic.clone(),
            status: session.status,
            created_at: session.start_time,
            updated_at: Utc::now(),
            completed_at: session.end_time,
            result_count: session.results.iter().map(|r| r.results.len()).sum(),
            errors: session.errors.clone(),
            metadata: session
                .context
                .as_ref()
                .and_then(|c| serde_json::to_value(c).ok()),
        }
    }
}

/// A stored agent result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResult {
    pub id: String,
    pub session_id: String,
    pub result: ResearchResult,
    pub created_at: DateTime<Utc>,
}

/// Record store used by the orchestrator and the cached fallback.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Create a new session record.
    async fn create_session(&self, record: &SessionRecord) -> StorageResult<()>;
    /// Get a session record by ID.
    async fn get_session(&self, id: &str) -> StorageResult<Option<SessionRecord>>;
    /// Update an existing session record.
    async fn update_session(&self, record: &SessionRecord) -> StorageResult<()>;
    /// Store one agent's result for a session.
    async fn save_result(&self, session_id: &str, result: &ResearchResult) -> StorageResult<()>;
    /// Most recent results produced by `agent`, newest first.
    async fn recent_results(&self, agent: &str, limit: usize) -> StorageResult<Vec<StoredResult>>;
}

/// Shared handle to a result store.
pub type SharedResultStore = Arc<dyn ResultStore>;
