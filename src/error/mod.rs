use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors raised by a single research agent.
///
/// These never escape the orchestrator: they are converted into failed
/// agent statuses and error-valued results.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent {agent} search failed: {message}")]
    Search { agent: String, message: String },

    #[error("Agent {agent} timed out after {timeout_ms}ms")]
    Timeout { agent: String, timeout_ms: u64 },

    #[error("Service unavailable: circuit open for {agent}, retry in {retry_after_ms}ms")]
    CircuitOpen { agent: String, retry_after_ms: u64 },

    #[error("Agent {agent} panicked during execution")]
    Panicked { agent: String },

    #[error("Agent {agent} returned an invalid response: {message}")]
    InvalidResponse { agent: String, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AgentError {
    /// Whether this error represents a timeout rather than a failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, AgentError::Timeout { .. })
    }
}

/// Catastrophic orchestration failures.
///
/// This is the only error class that propagates past the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("Concurrency limiter is closed")]
    LimiterClosed,

    #[error("Orchestration aborted: {message}")]
    Aborted { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Text-generation API errors
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("LLM client is not configured")]
    NotConfigured,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failure of a single degradation strategy.
#[derive(Debug, Error)]
pub enum DegradationError {
    #[error("Strategy {strategy} failed: {message}")]
    Strategy { strategy: String, message: String },
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for agent executions
pub type AgentResult<T> = Result<T, AgentError>;

/// Result type alias for orchestration
pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for text-generation calls
pub type LlmResult<T> = Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::Internal {
            message: "unexpected".to_string(),
        };
        assert_eq!(err.to_string(), "Internal error: unexpected");
    }

    #[test]
    fn test_agent_error_display() {
        let err = AgentError::Timeout {
            agent: "academic".to_string(),
            timeout_ms: 24000,
        };
        assert_eq!(err.to_string(), "Agent academic timed out after 24000ms");
        assert!(err.is_timeout());

        let err = AgentError::CircuitOpen {
            agent: "video".to_string(),
            retry_after_ms: 1500,
        };
        assert_eq!(
            err.to_string(),
            "Service unavailable: circuit open for video, retry in 1500ms"
        );
        assert!(!err.is_timeout());

        let err = AgentError::Search {
            agent: "general".to_string(),
            message: "rate limited".to_string(),
        };
        assert_eq!(err.to_string(), "Agent general search failed: rate limited");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::SessionNotFound {
            session_id: "sess-123".to_string(),
        };
        assert_eq!(err.to_string(), "Session not found: sess-123");

        let err = StorageError::Migration {
            message: "version mismatch".to_string(),
        };
        assert_eq!(err.to_string(), "Migration failed: version mismatch");
    }

    #[test]
    fn test_llm_error_display() {
        let err = LlmError::Unavailable {
            message: "server down".to_string(),
            retries: 3,
        };
        assert_eq!(err.to_string(), "LLM unavailable: server down (retries: 3)");

        let err = LlmError::Api {
            status: 401,
            message: "unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 401 - unauthorized");

        let err = LlmError::Timeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "Request timeout after 5000ms");
    }

    #[test]
    fn test_orchestration_error_conversion_to_app_error() {
        let app_err: AppError = OrchestrationError::LimiterClosed.into();
        assert!(matches!(app_err, AppError::Orchestration(_)));
        assert!(app_err.to_string().contains("limiter is closed"));
    }

    #[test]
    fn test_storage_error_conversion_to_app_error() {
        let storage_err = StorageError::SessionNotFound {
            session_id: "test-123".to_string(),
        };
        let app_err: AppError = storage_err.into();
        assert!(matches!(app_err, AppError::Storage(_)));
    }

    #[test]
    fn test_llm_error_conversion_to_app_error() {
        let app_err: AppError = LlmError::Timeout { timeout_ms: 1000 }.into();
        assert!(matches!(app_err, AppError::Llm(_)));
    }
}
