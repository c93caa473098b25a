use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;

use crate::agents::AgentCategory;
use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub logging: LoggingConfig,
    pub orchestrator: OrchestratorConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub health: HealthConfig,
    pub dedup: DeduplicationConfig,
    pub llm: LlmConfig,
    pub request: RequestConfig,
    pub synthesis: SynthesisConfig,
    pub database: DatabaseConfig,
    /// Search endpoints, one agent each.
    pub agents: Vec<AgentEndpoint>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Orchestrator defaults applied to every session unless overridden.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorConfig {
    /// Global session timeout (milliseconds)
    pub timeout_ms: u64,
    /// Process-wide cap on simultaneously running agents
    pub max_concurrent_agents: usize,
    /// Fraction of agents allowed to fail before a session is `failed`
    pub failure_tolerance: f64,
    /// Category order used to seed agent status ordering
    pub priority: Vec<AgentCategory>,
    pub circuit_breaker_enabled: bool,
    pub graceful_degradation_enabled: bool,
    /// How long finished sessions stay queryable (seconds)
    pub session_retention_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_concurrent_agents: 5,
            failure_tolerance: 0.4,
            priority: AgentCategory::RANKED.to_vec(),
            circuit_breaker_enabled: true,
            graceful_degradation_enabled: true,
            session_retention_secs: 300, // 5 minutes
        }
    }
}

/// Circuit breaker tunables, shared by every per-agent breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerConfig {
    /// Failures before the circuit opens
    pub failure_threshold: u32,
    /// Time before an open circuit admits a trial call (milliseconds)
    pub recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60000,
        }
    }
}

/// Agent health registry configuration.
#[derive(Debug, Clone, Serialize)]
pub struct HealthConfig {
    /// Entries without a heartbeat for this long are forced offline (seconds)
    pub heartbeat_timeout_secs: u64,
    /// Number of recent errors kept per agent
    pub max_errors: usize,
    /// EMA smoothing factor for response time
    pub response_time_alpha: f64,
    /// EMA smoothing factor for success rate
    pub success_rate_alpha: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 60,
            max_errors: 10,
            response_time_alpha: 0.2,
            success_rate_alpha: 0.1,
        }
    }
}

/// Deduplication thresholds and source weighting.
#[derive(Debug, Clone, Serialize)]
pub struct DeduplicationConfig {
    pub title_similarity_threshold: f64,
    pub content_similarity_threshold: f64,
    pub url_normalization: bool,
    /// Pick the highest-quality result as group primary instead of the first seen
    pub preserve_best_quality: bool,
    /// Per-agent weight; unknown agents fall back to their category weight
    pub agent_source_weighting: HashMap<String, f64>,
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            title_similarity_threshold: 0.85,
            content_similarity_threshold: 0.75,
            url_normalization: true,
            preserve_best_quality: true,
            agent_source_weighting: AgentCategory::RANKED
                .iter()
                .map(|c| (c.as_str().to_string(), c.default_weight()))
                .collect(),
        }
    }
}

/// Text-generation API configuration
#[derive(Debug, Clone, Serialize)]
pub struct LlmConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com".to_string(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

/// HTTP request configuration
#[derive(Debug, Clone, Serialize)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

/// Synthesis configuration
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisConfig {
    pub temperature: f64,
    /// Maximum search results included in the prompt
    pub max_prompt_results: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_prompt_results: 20,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/research.db"),
            max_connections: 5,
        }
    }
}

/// A named search endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentEndpoint {
    pub name: String,
    pub url: String,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

/// Parse `name=url` pairs separated by commas.
pub fn parse_agent_endpoints(raw: &str) -> Result<Vec<AgentEndpoint>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, url)) if !name.trim().is_empty() && !url.trim().is_empty() => {
                Ok(AgentEndpoint {
                    name: name.trim().to_string(),
                    url: url.trim().to_string(),
                })
            }
            _ => Err(AppError::Config {
                message: format!("Invalid SEARCH_AGENTS entry '{}', expected name=url", pair),
            }),
        })
        .collect()
}

/// Parse a comma separated category list.
pub fn parse_priority(raw: &str) -> Result<Vec<AgentCategory>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|message| AppError::Config { message }))
        .collect()
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let defaults = OrchestratorConfig::default();
        let orchestrator = OrchestratorConfig {
            timeout_ms: env_or("ORCHESTRATOR_TIMEOUT_MS", defaults.timeout_ms),
            max_concurrent_agents: env_or(
                "ORCHESTRATOR_MAX_CONCURRENT_AGENTS",
                defaults.max_concurrent_agents,
            ),
            failure_tolerance: env_or("ORCHESTRATOR_FAILURE_TOLERANCE", defaults.failure_tolerance),
            priority: match env::var("ORCHESTRATOR_PRIORITY") {
                Ok(raw) => parse_priority(&raw)?,
                Err(_) => defaults.priority,
            },
            circuit_breaker_enabled: env_flag("ORCHESTRATOR_CIRCUIT_BREAKER", true),
            graceful_degradation_enabled: env_flag("ORCHESTRATOR_GRACEFUL_DEGRADATION", true),
            session_retention_secs: env_or(
                "ORCHESTRATOR_SESSION_RETENTION_SECS",
                defaults.session_retention_secs,
            ),
        };

        if !(0.0..=1.0).contains(&orchestrator.failure_tolerance) {
            return Err(AppError::Config {
                message: format!(
                    "ORCHESTRATOR_FAILURE_TOLERANCE must be within 0.0..=1.0, got {}",
                    orchestrator.failure_tolerance
                ),
            });
        }
        if orchestrator.max_concurrent_agents == 0 {
            return Err(AppError::Config {
                message: "ORCHESTRATOR_MAX_CONCURRENT_AGENTS must be at least 1".to_string(),
            });
        }

        let circuit_breaker = CircuitBreakerConfig {
            failure_threshold: env_or("CIRCUIT_BREAKER_FAILURE_THRESHOLD", 5),
            recovery_timeout_ms: env_or("CIRCUIT_BREAKER_RECOVERY_TIMEOUT_MS", 60000),
        };

        let health = HealthConfig {
            heartbeat_timeout_secs: env_or("HEALTH_HEARTBEAT_TIMEOUT_SECS", 60),
            max_errors: env_or("HEALTH_MAX_ERRORS", 10),
            ..HealthConfig::default()
        };

        let dedup = DeduplicationConfig {
            title_similarity_threshold: env_or("DEDUP_TITLE_THRESHOLD", 0.85),
            content_similarity_threshold: env_or("DEDUP_CONTENT_THRESHOLD", 0.75),
            url_normalization: env_flag("DEDUP_NORMALIZE_URLS", true),
            preserve_best_quality: env_flag("DEDUP_PRESERVE_BEST_QUALITY", true),
            ..DeduplicationConfig::default()
        };

        let llm = LlmConfig {
            api_key: env::var("LLM_API_KEY").ok().filter(|k| !k.is_empty()),
            base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
            model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        };

        let request = RequestConfig {
            timeout_ms: env_or("REQUEST_TIMEOUT_MS", 30000),
            max_retries: env_or("MAX_RETRIES", 3),
            retry_delay_ms: env_or("RETRY_DELAY_MS", 1000),
        };

        let synthesis = SynthesisConfig {
            temperature: env_or("SYNTHESIS_TEMPERATURE", 0.3),
            ..SynthesisConfig::default()
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/research.db".to_string()),
            ),
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 5),
        };

        let agents = match env::var("SEARCH_AGENTS") {
            Ok(raw) => parse_agent_endpoints(&raw)?,
            Err(_) => Vec::new(),
        };

        Ok(Config {
            logging,
            orchestrator,
            circuit_breaker,
            health,
            dedup,
            llm,
            request,
            synthesis,
            database,
            agents,
        })
    }
}
