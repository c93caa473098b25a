//! # Research Orchestrator
//!
//! Fans a research topic out to a set of independent search agents, runs them
//! concurrently under a shared concurrency limit, and turns whatever comes
//! back into one answer.
//!
//! ## Features
//!
//! - **Orchestration**: global and per-agent timeouts, failure tolerance, progress events
//! - **Circuit Breaking**: one breaker per agent, fast-failing unhealthy agents
//! - **Graceful Degradation**: cached, simplified and default fallback results
//! - **Health Tracking**: smoothed response time and success rate per agent
//! - **Deduplication**: weighted title, content, URL and relevance similarity
//! - **Attribution**: per-agent and per-engine contribution, coverage and redundancy
//! - **Synthesis**: LLM-backed summary with bias and factuality heuristics
//!
//! ## Architecture
//!
//! ```text
//! topic → Orchestrator → agents (HTTP) → Dedup → Attribution → Synthesis (LLM)
//!              ↓
//!        SQLite (sessions, cached results)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use research_orchestrator::{AppState, Config};
//! use research_orchestrator::orchestrator::OrchestrationOptions;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let options = OrchestrationOptions::from(&config.orchestrator);
//!     let state = AppState::new(config).await?;
//!     let report = state.research("neural networks", None, options, true).await?;
//!     println!("{}", serde_json::to_string_pretty(&report)?);
//!     Ok(())
//! }
//! ```

/// Research agent trait, result types and the HTTP search agent.
pub mod agents;
/// Composition root running the full pipeline.
pub mod app;
/// Source attribution analysis.
pub mod attribution;
/// Per-agent circuit breakers.
pub mod circuit_breaker;
/// Configuration management.
pub mod config;
/// Result deduplication.
pub mod dedup;
/// Fallback strategies for failed agents.
pub mod degradation;
/// Error types and result aliases for the application.
pub mod error;
/// Agent health registry.
pub mod health;
/// Shared concurrency limiter.
pub mod limiter;
/// Chat-completions client used for synthesis.
pub mod llm;
/// Session orchestration, progress events and the session query API.
pub mod orchestrator;
/// System prompts for synthesis.
pub mod prompts;
/// Text and URL similarity measures.
pub mod similarity;
/// SQLite storage for sessions and cached results.
pub mod storage;
/// Content synthesis.
pub mod synthesis;

pub use app::{AppState, ResearchReport};
pub use config::Config;
pub use error::{AppError, AppResult};
