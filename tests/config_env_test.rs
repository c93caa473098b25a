//! Config environment variable tests
//!
//! These tests verify that Config::from_env() correctly reads and applies
//! environment variable overrides and rejects invalid values.
//!
//! Tests use #[serial] to prevent race conditions with shared env vars.

use research_orchestrator::agents::AgentCategory;
use research_orchestrator::config::{Config, LogFormat};
use research_orchestrator::AppError;
use serial_test::serial;
use std::env;

/// Run `f` with `vars` set, removing them afterwards.
fn with_vars<T>(vars: &[(&str, &str)], f: impl FnOnce() -> T) -> T {
    for (key, value) in vars {
        env::set_var(key, value);
    }
    let result = f();
    for (key, _) in vars {
        env::remove_var(key);
    }
    result
}

#[test]
#[serial]
fn test_config_from_env_defaults() {
    let config = Config::from_env().unwrap();
    assert_eq!(config.orchestrator.failure_tolerance, 0.4);
    assert!(config.orchestrator.circuit_breaker_enabled);
    assert!(config.orchestrator.graceful_degradation_enabled);
    assert_eq!(config.circuit_breaker.failure_threshold, 5);
    assert_eq!(config.synthesis.temperature, 0.3);
}

#[test]
#[serial]
fn test_config_from_env_orchestrator_overrides() {
    let config = with_vars(
        &[
            ("ORCHESTRATOR_TIMEOUT_MS", "5000"),
            ("ORCHESTRATOR_MAX_CONCURRENT_AGENTS", "2"),
            ("ORCHESTRATOR_FAILURE_TOLERANCE", "0.25"),
            ("ORCHESTRATOR_PRIORITY", "video,academic"),
            ("ORCHESTRATOR_GRACEFUL_DEGRADATION", "false"),
        ],
        Config::from_env,
    )
    .unwrap();

    assert_eq!(config.orchestrator.timeout_ms, 5000);
    assert_eq!(config.orchestrator.max_concurrent_agents, 2);
    assert_eq!(config.orchestrator.failure_tolerance, 0.25);
    assert_eq!(
        config.orchestrator.priority,
        vec![AgentCategory::Video, AgentCategory::Academic]
    );
    assert!(!config.orchestrator.graceful_degradation_enabled);
}

#[test]
#[serial]
fn test_config_rejects_out_of_range_tolerance() {
    let result = with_vars(&[("ORCHESTRATOR_FAILURE_TOLERANCE", "1.5")], Config::from_env);
    assert!(matches!(result, Err(AppError::Config { .. })));
}

#[test]
#[serial]
fn test_config_rejects_zero_concurrency() {
    let result = with_vars(&[("ORCHESTRATOR_MAX_CONCURRENT_AGENTS", "0")], Config::from_env);
    assert!(matches!(result, Err(AppError::Config { .. })));
}

#[test]
#[serial]
fn test_config_rejects_unknown_priority() {
    let result = with_vars(&[("ORCHESTRATOR_PRIORITY", "academic,astrology")], Config::from_env);
    assert!(matches!(result, Err(AppError::Config { .. })));
}

#[test]
#[serial]
fn test_config_from_env_search_agents() {
    let config = with_vars(
        &[(
            "SEARCH_AGENTS",
            "arxiv=http://localhost:9000/search,web=http://localhost:9001/search",
        )],
        Config::from_env,
    )
    .unwrap();

    assert_eq!(config.agents.len(), 2);
    assert_eq!(config.agents[0].name, "arxiv");
    assert_eq!(config.agents[1].url, "http://localhost:9001/search");

    let result = with_vars(&[("SEARCH_AGENTS", "no-equals-sign")], Config::from_env);
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_config_from_env_custom_database() {
    let config = with_vars(
        &[
            ("DATABASE_PATH", "/custom/path.db"),
            ("DATABASE_MAX_CONNECTIONS", "10"),
        ],
        Config::from_env,
    )
    .unwrap();

    assert_eq!(config.database.path.to_str().unwrap(), "/custom/path.db");
    assert_eq!(config.database.max_connections, 10);
}

#[test]
#[serial]
fn test_config_from_env_json_log_format() {
    let config = with_vars(&[("LOG_FORMAT", "json")], Config::from_env).unwrap();
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[test]
#[serial]
fn test_config_invalid_number_uses_default() {
    let config = with_vars(
        &[
            ("CIRCUIT_BREAKER_FAILURE_THRESHOLD", "not-a-number"),
            ("DEDUP_TITLE_THRESHOLD", "high"),
        ],
        Config::from_env,
    )
    .unwrap();

    assert_eq!(config.circuit_breaker.failure_threshold, 5);
    assert_eq!(config.dedup.title_similarity_threshold, 0.85);
}

#[test]
#[serial]
fn test_config_llm_key_is_optional_and_hidden() {
    let config = with_vars(
        &[("LLM_API_KEY", "secret-key"), ("LLM_MODEL", "small-model")],
        Config::from_env,
    )
    .unwrap();

    assert_eq!(config.llm.api_key.as_deref(), Some("secret-key"));
    assert_eq!(config.llm.model, "small-model");

    let serialized = serde_json::to_string(&config).unwrap();
    assert!(!serialized.contains("secret-key"));
}
