//! Integration tests for the HTTP search agent and the LLM client
//!
//! Tests HTTP client behavior using wiremock for request/response mocking.

use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use research_orchestrator::agents::{AgentCategory, HttpSearchAgent, ResearchAgent, ResultStatus};
use research_orchestrator::config::{LlmConfig, RequestConfig};
use research_orchestrator::error::LlmError;
use research_orchestrator::llm::{ChatCompletionRequest, ChatMessage, LlmClient};
use research_orchestrator::synthesis::TextGenerator;

fn request_config(max_retries: u32) -> RequestConfig {
    RequestConfig {
        timeout_ms: 5000,
        max_retries,
        retry_delay_ms: 10,
    }
}

fn create_llm_client(base_url: &str, max_retries: u32) -> LlmClient {
    let config = LlmConfig {
        api_key: Some("test-api-key".to_string()),
        base_url: base_url.to_string(),
        model: "test-model".to_string(),
    };
    LlmClient::new(&config, request_config(max_retries)).expect("Failed to create client")
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
    })
}

#[cfg(test)]
mod search_agent_tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_search() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_partial_json(json!({ "query": "rust lifetimes" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {
                        "title": "Lifetimes explained",
                        "url": "https://doc.rust-lang.org/book/ch10-03",
                        "snippet": "Every reference has a lifetime.",
                        "score": 0.9,
                        "type": "documentation"
                    },
                    {
                        "title": "Lifetime elision",
                        "url": "https://example.com/elision"
                    }
                ],
                "summary": "Lifetimes bound references.",
                "subtopics": ["elision", "variance"]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let agent = HttpSearchAgent::new(
            "arxiv",
            format!("{}/search", mock_server.uri()),
            &request_config(0),
        )
        .unwrap();
        assert_eq!(agent.category(), AgentCategory::Academic);

        let result = agent.execute("rust lifetimes", None).await.unwrap();

        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(result.agent, "arxiv");
        assert_eq!(result.results.len(), 2);
        assert_eq!(result.results[0].relevance_score, 0.9);
        assert_eq!(result.results[0].metadata_str("type"), Some("documentation"));
        assert_eq!(result.results[1].relevance_score, 0.5);
        assert_eq!(result.results[1].source, "arxiv");
        assert_eq!(result.summary.as_deref(), Some("Lifetimes bound references."));
        assert_eq!(result.subtopics, vec!["elision", "variance"]);
    }

    #[tokio::test]
    async fn test_server_error_becomes_error_result() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&mock_server)
            .await;

        let agent = HttpSearchAgent::new(
            "web",
            format!("{}/search", mock_server.uri()),
            &request_config(0),
        )
        .unwrap();

        let result = agent.execute("anything", None).await.unwrap();
        assert_eq!(result.status, ResultStatus::Error);
        assert!(result.results.is_empty());
        let error = result.error.unwrap();
        assert!(error.contains("503"));
        assert!(error.contains("overloaded"));
    }

    #[tokio::test]
    async fn test_malformed_body_becomes_error_result() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&mock_server)
            .await;

        let agent = HttpSearchAgent::new("web", mock_server.uri(), &request_config(0)).unwrap();

        let result = agent.execute("anything", None).await.unwrap();
        assert_eq!(result.status, ResultStatus::Error);
        assert!(result.error.unwrap().contains("invalid response"));
    }
}

#[cfg(test)]
mod llm_client_tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_completion() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer test-api-key"))
            .and(body_partial_json(json!({ "model": "test-model", "temperature": 0.5 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("{\"summary\": \"ok\"}")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_llm_client(&mock_server.uri(), 0);
        let text = client.generate("system", "user", 0.5).await.unwrap();
        assert_eq!(text, "{\"summary\": \"ok\"}");
    }

    #[tokio::test]
    async fn test_complete_returns_usage() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("hello")))
            .mount(&mock_server)
            .await;

        let client = create_llm_client(&mock_server.uri(), 0);
        let response = client
            .complete(ChatCompletionRequest::new(
                "test-model",
                vec![ChatMessage::user("hi")],
            ))
            .await
            .unwrap();

        assert_eq!(response.content(), Some("hello"));
        assert_eq!(response.usage.unwrap().total_tokens, 15);
    }

    #[tokio::test]
    async fn test_api_error_without_retries() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_llm_client(&mock_server.uri(), 0);
        let err = client.generate("system", "user", 0.3).await.unwrap_err();

        match err {
            LlmError::Unavailable { message, retries } => {
                assert!(message.contains("500"));
                assert_eq!(retries, 1);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("second try")))
            .mount(&mock_server)
            .await;

        let client = create_llm_client(&mock_server.uri(), 2);
        let text = client.generate("system", "user", 0.3).await.unwrap();
        assert_eq!(text, "second try");
    }

    #[tokio::test]
    async fn test_empty_choices_is_invalid() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&mock_server)
            .await;

        let client = create_llm_client(&mock_server.uri(), 0);
        let err = client.generate("system", "user", 0.3).await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse { .. }));
    }
}
