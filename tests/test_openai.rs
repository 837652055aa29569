//! Integration tests for the OpenAI provider
//!
//! Request shape, response parsing, error mapping and retry behavior against
//! a wiremock chat-completions endpoint.

use std::time::Duration;
use subreply::llm::provider::{CompletionRequest, FinishReason, LlmError, LlmProvider, Message};
use subreply::llm::providers::openai::{OpenAiConfig, OpenAiProvider};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(base_url: &str) -> OpenAiProvider {
    OpenAiProvider::new(OpenAiConfig {
        api_key: "test-api-key".to_string(),
        base_url: base_url.to_string(),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn request() -> CompletionRequest {
    CompletionRequest {
        messages: vec![
            Message::system("Be honest and brief."),
            Message::user("Post title: Which linter?"),
        ],
        model: "gpt-4o-mini".to_string(),
        max_tokens: Some(150),
        temperature: Some(0.7),
    }
}

fn completion(content: &str, finish_reason: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "created": 1677652288,
        "model": "gpt-4o-mini",
        "choices": [
            {
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": finish_reason
            }
        ],
        "usage": {"prompt_tokens": 40, "completion_tokens": 12, "total_tokens": 52}
    })
}

#[tokio::test]
async fn test_openai_completion_sends_messages_and_parses_reply() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-api-key"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-4o-mini",
            "max_tokens": 150,
            "messages": [
                {"role": "system", "content": "Be honest and brief."},
                {"role": "user", "content": "Post title: Which linter?"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Clippy covers most of it.", "stop")))
        .expect(1)
        .mount(&server)
        .await;

    let response = provider(&server.uri()).complete(request()).await.unwrap();

    assert_eq!(response.content.as_deref(), Some("Clippy covers most of it."));
    assert_eq!(response.finish_reason, FinishReason::Stop);
    assert_eq!(response.usage.total_tokens, 52);
}

#[tokio::test]
async fn test_openai_length_finish_reason_is_reported() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Clippy is", "length")))
        .mount(&server)
        .await;

    let response = provider(&server.uri()).complete(request()).await.unwrap();
    assert_eq!(response.finish_reason, FinishReason::Length);
}

#[tokio::test]
async fn test_openai_unauthorized_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .expect(1)
        .mount(&server)
        .await;

    let err = provider(&server.uri()).complete(request()).await.unwrap_err();
    assert!(matches!(err, LlmError::AuthenticationFailed(_)));
}

#[tokio::test]
async fn test_openai_rate_limit_maps_to_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .expect(1)
        .mount(&server)
        .await;

    let err = provider(&server.uri()).complete(request()).await.unwrap_err();
    assert!(matches!(err, LlmError::RateLimitExceeded(_)));
}

#[tokio::test]
async fn test_openai_server_error_retries_then_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Recovered.", "stop")))
        .mount(&server)
        .await;

    let response = provider(&server.uri()).complete(request()).await.unwrap();
    assert_eq!(response.content.as_deref(), Some("Recovered."));
}

#[tokio::test]
async fn test_openai_health_check_uses_models_endpoint() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/models"))
        .and(header("authorization", "Bearer test-api-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
        .expect(1)
        .mount(&server)
        .await;

    provider(&server.uri()).health_check().await.unwrap();
}
