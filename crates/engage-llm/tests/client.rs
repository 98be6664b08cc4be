//! Integration tests for `OpenAiClient` using wiremock HTTP mocks.

use std::time::Duration;

use engage_core::FailureClass;
use engage_llm::{complete_structured, CompletionRequest, LanguageModel, LlmError, OpenAiClient};
use schemars::JsonSchema;
use serde::Deserialize;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Deserialize, JsonSchema)]
struct Score {
    item_id: i64,
    score: u8,
}

fn chat_reply(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [
            { "index": 0, "message": { "role": "assistant", "content": content, "refusal": null }, "finish_reason": "stop" }
        ]
    })
}

fn test_client(base_url: &str) -> OpenAiClient {
    OpenAiClient::with_base_url("sk-test", 5, base_url).expect("client construction should not fail")
}

#[tokio::test]
async fn structured_completion_round_trips() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-4o-mini",
            "response_format": { "type": "json_schema", "json_schema": { "name": "Score", "strict": true } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(r#"{"item_id": 7, "score": 82}"#)))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let score: Score = complete_structured(
        &client,
        CompletionRequest::new("gpt-4o-mini", "Score relevance.", "need a CRM"),
    )
    .await
    .expect("completion should succeed");

    assert_eq!(score.item_id, 7);
    assert_eq!(score.score, 82);
}

#[tokio::test]
async fn refusal_is_reported() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [ { "message": { "content": null, "refusal": "I can't help with that." } } ]
        })))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let err = client
        .complete(CompletionRequest::new("m", "s", "u"))
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::Refused(_)));
    assert_eq!(err.classify(), FailureClass::Validation);
}

#[tokio::test]
async fn empty_choices_is_empty_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let err = client
        .complete(CompletionRequest::new("m", "s", "u"))
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::EmptyResponse));
}

#[tokio::test]
async fn rate_limit_carries_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "20")
                .set_body_string("{\"error\": {\"message\": \"Rate limit reached\"}}"),
        )
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let err = client
        .complete(CompletionRequest::new("m", "s", "u"))
        .await
        .unwrap_err();
    assert_eq!(
        err.classify(),
        FailureClass::RateLimited(Some(Duration::from_secs(20)))
    );
}

#[tokio::test]
async fn server_error_is_transient() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let err = client
        .complete(CompletionRequest::new("m", "s", "u"))
        .await
        .unwrap_err();
    assert!(err.classify().is_retriable());
}

#[tokio::test]
async fn embeddings_are_returned_in_input_order() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(body_partial_json(serde_json::json!({ "model": "text-embedding-3-small" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let vectors = client
        .embed(
            "text-embedding-3-small",
            &["first".to_string(), "second".to_string()],
        )
        .await
        .expect("embeddings should succeed");

    assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
}

#[tokio::test]
async fn empty_embedding_input_makes_no_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let client = test_client(&server.uri());
    let vectors = client.embed("m", &[]).await.expect("no-op");
    assert!(vectors.is_empty());
}
