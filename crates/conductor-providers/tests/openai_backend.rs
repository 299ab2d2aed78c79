#![allow(clippy::unwrap_used, clippy::expect_used)]
//! HTTP-level tests for the OpenAI-compatible backend against a wiremock server.

use conductor_core::{ConductorError, RoutingProfile};
use conductor_providers::backends::build_provider;
use conductor_providers::{
    CompletionRequest, ProviderKind, ProviderRouter, ProviderSettings, RetryPolicy,
    RoutingConfiguration, StreamEvent,
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(server: &MockServer) -> ProviderSettings {
    ProviderSettings::new(ProviderKind::Ollama)
        .with_base_url(server.uri())
        .with_default_model("llama3.1:8b")
}

#[tokio::test]
async fn test_complete_parses_content_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(serde_json::json!({"model": "llama3.1:8b"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "llama3.1:8b",
            "choices": [{"message": {"role": "assistant", "content": "Three patterns found."}}],
            "usage": {"prompt_tokens": 21, "completion_tokens": 4}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = build_provider("ollama", &settings(&server), reqwest::Client::new());
    let resp = provider
        .complete(&CompletionRequest::new("llama3.1:8b", "Find patterns"))
        .await
        .unwrap();

    assert_eq!(resp.content, "Three patterns found.");
    assert_eq!(resp.input_tokens, 21);
    assert_eq!(resp.output_tokens, 4);
}

#[tokio::test]
async fn test_server_error_is_provider_error_with_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let provider = build_provider("ollama", &settings(&server), reqwest::Client::new());
    let err = provider
        .complete(&CompletionRequest::new("llama3.1:8b", "x"))
        .await
        .unwrap_err();

    assert!(matches!(err, ConductorError::Provider(_)));
    let msg = err.to_string();
    assert!(msg.contains("503"), "got: {msg}");
    assert!(msg.contains("overloaded"), "got: {msg}");
}

#[tokio::test]
async fn test_stream_emits_deltas_and_usage() {
    let server = MockServer::start().await;
    let sse = concat!(
        "data: {\"model\":\"llama3.1:8b\",\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        ": keepalive\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":7,\"completion_tokens\":2}}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(serde_json::json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = build_provider("ollama", &settings(&server), reqwest::Client::new());
    let (mut rx, handle) = provider
        .stream(&CompletionRequest::new("llama3.1:8b", "greet"))
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    let resp = handle.await.unwrap().unwrap();

    assert_eq!(
        events[..2],
        [
            StreamEvent::TextDelta { text: "Hel".into() },
            StreamEvent::TextDelta { text: "lo".into() },
        ]
    );
    assert!(events.contains(&StreamEvent::Usage {
        input_tokens: 7,
        output_tokens: 2
    }));
    assert_eq!(events.last(), Some(&StreamEvent::Done));
    assert_eq!(resp.content, "Hello");
    assert_eq!(resp.model_used, "llama3.1:8b");
    assert_eq!(resp.output_tokens, 2);
}

#[tokio::test]
async fn test_router_falls_back_between_http_providers() {
    let failing = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&failing)
        .await;

    let healthy = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": "from backup"}}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2}
        })))
        .mount(&healthy)
        .await;

    let config = RoutingConfiguration::default()
        .with_provider(
            "remote",
            ProviderSettings::new(ProviderKind::OpenAi)
                .with_base_url(failing.uri())
                .with_default_model("gpt-4o-mini"),
        )
        .with_provider(
            "local",
            ProviderSettings::new(ProviderKind::Ollama)
                .with_base_url(healthy.uri())
                .with_default_model("llama3.1:8b"),
        )
        .with_fallback_chain(["remote", "local"])
        .with_retry(RetryPolicy::none());
    let router = ProviderRouter::from_config(config).unwrap();

    let sel = router.select(RoutingProfile::Premium).unwrap();
    assert_eq!(sel.provider, "remote");

    let out = router
        .complete(
            &sel,
            &CompletionRequest::new("ignored", "hi"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(out.selection.provider, "local");
    assert_eq!(out.selection.model_id, "llama3.1:8b");
    assert!(out.selection.is_fallback);
    assert_eq!(out.response.content, "from backup");
    assert_eq!(out.cost, 0.0);
}
