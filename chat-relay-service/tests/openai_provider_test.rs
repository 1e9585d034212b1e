//! Drives the OpenAI provider against a local server that speaks the
//! chat completions streaming protocol.

use axum::{
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chat_relay_service::config::OpenAiConfig;
use chat_relay_service::models::CompletionMessage;
use chat_relay_service::services::providers::openai::OpenAiProvider;
use chat_relay_service::services::providers::{CompletionProvider, ProviderError, StreamChunk};
use futures::StreamExt;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

const COMPLETION_BODY: &str = concat!(
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
    "data: [DONE]\n\n",
);

#[derive(Clone, Default)]
struct Captured {
    body: Arc<Mutex<Option<Value>>>,
    authorization: Arc<Mutex<Option<String>>>,
}

/// Serve `router` on a random local port and return its `/v1` base URL.
async fn spawn_upstream(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind upstream listener");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    format!("http://127.0.0.1:{}/v1", port)
}

fn provider(base_url: String) -> OpenAiProvider {
    OpenAiProvider::new(
        OpenAiConfig {
            api_key: "sk-test".to_string(),
            base_url,
            model: "gpt-3.5-turbo".to_string(),
        },
        Duration::from_secs(5),
    )
    .expect("Failed to build provider")
}

fn history() -> Vec<CompletionMessage> {
    vec![
        CompletionMessage::new("user", "Hi"),
        CompletionMessage::new("ai", "Hello, how can I help?"),
        CompletionMessage::new("user", "Say hello"),
    ]
}

#[tokio::test]
async fn streams_deltas_from_event_stream() {
    let captured = Captured::default();
    let handler_captured = captured.clone();

    let router = Router::new().route(
        "/v1/chat/completions",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let captured = handler_captured.clone();
            async move {
                *captured.body.lock().unwrap() = Some(body);
                *captured.authorization.lock().unwrap() = headers
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                ([(header::CONTENT_TYPE, "text/event-stream")], COMPLETION_BODY)
            }
        }),
    );
    let base_url = spawn_upstream(router).await;

    let stream = provider(base_url)
        .complete_stream(&history())
        .await
        .expect("Failed to open stream");
    let chunks: Vec<StreamChunk> = stream.map(|c| c.unwrap()).collect().await;

    let text: String = chunks
        .iter()
        .filter_map(|c| match c {
            StreamChunk::Delta { text, .. } => Some(text.as_str()),
            StreamChunk::Complete { .. } => None,
        })
        .collect();
    assert_eq!(text, "Hello");
    assert_eq!(
        chunks.last(),
        Some(&StreamChunk::Complete {
            finish_reason: "stop".to_string()
        })
    );

    let body = captured.body.lock().unwrap().clone().unwrap();
    assert_eq!(body["model"], "gpt-3.5-turbo");
    assert_eq!(body["stream"], true);
    assert_eq!(body["messages"][1]["role"], "assistant");
    assert_eq!(body["messages"][2]["content"], "Say hello");
    assert_eq!(
        captured.authorization.lock().unwrap().as_deref(),
        Some("Bearer sk-test")
    );
}

#[tokio::test]
async fn rejected_credentials_fail_before_streaming() {
    let router = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            (
                StatusCode::UNAUTHORIZED,
                r#"{"error":{"message":"Incorrect API key provided"}}"#,
            )
                .into_response()
        }),
    );
    let base_url = spawn_upstream(router).await;

    let result = provider(base_url).complete_stream(&history()).await;

    match result {
        Err(ProviderError::ApiError(message)) => assert!(message.contains("credentials")),
        Err(other) => panic!("unexpected error: {:?}", other),
        Ok(_) => panic!("expected the request to be rejected"),
    }
}

#[tokio::test]
async fn rate_limit_is_reported() {
    let router = Router::new().route(
        "/v1/chat/completions",
        post(|| async { StatusCode::TOO_MANY_REQUESTS }),
    );
    let base_url = spawn_upstream(router).await;

    let result = provider(base_url).complete_stream(&history()).await;

    assert!(matches!(result, Err(ProviderError::RateLimited)));
}

#[tokio::test]
async fn truncated_stream_ends_with_error() {
    let router = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            (
                [(header::CONTENT_TYPE, "text/event-stream")],
                "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Par\"},\"finish_reason\":null}]}\n\n",
            )
        }),
    );
    let base_url = spawn_upstream(router).await;

    let items: Vec<Result<StreamChunk, ProviderError>> = provider(base_url)
        .complete_stream(&history())
        .await
        .expect("Failed to open stream")
        .collect()
        .await;

    assert_eq!(items.len(), 2);
    assert!(matches!(
        &items[0],
        Ok(StreamChunk::Delta { text, .. }) if text == "Par"
    ));
    assert!(matches!(items[1], Err(ProviderError::NetworkError(_))));
}

#[tokio::test]
async fn empty_history_is_rejected_locally() {
    let result = provider("http://127.0.0.1:9/v1".to_string())
        .complete_stream(&[])
        .await;

    assert!(matches!(result, Err(ProviderError::InvalidRequest(_))));
}
