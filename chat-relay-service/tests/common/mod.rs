//! Shared fixtures: a router wired to the in-memory store and a scripted provider.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request},
    Router,
};
use chat_relay_service::config::{
    ChatRelayConfig, CorsConfig, MongoConfig, OpenAiConfig, RelayConfig,
};
use chat_relay_service::models::{ChatDetail, SessionKey};
use chat_relay_service::services::providers::mock::MockProvider;
use chat_relay_service::services::InMemoryChatStore;
use chat_relay_service::startup::{build_router, AppState};
use chrono::{Duration, Utc};
use std::sync::Arc;

pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemoryChatStore>,
    pub provider: Arc<MockProvider>,
}

pub fn test_config(completion_timeout_secs: u64) -> ChatRelayConfig {
    ChatRelayConfig {
        common: service_core::config::Config {
            port: 0,
            log_level: "debug".to_string(),
        },
        mongodb: MongoConfig {
            uri: "mongodb://localhost:27017".to_string(),
            database: "chat_relay_test_db".to_string(),
        },
        openai: OpenAiConfig {
            api_key: "test-api-key".to_string(),
            base_url: "http://localhost:0/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
        },
        relay: RelayConfig {
            completion_timeout_secs,
            history_limit: 1000,
        },
        cors: CorsConfig {
            allowed_origins: vec!["*".to_string()],
        },
    }
}

pub fn spawn_app(provider: MockProvider) -> TestApp {
    spawn_app_with_config(provider, test_config(5))
}

pub fn spawn_app_with_config(provider: MockProvider, config: ChatRelayConfig) -> TestApp {
    let store = Arc::new(InMemoryChatStore::new());
    let provider = Arc::new(provider);

    let state = AppState {
        config,
        store: store.clone(),
        provider: provider.clone(),
    };

    TestApp {
        router: build_router(state),
        store,
        provider,
    }
}

/// Store a turn `age_secs` in the past.
pub async fn seed_turn(
    store: &InMemoryChatStore,
    session_id: &SessionKey,
    sender: &str,
    message: &str,
    age_secs: i64,
) {
    store
        .insert_detail(ChatDetail {
            id: None,
            session_id: session_id.clone(),
            sender: sender.to_string(),
            message: message.to_string(),
            timestamp: Utc::now() - Duration::seconds(age_secs),
        })
        .await;
}

pub fn query_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/query")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
