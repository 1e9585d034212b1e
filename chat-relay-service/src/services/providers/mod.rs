//! Completion provider abstractions and implementations.
//!
//! This module provides a trait-based abstraction for streaming chat
//! completion backends, so the relay can run against OpenAI or a scripted mock.

pub mod mock;
pub mod openai;

use crate::models::CompletionMessage;
use async_trait::async_trait;
use std::pin::Pin;
use thiserror::Error;
use tokio_stream::Stream;

/// Error type for provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Network error: {0}")]
    NetworkError(String),
}

/// Unit of a streaming completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// Incremental text. `index` is the position of the event in the upstream
    /// stream; `text` is empty for role-only or control events.
    Delta { index: u64, text: String },

    /// The model finished generating.
    Complete { finish_reason: String },
}

/// Type alias for provider streams.
pub type CompletionStream =
    Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// Trait for streaming chat completion providers (e.g., OpenAI).
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Open a streaming completion for the ordered conversation `messages`.
    ///
    /// Connection and authentication failures are returned here, before any
    /// chunk is produced.
    async fn complete_stream(
        &self,
        messages: &[CompletionMessage],
    ) -> Result<CompletionStream, ProviderError>;

    /// Health check.
    async fn health_check(&self) -> Result<(), ProviderError>;
}
