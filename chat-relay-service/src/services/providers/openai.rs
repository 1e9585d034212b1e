//! OpenAI chat completion provider.
//!
//! Streams completions from `{base_url}/chat/completions` and decodes the
//! server-sent event body into [`StreamChunk`]s.

use super::{CompletionProvider, CompletionStream, ProviderError, StreamChunk};
use crate::config::OpenAiConfig;
use crate::models::{CompletionMessage, AI_SENDER};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Terminal payload of an OpenAI event stream.
const DONE_MARKER: &str = "[DONE]";

/// OpenAI streaming completion provider.
pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiProvider {
    /// `timeout` bounds each request from send to the end of the body.
    pub fn new(config: OpenAiConfig, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path)
    }
}

/// Role name the API expects for a stored sender.
fn provider_role(sender: &str) -> &str {
    if sender == AI_SENDER {
        "assistant"
    } else {
        sender
    }
}

async fn status_to_error(response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let error_text = response.text().await.unwrap_or_default();

    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::ApiError(format!("OpenAI rejected credentials ({}): {}", status, error_text))
        }
        _ => ProviderError::ApiError(format!("OpenAI API error {}: {}", status, error_text)),
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete_stream(
        &self,
        messages: &[CompletionMessage],
    ) -> Result<CompletionStream, ProviderError> {
        if messages.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "At least one message is required".to_string(),
            ));
        }

        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: provider_role(&m.role),
                    content: &m.content,
                })
                .collect(),
            stream: true,
        };

        tracing::debug!(
            model = %self.config.model,
            message_count = messages.len(),
            "Starting streaming request to OpenAI"
        );

        let response = self
            .client
            .post(self.api_url("chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(status_to_error(response).await);
        }

        let (tx, rx) = mpsc::channel(32);

        // Decode the SSE body off the request path
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut decoder = SseDecoder::default();
            let mut index = 0u64;
            let mut finished = false;

            while let Some(chunk_result) = stream.next().await {
                let bytes = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::NetworkError(e.to_string()))).await;
                        return;
                    }
                };

                for data in decoder.push(&bytes) {
                    match decode_event(&data, index) {
                        EventOutcome::Chunks(chunks) => {
                            index += 1;
                            for chunk in chunks {
                                finished |= matches!(chunk, StreamChunk::Complete { .. });
                                if tx.send(Ok(chunk)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        EventOutcome::Done => return,
                        EventOutcome::Failed(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }

            if !finished {
                let _ = tx
                    .send(Err(ProviderError::NetworkError(
                        "Completion stream closed before it finished".to_string(),
                    )))
                    .await;
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)) as CompletionStream)
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.config.api_key.is_empty() {
            return Err(ProviderError::NotConfigured(
                "OpenAI API key not configured".to_string(),
            ));
        }

        let response = self
            .client
            .get(self.api_url("models"))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_to_error(response).await)
        }
    }
}

/// Incremental decoder for a `text/event-stream` body.
///
/// Bytes are buffered until a blank line closes an event, so multi-byte
/// characters split across network reads survive intact.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    /// Last byte fed was `\r`; a following `\n` belongs to the same line break.
    after_cr: bool,
}

impl SseDecoder {
    /// Feed raw bytes and return the `data` payload of every completed event.
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        for &byte in bytes {
            match byte {
                b'\n' if self.after_cr => self.after_cr = false,
                b'\r' => {
                    self.buffer.push(b'\n');
                    self.after_cr = true;
                }
                _ => {
                    self.buffer.push(byte);
                    self.after_cr = false;
                }
            }
        }

        let mut payloads = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let event: Vec<u8> = self.buffer.drain(..end + 2).collect();
            let text = String::from_utf8_lossy(&event[..end]);

            let data: Vec<&str> = text
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|value| value.strip_prefix(' ').unwrap_or(value))
                .collect();

            if !data.is_empty() {
                payloads.push(data.join("\n"));
            }
        }
        payloads
    }
}

#[derive(Debug)]
enum EventOutcome {
    Chunks(Vec<StreamChunk>),
    Done,
    Failed(ProviderError),
}

fn decode_event(data: &str, index: u64) -> EventOutcome {
    if data.trim() == DONE_MARKER {
        return EventOutcome::Done;
    }

    let event: ChatCompletionChunk = match serde_json::from_str(data) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping undecodable completion event");
            return EventOutcome::Chunks(Vec::new());
        }
    };

    if let Some(error) = event.error {
        return EventOutcome::Failed(ProviderError::ApiError(error.message));
    }

    let mut chunks = Vec::new();
    if let Some(choice) = event.choices.into_iter().next() {
        chunks.push(StreamChunk::Delta {
            index,
            text: choice.delta.content.unwrap_or_default(),
        });
        if let Some(finish_reason) = choice.finish_reason {
            chunks.push(StreamChunk::Complete { finish_reason });
        }
    }
    EventOutcome::Chunks(chunks)
}

// ============================================================================
// OpenAI API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}
