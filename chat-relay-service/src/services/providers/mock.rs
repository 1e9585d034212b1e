//! Scripted provider implementation for testing.

use super::{CompletionProvider, CompletionStream, ProviderError, StreamChunk};
use crate::models::CompletionMessage;
use async_trait::async_trait;
use std::sync::Mutex;

/// One scripted upstream event.
#[derive(Debug, Clone)]
pub enum MockStep {
    /// A delta carrying text.
    Text(String),
    /// A delta with no text (role-only or control chunk).
    Empty,
    /// Re-emit the previous delta with the same index.
    Repeat,
    /// Fail the stream.
    Fail(String),
    /// Finish marker.
    Finish,
    /// Never yield anything else.
    Stall,
}

/// Mock completion provider for testing.
pub struct MockProvider {
    steps: Vec<MockStep>,
    open_error: Option<String>,
    requests: Mutex<Vec<Vec<CompletionMessage>>>,
}

impl MockProvider {
    pub fn new(steps: Vec<MockStep>) -> Self {
        Self {
            steps,
            open_error: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Stream the given deltas, then finish.
    pub fn with_deltas<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut steps: Vec<MockStep> = deltas.into_iter().map(|d| MockStep::Text(d.into())).collect();
        steps.push(MockStep::Finish);
        Self::new(steps)
    }

    /// Fail when the stream is opened, before any chunk.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            open_error: Some(message.into()),
            ..Self::new(Vec::new())
        }
    }

    /// Message lists received so far, one entry per call.
    pub fn requests(&self) -> Vec<Vec<CompletionMessage>> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn script(&self) -> Vec<Result<StreamChunk, ProviderError>> {
        let mut items = Vec::new();
        let mut index = 0u64;
        let mut last: Option<StreamChunk> = None;

        for step in &self.steps {
            match step {
                MockStep::Text(text) => {
                    let chunk = StreamChunk::Delta {
                        index,
                        text: text.clone(),
                    };
                    index += 1;
                    last = Some(chunk.clone());
                    items.push(Ok(chunk));
                }
                MockStep::Empty => {
                    items.push(Ok(StreamChunk::Delta {
                        index,
                        text: String::new(),
                    }));
                    index += 1;
                }
                MockStep::Repeat => {
                    if let Some(chunk) = &last {
                        items.push(Ok(chunk.clone()));
                    }
                }
                MockStep::Fail(message) => {
                    items.push(Err(ProviderError::NetworkError(message.clone())));
                }
                MockStep::Finish => items.push(Ok(StreamChunk::Complete {
                    finish_reason: "stop".to_string(),
                })),
                MockStep::Stall => break,
            }
        }
        items
    }

    fn stalls(&self) -> bool {
        self.steps.iter().any(|s| matches!(s, MockStep::Stall))
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn complete_stream(
        &self,
        messages: &[CompletionMessage],
    ) -> Result<CompletionStream, ProviderError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }

        if let Some(message) = &self.open_error {
            return Err(ProviderError::NetworkError(message.clone()));
        }

        let items = tokio_stream::iter(self.script());
        if self.stalls() {
            use tokio_stream::StreamExt;
            Ok(Box::pin(items.chain(futures::stream::pending())) as CompletionStream)
        } else {
            Ok(Box::pin(items) as CompletionStream)
        }
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        match &self.open_error {
            Some(message) => Err(ProviderError::NotConfigured(message.clone())),
            None => Ok(()),
        }
    }
}
