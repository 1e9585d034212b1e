//! Stream relay.
//!
//! Forwards completion deltas to the caller as they arrive, accumulates them,
//! and hands the full reply to the persistence writer once the upstream ends.
//! The accumulator lives in the relay value owned by one invocation's task.

use crate::error::QueryError;
use crate::models::{QueryStage, SessionKey};
use crate::services::persistence::persist_reply;
use crate::services::providers::{CompletionStream, StreamChunk};
use crate::services::store::ChatStore;
use axum::response::sse::Event;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

/// Result of one relayed completion.
#[derive(Debug)]
pub struct RelayOutcome {
    /// Concatenation of every relayed delta, in receipt order.
    pub text: String,
    /// Number of non-empty deltas relayed.
    pub deltas: usize,
    /// Why the upstream ended early, if it did.
    pub interruption: Option<QueryError>,
    pub finish_reason: Option<String>,
    /// Whether the caller was still reading when the stream ended.
    pub caller_connected: bool,
    /// Whether the reply was written to the store.
    pub persisted: bool,
}

/// Per-invocation relay state.
pub struct StreamRelay {
    tx: mpsc::Sender<String>,
    deadline: Instant,
    accumulated: String,
    deltas: usize,
    last_index: Option<u64>,
    finish_reason: Option<String>,
    caller_connected: bool,
}

impl StreamRelay {
    pub fn new(tx: mpsc::Sender<String>, deadline: Instant) -> Self {
        Self {
            tx,
            deadline,
            accumulated: String::new(),
            deltas: 0,
            last_index: None,
            finish_reason: None,
            caller_connected: true,
        }
    }

    async fn accept(&mut self, chunk: StreamChunk) {
        match chunk {
            StreamChunk::Delta { index, text } => {
                if self.last_index.is_some_and(|last| index <= last) {
                    tracing::debug!(index, "Dropping duplicate completion chunk");
                    return;
                }
                self.last_index = Some(index);

                if text.is_empty() {
                    return;
                }

                self.accumulated.push_str(&text);
                self.deltas += 1;
                self.relay(text).await;
            }
            StreamChunk::Complete { finish_reason } => {
                self.finish_reason = Some(finish_reason);
            }
        }
    }

    async fn relay(&mut self, text: String) {
        if !self.caller_connected {
            return;
        }

        match timeout_at(self.deadline, self.tx.send(text)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                tracing::info!("Caller disconnected; finishing completion without relaying");
                self.caller_connected = false;
            }
            Err(_) => {
                tracing::warn!("Caller stopped reading before the deadline; no longer relaying");
                self.caller_connected = false;
            }
        }
    }

    /// Drain `upstream` until it ends, fails, or the deadline passes.
    pub async fn forward(&mut self, mut upstream: CompletionStream) -> Option<QueryError> {
        loop {
            match timeout_at(self.deadline, upstream.next()).await {
                Ok(Some(Ok(chunk))) => self.accept(chunk).await,
                Ok(Some(Err(e))) => return Some(QueryError::StreamInterrupted(e.to_string())),
                Ok(None) => return None,
                Err(_) => {
                    return Some(QueryError::StreamInterrupted(
                        "Completion deadline exceeded".to_string(),
                    ))
                }
            }
        }
    }

    fn finish(self, interruption: Option<QueryError>, persisted: bool) -> RelayOutcome {
        RelayOutcome {
            text: self.accumulated,
            deltas: self.deltas,
            interruption,
            finish_reason: self.finish_reason,
            caller_connected: self.caller_connected,
            persisted,
        }
    }
}

/// Relay `upstream` to `tx`, then persist the accumulated reply.
///
/// The sender is dropped only after the write attempt, so the caller's
/// stream closes once the reply is durable (or its failure is logged).
pub async fn relay_completion(
    store: Arc<dyn ChatStore>,
    session_id: SessionKey,
    upstream: CompletionStream,
    tx: mpsc::Sender<String>,
    deadline: Instant,
) -> RelayOutcome {
    let mut relay = StreamRelay::new(tx, deadline);
    let interruption = relay.forward(upstream).await;

    if let Some(err) = &interruption {
        tracing::warn!(
            session_id = %session_id,
            stage = %QueryStage::Streaming,
            deltas = relay.deltas,
            error = %err,
            "Completion stream interrupted"
        );
    }

    let persisted = if relay.deltas > 0 {
        tracing::debug!(session_id = %session_id, stage = %QueryStage::Persisting, "Persisting reply");
        persist_reply(store.as_ref(), &session_id, relay.accumulated.clone())
            .await
            .is_ok()
    } else {
        tracing::info!(session_id = %session_id, "Completion produced no text; nothing to persist");
        false
    };

    let outcome = relay.finish(interruption, persisted);

    tracing::info!(
        session_id = %session_id,
        stage = %QueryStage::Done,
        deltas = outcome.deltas,
        reply_len = outcome.text.len(),
        finish_reason = outcome.finish_reason.as_deref().unwrap_or("none"),
        caller_connected = outcome.caller_connected,
        persisted = outcome.persisted,
        "Query completed"
    );

    outcome
}

/// Server-sent event carrying one delta.
///
/// Line breaks inside the delta become separate `data:` lines, which SSE
/// clients join back with `\n`.
pub fn relay_frame(delta: &str) -> Event {
    Event::default().data(delta.replace("\r\n", "\n").replace('\r', "\n"))
}
