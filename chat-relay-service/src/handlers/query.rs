//! `POST /query`: stream a completion for a stored session.

use crate::error::QueryError;
use crate::models::{QueryRequest, QueryStage};
use crate::services::providers::{CompletionStream, ProviderError, StreamChunk};
use crate::services::relay::{relay_completion, relay_frame};
use crate::services::store::read_session;
use crate::startup::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    response::{sse::Sse, IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

/// Deltas buffered between the relay task and the response body.
const RELAY_BUFFER: usize = 32;

#[tracing::instrument(name = "query", skip_all, fields(session_id = tracing::field::Empty))]
pub async fn query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Response, QueryError> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::warn!(error = %rejection, "Rejected malformed query body");
        QueryError::InvalidArgument(rejection.body_text())
    })?;
    let raw_session_id = request.session_id.as_str();
    tracing::Span::current().record("session_id", raw_session_id);
    let deadline = Instant::now() + state.config.relay.completion_timeout();

    tracing::debug!(stage = %QueryStage::SessionLoading, "Loading session history");

    let history = read_session(
        state.store.as_ref(),
        raw_session_id,
        state.config.relay.history_limit,
    )
    .await
    .map_err(|e| log_failure(raw_session_id, QueryStage::SessionLoading, e))?;

    if history.messages.is_empty() {
        return Err(log_failure(
            raw_session_id,
            QueryStage::SessionLoading,
            QueryError::DependencyUnavailable(
                "Chat session has no messages to complete".to_string(),
            ),
        ));
    }

    tracing::debug!(
        stage = %QueryStage::StreamOpening,
        message_count = history.messages.len(),
        "Opening completion stream"
    );

    let mut upstream = match timeout_at(deadline, state.provider.complete_stream(&history.messages)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(log_failure(raw_session_id, QueryStage::StreamOpening, e.into()))
        }
        Err(_) => {
            return Err(log_failure(
                raw_session_id,
                QueryStage::StreamOpening,
                QueryError::DependencyUnavailable(
                    "Timed out opening the completion stream".to_string(),
                ),
            ))
        }
    };

    let buffered = read_until_content(&mut upstream, deadline)
        .await
        .map_err(|e| log_failure(raw_session_id, QueryStage::StreamOpening, e))?;
    let upstream: CompletionStream = Box::pin(futures::stream::iter(buffered).chain(upstream));

    tracing::debug!(stage = %QueryStage::Streaming, "Relaying completion");

    let (tx, rx) = mpsc::channel(RELAY_BUFFER);
    tokio::spawn(
        relay_completion(state.store.clone(), history.session_id, upstream, tx, deadline)
            .in_current_span(),
    );

    let frames = ReceiverStream::new(rx).map(|delta| Ok::<_, Infallible>(relay_frame(&delta)));
    Ok(Sse::new(frames).into_response())
}

/// Read upstream items until one carries text, the stream ends or it fails.
///
/// Nothing has been sent to the caller yet, so a failure here still becomes a
/// status code. The items read are returned for replay in front of the stream.
async fn read_until_content(
    upstream: &mut CompletionStream,
    deadline: Instant,
) -> Result<Vec<Result<StreamChunk, ProviderError>>, QueryError> {
    let mut buffered = Vec::new();
    loop {
        match timeout_at(deadline, upstream.next()).await {
            Ok(Some(Ok(chunk))) => {
                let has_text =
                    matches!(&chunk, StreamChunk::Delta { text, .. } if !text.is_empty());
                buffered.push(Ok(chunk));
                if has_text {
                    return Ok(buffered);
                }
            }
            Ok(Some(Err(e))) => return Err(QueryError::DependencyUnavailable(e.to_string())),
            Ok(None) => return Ok(buffered),
            Err(_) => {
                return Err(QueryError::DependencyUnavailable(
                    "Timed out waiting for completion content".to_string(),
                ))
            }
        }
    }
}

fn log_failure(session_id: &str, stage: QueryStage, err: QueryError) -> QueryError {
    let terminal = QueryStage::Errored;
    match &err {
        QueryError::InvalidArgument(_) | QueryError::NotFound => {
            tracing::warn!(session_id, stage = %stage, terminal = %terminal, error = %err, "Query rejected");
        }
        QueryError::DependencyUnavailable(_) | QueryError::StreamInterrupted(_) => {
            tracing::error!(session_id, stage = %stage, terminal = %terminal, error = %err, "Query failed");
        }
    }
    err
}
