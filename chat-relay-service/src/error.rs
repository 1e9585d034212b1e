//! Failure taxonomy of the query pipeline.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use service_core::error::AppError;
use thiserror::Error;

use crate::services::providers::ProviderError;

#[derive(Debug, Error)]
pub enum QueryError {
    /// The request named something that cannot be a session.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No session with the given id.
    #[error("Chat session not found")]
    NotFound,

    /// The store or the completion provider failed before any content was relayed.
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// The completion stream failed after content was relayed.
    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),
}

impl QueryError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            QueryError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            QueryError::NotFound => StatusCode::NOT_FOUND,
            QueryError::DependencyUnavailable(_) | QueryError::StreamInterrupted(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn detail(&self) -> String {
        match self {
            QueryError::InvalidArgument(msg)
            | QueryError::DependencyUnavailable(msg)
            | QueryError::StreamInterrupted(msg) => msg.clone(),
            QueryError::NotFound => self.to_string(),
        }
    }
}

impl From<AppError> for QueryError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::BadRequest(e) => QueryError::InvalidArgument(e.to_string()),
            AppError::NotFound(_) => QueryError::NotFound,
            other => QueryError::DependencyUnavailable(other.to_string()),
        }
    }
}

impl From<ProviderError> for QueryError {
    fn from(err: ProviderError) -> Self {
        QueryError::DependencyUnavailable(err.to_string())
    }
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "detail": self.detail() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_uses_fixed_detail() {
        assert_eq!(QueryError::NotFound.detail(), "Chat session not found");
        assert_eq!(QueryError::NotFound.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_argument_is_a_client_error() {
        let err = QueryError::InvalidArgument("bad id".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.detail(), "bad id");
    }

    #[test]
    fn store_failures_become_dependency_unavailable() {
        let err: QueryError = AppError::DatabaseError(anyhow::anyhow!("no primary")).into();
        assert!(matches!(err, QueryError::DependencyUnavailable(ref m) if m.contains("no primary")));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn rejected_provider_requests_are_server_errors() {
        let err: QueryError = ProviderError::InvalidRequest("no messages".to_string()).into();
        assert!(matches!(err, QueryError::DependencyUnavailable(_)));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn provider_network_errors_become_dependency_unavailable() {
        let err: QueryError = ProviderError::NetworkError("connection refused".to_string()).into();
        assert!(matches!(err, QueryError::DependencyUnavailable(_)));
    }
}
