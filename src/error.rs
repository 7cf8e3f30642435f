//! Error handling module
//!
//! Centralized error type with the stable kind taxonomy and HTTP envelope
//! conversion. Every failure surfaced to a caller carries a machine-readable
//! `kind` the admin UI routes on (form field errors vs. toast).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::DomainError;
use crate::event_store::EventStoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // 401
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // 400
    #[error("Invalid request: {0}")]
    Validation(String),

    // 404
    #[error("Not found: {0}")]
    NotFound(String),

    // 409
    #[error("Concurrency conflict for {aggregate_id}: expected version {expected:?}, found {actual:?}")]
    Conflict {
        aggregate_id: String,
        expected: Option<i64>,
        actual: Option<i64>,
    },

    // 409
    #[error("Constraint violated: {0}")]
    Constraint(String),

    // Domain errors carry their own kind
    #[error(transparent)]
    Domain(#[from] DomainError),

    // 500, retryable
    #[error("Transient failure: {0}")]
    Transient(String),

    // 500
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl AppError {
    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::Validation(_) => "validation_failed",
            Self::NotFound(_) => "not_found",
            Self::Conflict { .. } => "optimistic_concurrency_conflict",
            Self::Constraint(_) => "constraint_violated",
            Self::Domain(e) => e.kind(),
            Self::Transient(_) => "transient",
            Self::Database(_) | Self::Serialization(_) | Self::Internal(_) | Self::Config(_) => {
                "internal"
            }
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict { .. } | Self::Constraint(_) => StatusCode::CONFLICT,
            Self::Domain(e) => match e.kind() {
                "constraint_violated" => StatusCode::CONFLICT,
                _ => StatusCode::BAD_REQUEST,
            },
            Self::Transient(_)
            | Self::Database(_)
            | Self::Serialization(_)
            | Self::Internal(_)
            | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a caller may retry after reloading state
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Transient(_))
    }
}

impl From<EventStoreError> for AppError {
    fn from(e: EventStoreError) -> Self {
        match e {
            EventStoreError::Conflict {
                aggregate_id,
                expected,
                actual,
            } => Self::Conflict {
                aggregate_id,
                expected,
                actual,
            },
            EventStoreError::NotFound(id) => Self::NotFound(id),
            EventStoreError::Database(e) => Self::Database(e),
            EventStoreError::Serialization(e) => Self::Serialization(e),
        }
    }
}

/// `{success: false, error: {message, kind}}`
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub kind: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();

        // Internals are logged, not leaked
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, kind, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorEnvelope {
            success: false,
            error: ErrorBody {
                message,
                kind: kind.to_string(),
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_taxonomy() {
        assert_eq!(AppError::Unauthorized("no session".into()).kind(), "unauthorized");
        assert_eq!(AppError::Validation("bad".into()).kind(), "validation_failed");
        assert_eq!(AppError::NotFound("prod-1".into()).kind(), "not_found");
        assert_eq!(
            AppError::Conflict {
                aggregate_id: "prod-1".into(),
                expected: Some(1),
                actual: Some(2),
            }
            .kind(),
            "optimistic_concurrency_conflict"
        );
        assert_eq!(AppError::Constraint("slug".into()).kind(), "constraint_violated");
        assert_eq!(AppError::Transient("deadlock".into()).kind(), "transient");
        assert_eq!(AppError::Internal("bug".into()).kind(), "internal");
    }

    #[test]
    fn test_domain_error_kind_passthrough() {
        let err = AppError::from(DomainError::SlugInUse("t-shirt".to_string()));
        assert_eq!(err.kind(), "constraint_violated");
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let err = AppError::from(DomainError::Validation("bad".to_string()));
        assert_eq!(err.kind(), "validation_failed");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_event_store_conflict_conversion() {
        let err = AppError::from(EventStoreError::Conflict {
            aggregate_id: "prod-1".to_string(),
            expected: Some(2),
            actual: Some(3),
        });
        assert_eq!(err.kind(), "optimistic_concurrency_conflict");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Unauthorized("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AppError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Constraint("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
