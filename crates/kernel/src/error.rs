//! Listing error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Errors raised while composing or executing a collection listing.
#[derive(Debug, Error)]
pub enum CollectionError {
    /// Root entity set inconsistently within one request.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Relation registered with a conflicting source or alias.
    #[error("relation '{entity}' conflicts: {reason}")]
    Conflict { entity: String, reason: String },

    /// Malformed or unknown request parameter.
    #[error("invalid parameter '{parameter}': {reason}")]
    InvalidFilter { parameter: String, reason: String },

    /// Field path that resolves to nothing on the root or a joinable relation.
    #[error("unknown field '{0}'")]
    UnknownField(String),

    /// Join anchor that cannot be resolved.
    #[error("invalid relation graph: {0}")]
    InvalidGraph(String),

    /// Entity missing from the schema at query-build time.
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

/// Client-facing failure category for an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    BadRequest,
    NotFound,
    Internal,
}

impl CollectionError {
    pub(crate) fn invalid_filter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        CollectionError::InvalidFilter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn conflict(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        CollectionError::Conflict {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    /// Which failure category the caller should render.
    pub fn category(&self) -> ErrorCategory {
        match self {
            CollectionError::InvalidFilter { .. } | CollectionError::UnknownField(_) => {
                ErrorCategory::BadRequest
            }
            CollectionError::EntityNotFound(_) => ErrorCategory::NotFound,
            CollectionError::InvalidState(_)
            | CollectionError::Conflict { .. }
            | CollectionError::InvalidGraph(_)
            | CollectionError::Database(_)
            | CollectionError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// HTTP status matching [`CollectionError::category`].
    pub fn status_code(&self) -> StatusCode {
        match self.category() {
            ErrorCategory::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Request parameter to blame, if any.
    pub fn parameter(&self) -> Option<&str> {
        match self {
            CollectionError::InvalidFilter { parameter, .. } => Some(parameter),
            CollectionError::UnknownField(field) => Some(field),
            _ => None,
        }
    }
}

impl IntoResponse for CollectionError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal details stay in the log, never in the response body
        let detail = match &self {
            CollectionError::Database(e) => {
                tracing::error!(error = %e, "database error");
                "internal server error".to_string()
            }
            CollectionError::Internal(e) => {
                tracing::error!(error = %e, "internal server error");
                "internal server error".to_string()
            }
            other if other.category() == ErrorCategory::Internal => {
                tracing::error!(error = %other, "listing composition failed");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let mut error = json!({
            "status": status.as_u16().to_string(),
            "title": status.canonical_reason().unwrap_or("error"),
            "detail": detail,
        });
        if let Some(parameter) = self.parameter() {
            error["source"] = json!({ "parameter": parameter });
        }

        (status, Json(json!({ "errors": [error] }))).into_response()
    }
}

/// Result type alias using CollectionError.
pub type CollectionResult<T> = Result<T, CollectionError>;
