use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::store::StoreError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Errors surfaced by the HTTP handlers. Clients only ever see a generic
/// message; the cause of 5xx errors goes to the log.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Not found")]
    NotFound,

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("{op} upstream lookup failed: {cause:#}")]
    Upstream {
        op: &'static str,
        cause: anyhow::Error,
    },

    #[error("{op} failed: {cause:#}")]
    Internal {
        op: &'static str,
        cause: anyhow::Error,
    },
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn internal(op: &'static str, cause: impl Into<anyhow::Error>) -> Self {
        Self::Internal {
            op,
            cause: cause.into(),
        }
    }

    pub fn upstream(op: &'static str, cause: impl Into<anyhow::Error>) -> Self {
        Self::Upstream {
            op,
            cause: cause.into(),
        }
    }

    /// Map a store failure; an unknown pagination cursor is the caller's fault.
    pub fn store(op: &'static str, err: StoreError) -> Self {
        match err {
            StoreError::InvalidCursor(_) => Self::bad_request("Invalid startAfter cursor"),
            other => Self::internal(op, other),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Upstream { .. } | ApiError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Upstream { .. } => {
                tracing::error!("{}", self);
                "Upstream lookup failed".to_string()
            }
            ApiError::Internal { .. } => {
                tracing::error!("{}", self);
                "Internal error".to_string()
            }
            other => other.to_string(),
        };

        (self.status(), Json(json!({ "error": message }))).into_response()
    }
}
