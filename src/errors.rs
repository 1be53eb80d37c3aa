//! The API error taxonomy and its JSON envelope.
//!
//! Every error response shares the shape `{error: {code, message, details?},
//! request_id, server_time_utc}`. `ApiError` centralizes the mapping from
//! taxonomy to HTTP status so handlers return `Result<_, ApiError>` and never
//! hand-build an error `Response`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::ids::new_request_id;
use crate::time::now_rfc3339_millis;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation {
        message: String,
        field: Option<String>,
    },
    #[error("{0}")]
    PolicyDenied(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    LogsUnavailable(String),
    #[error("rate limit exceeded")]
    RateLimited,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "validation_error",
            ApiError::PolicyDenied(_) => "policy_denied",
            ApiError::NotFound(_) => "not_found",
            ApiError::LogsUnavailable(_) => "logs_unavailable",
            ApiError::RateLimited => "rate_limited",
            ApiError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::PolicyDenied(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::LogsUnavailable(_) => StatusCode::CONFLICT,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Validation { message, .. } => message.clone(),
            ApiError::PolicyDenied(message) => message.clone(),
            ApiError::NotFound(message) => message.clone(),
            ApiError::LogsUnavailable(message) => message.clone(),
            ApiError::RateLimited => "rate limit exceeded".to_string(),
            // Never leak internal error detail to the client.
            ApiError::Internal(_) => "an internal error occurred".to_string(),
        }
    }

    fn field(&self) -> Option<&str> {
        match self {
            ApiError::Validation { field, .. } => field.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<ErrorDetails>,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
    request_id: String,
    server_time_utc: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, ApiError::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let status = self.status();
        let envelope = ErrorEnvelope {
            error: ErrorBody {
                code: self.code(),
                message: self.message(),
                details: self.field().map(|field| ErrorDetails {
                    field: Some(field.to_string()),
                }),
            },
            request_id: new_request_id(),
            server_time_utc: now_rfc3339_millis(),
        };
        (status, Json(envelope)).into_response()
    }
}
