// SPDX-License-Identifier: MIT

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Webhook signature verification failed")]
    InvalidSignature,

    #[error("Provider connection expired; user must re-authenticate")]
    ConnectionExpired,

    #[error("Provider rate limit hit")]
    ProviderRateLimited,

    #[error("Insufficient balance: have {available}, need {requested}")]
    InsufficientBalance { available: f64, requested: f64 },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Provider API error: {0}")]
    ProviderApi(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Marker used by the provider client when an access token is rejected.
    pub const PROVIDER_TOKEN_ERROR: &'static str = "Token expired or invalid";

    /// True for transient failures worth a single retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::ProviderRateLimited | AppError::Database(_) | AppError::ProviderApi(_)
        )
    }

    /// True when the provider rejected our credentials for this user.
    pub fn is_provider_token_error(&self) -> bool {
        match self {
            AppError::ConnectionExpired => true,
            AppError::ProviderApi(msg) => {
                msg.contains(Self::PROVIDER_TOKEN_ERROR) || msg.contains("invalid_grant")
            }
            _ => false,
        }
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token", None),
            AppError::InvalidSignature => (StatusCode::UNAUTHORIZED, "invalid_signature", None),
            AppError::ConnectionExpired => (StatusCode::UNAUTHORIZED, "connection_expired", None),
            AppError::ProviderRateLimited => {
                (StatusCode::SERVICE_UNAVAILABLE, "provider_rate_limited", None)
            }
            // User-correctable, not a system failure: no error log here.
            AppError::InsufficientBalance {
                available,
                requested,
            } => (
                StatusCode::BAD_REQUEST,
                "insufficient_balance",
                Some(format!("available {:.4}, requested {:.4}", available, requested)),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::ProviderApi(msg) => {
                (StatusCode::BAD_GATEWAY, "provider_error", Some(msg.clone()))
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
