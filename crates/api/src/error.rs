//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use jotter_shared::ChatError;
use serde_json::json;

/// HTTP-level error type (websocket handshake, health endpoints)
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Missing credential")]
    MissingCredential,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Authentication timed out")]
    AuthTimeout,

    // Validation errors
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
    #[error("Service unavailable")]
    ServiceUnavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Authentication
            ApiError::MissingCredential => (StatusCode::UNAUTHORIZED, "MISSING_CREDENTIAL", self.to_string()),
            ApiError::InvalidToken => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", self.to_string()),
            ApiError::AuthTimeout => (StatusCode::REQUEST_TIMEOUT, "AUTH_TIMEOUT", self.to_string()),

            // Validation
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            // Internal
            ApiError::Database(_) => (StatusCode::SERVICE_UNAVAILABLE, "DATABASE_ERROR", "Database error".to_string()),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", self.to_string()),
            ApiError::ServiceUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", self.to_string()),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Auth(_) => ApiError::InvalidToken,
            ChatError::StoreUnavailable(msg) => ApiError::Database(msg),
            ChatError::Validation(msg) => ApiError::BadRequest(msg),
            other => {
                tracing::error!(error = %other, "Unexpected error during HTTP request");
                ApiError::Internal
            }
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
