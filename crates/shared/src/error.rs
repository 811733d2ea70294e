//! Error types for the realtime messaging core

use thiserror::Error;

/// Errors raised by the chat services and their stores.
///
/// Policy and validation errors are reported back to the originating
/// connection only; none of them terminate the connection.
#[derive(Debug, Clone, Error)]
pub enum ChatError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Cannot target yourself")]
    SelfReference,

    #[error("Messaging is only allowed between friends")]
    NotFriends,

    #[error("Not allowed: {0}")]
    Unauthorized(String),

    #[error("Message must have content or an attached note")]
    EmptyMessage,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Stable machine-readable code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Auth(_) => "AUTH_ERROR",
            ChatError::SelfReference => "SELF_REFERENCE",
            ChatError::NotFriends => "NOT_FRIENDS",
            ChatError::Unauthorized(_) => "UNAUTHORIZED",
            ChatError::EmptyMessage => "EMPTY_MESSAGE",
            ChatError::Validation(_) => "VALIDATION_ERROR",
            ChatError::NotFound(_) => "NOT_FOUND",
            ChatError::Conflict(_) => "CONFLICT",
            ChatError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            ChatError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show to a client.
    ///
    /// Storage and internal failures are reported generically so that driver
    /// details never leak over the socket.
    pub fn client_message(&self) -> String {
        match self {
            ChatError::StoreUnavailable(_) => "Storage temporarily unavailable".to_string(),
            ChatError::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for ChatError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = ?err, "Store error");
        ChatError::StoreUnavailable(err.to_string())
    }
}

/// Result alias for chat operations
pub type ChatResult<T> = Result<T, ChatError>;
