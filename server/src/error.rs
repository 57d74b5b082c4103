use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Error type shared by the store, the collaborators and the HTTP handlers.
///
/// Each variant maps onto one HTTP status; the message is what the caller sees.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Row store, blob storage, mail relay or auth endpoint failure.
    #[error("{0}")]
    Upstream(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type ChatResult<T> = Result<T, ChatError>;

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        ChatError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ChatError::NotFound(message.into())
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        ChatError::Upstream(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Conflict(_) => StatusCode::CONFLICT,
            ChatError::Upstream(_) | ChatError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<sqlx::Error> for ChatError {
    fn from(err: sqlx::Error) -> Self {
        ChatError::Upstream(format!("database error: {err}"))
    }
}

impl From<sqlx::migrate::MigrateError> for ChatError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        ChatError::Upstream(format!("migration failed: {err}"))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Upstream(err.to_string())
    }
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Upstream(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Upstream(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(ChatError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ChatError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ChatError::Conflict("closed".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ChatError::upstream("smtp down").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn display_is_the_bare_message() {
        let err = ChatError::upstream("SMTP is not configured");
        assert_eq!(err.to_string(), "SMTP is not configured");
    }
}
