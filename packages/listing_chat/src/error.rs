use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

/// Errors surfaced by the chat core.
///
/// `NotFound` deliberately covers both "no such conversation" and "you are
/// not a participant" so callers cannot probe for conversation ids.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("not found")]
    NotFound,
    #[error("listing not found")]
    ListingNotFound,
    #[error("You cannot chat with yourself.")]
    SelfConversation,
    #[error("{0}")]
    Validation(String),
    #[error("{0} is required.")]
    MissingField(&'static str),
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ChatError::NotFound | ChatError::ListingNotFound => StatusCode::NOT_FOUND,
            ChatError::SelfConversation
            | ChatError::Validation(_)
            | ChatError::MissingField(_) => StatusCode::BAD_REQUEST,
            ChatError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text that is safe to show the client. Internal failures stay generic.
    pub fn client_message(&self) -> String {
        match self {
            ChatError::Storage(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        if let ChatError::Storage(ref e) = self {
            error!("Chat storage failure: {}", e);
        }
        (
            self.status(),
            Json(serde_json::json!({ "detail": self.client_message() })),
        )
            .into_response()
    }
}
