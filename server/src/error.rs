//! Failures surfaced to the sender of a chat intent.
//!
//! Delivery outcomes (dropped on a full queue, recipient offline) are not
//! errors and never appear here.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Missing, malformed or expired credential.
    #[error("authentication required")]
    Unauthenticated,
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Deliberately vague so callers cannot probe for existence.
    #[error("not found or not accessible")]
    NotFound,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The durable write failed; nothing was dispatched.
    #[error("failed to persist message")]
    PersistenceFailure(#[source] StoreError),
    /// A membership or history lookup failed.
    #[error("storage temporarily unavailable")]
    StoreUnavailable(#[source] StoreError),
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Unauthorized(_) => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::PersistenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        if let Self::PersistenceFailure(source) | Self::StoreUnavailable(source) = &self {
            tracing::error!(error = %source, "Storage failure while handling chat request");
        }
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
