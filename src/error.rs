//! Error types for the sync layer
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Sync Error Enum ==
/// Unified error type for the sync layer.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No signed-in user
    #[error("User not authenticated")]
    NotAuthenticated,

    /// Record not found on the backend
    #[error("Not found: {0}")]
    NotFound(String),

    /// Record already exists (e.g. duplicate friend request)
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Transport failure talking to the backend
    #[error("Network error: {0}")]
    Network(String),

    /// Backend rejected the request
    #[error("Backend error: {0}")]
    Backend(String),

    /// Local key-value store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Cached or stored payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Realtime channel is gone
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

impl SyncError {
    // == User Message ==
    /// Short message suitable for an alert shown to the user.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::NotAuthenticated => "Please sign in to continue.".to_string(),
            SyncError::NotFound(_) => "We couldn't find what you were looking for.".to_string(),
            SyncError::AlreadyExists(what) => format!("{} already exists.", what),
            SyncError::Network(_) | SyncError::ChannelClosed(_) => {
                "Couldn't reach the server. Pull to refresh to try again.".to_string()
            }
            SyncError::Backend(_) => "Something went wrong loading your feed.".to_string(),
            SyncError::Storage(_) | SyncError::Serialization(_) => {
                "Local data could not be read.".to_string()
            }
            SyncError::InvalidRequest(msg) => msg.clone(),
        }
    }

    /// Returns true for failures worth a manual retry by the user.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::ChannelClosed(_))
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Storage(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = match &self {
            SyncError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            SyncError::NotFound(_) => StatusCode::NOT_FOUND,
            SyncError::AlreadyExists(_) => StatusCode::CONFLICT,
            SyncError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            SyncError::Network(_) | SyncError::ChannelClosed(_) => StatusCode::BAD_GATEWAY,
            SyncError::Backend(_) => StatusCode::BAD_GATEWAY,
            SyncError::Storage(_) | SyncError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string(),
            "message": self.user_message(),
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the sync layer.
pub type Result<T> = std::result::Result<T, SyncError>;
