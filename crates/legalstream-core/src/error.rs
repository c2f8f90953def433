//! Error types for the streaming client.
//!
//! Session-level failures (unknown id, closed session, half-closed write path)
//! are returned synchronously from the public operations. Failures discovered
//! inside a background read loop never cross task boundaries as errors; they
//! are delivered to the session's sink via `on_error`.

use crate::transport::{Status, StatusCode};
use thiserror::Error;

/// Main error type for the streaming client.
#[derive(Debug, Error)]
pub enum StreamError {
    // Session registry errors
    #[error("Session already exists: {session_id}")]
    AlreadyExists { session_id: String },

    #[error("Session not found: {session_id}")]
    NotFound { session_id: String },

    #[error("Session closed: {session_id}")]
    SessionClosed { session_id: String },

    #[error("Stream half-closed, no further writes accepted: {session_id}")]
    StreamHalfClosed { session_id: String },

    #[error("Session limit reached ({limit} active sessions)")]
    SessionLimitReached { limit: usize },

    // Transport errors
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        /// Status detail reported by the transport, when it has one.
        status: Option<Status>,
    },

    #[error("Remote ended stream with {status}")]
    RemoteTerminal { status: Status },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Operation cancelled")]
    Cancelled,

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for streaming client operations.
pub type Result<T> = std::result::Result<T, StreamError>;

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl StreamError {
    /// Create a transport error carrying the transport's status detail.
    pub fn transport(status: Status) -> Self {
        StreamError::Transport {
            message: status.message.clone(),
            status: Some(status),
        }
    }

    /// Map this error onto the status code a host observes.
    pub fn status_code(&self) -> StatusCode {
        match self {
            StreamError::AlreadyExists { .. } => StatusCode::AlreadyExists,
            StreamError::NotFound { .. } => StatusCode::NotFound,
            StreamError::SessionClosed { .. } | StreamError::StreamHalfClosed { .. } => {
                StatusCode::FailedPrecondition
            }
            StreamError::SessionLimitReached { .. } => StatusCode::ResourceExhausted,
            StreamError::Transport { status, .. } => status
                .as_ref()
                .map(|s| s.code)
                .unwrap_or(StatusCode::Unavailable),
            StreamError::RemoteTerminal { status } => status.code,
            StreamError::Json { .. } | StreamError::Validation { .. } => {
                StatusCode::InvalidArgument
            }
            StreamError::Io { .. } => StatusCode::Unavailable,
            StreamError::Cancelled => StatusCode::Cancelled,
            StreamError::Other(_) => StatusCode::Unknown,
        }
    }

    /// Check if a caller could reasonably retry the failed operation.
    ///
    /// The client itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.status_code(),
            StatusCode::Unavailable | StatusCode::DeadlineExceeded | StatusCode::Aborted
        ) && !matches!(self, StreamError::Json { .. })
    }

    /// Status equivalent of this error, used when a local failure has to be
    /// reported as a terminal outcome.
    pub fn to_status(&self) -> Status {
        match self {
            StreamError::Transport {
                status: Some(status),
                ..
            }
            | StreamError::RemoteTerminal { status } => status.clone(),
            other => Status::new(other.status_code(), other.to_string()),
        }
    }
}
