//! API Error Types
//!
//! Error taxonomy for the transport layer. The kind of a failure is preserved
//! through retries so callers can tell "timed out trying" apart from "peer
//! rejected the request".

use reqwest::StatusCode;
use thiserror::Error;

/// Errors surfaced by the transport and API clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A connection-level failure (refused, reset, timed out) that survived
    /// the retry schedule.
    #[error("request to '{url}' failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The peer answered with a status the caller cannot treat as success.
    #[error("{method} '{url}' returned unexpected status {status}")]
    Http {
        method: &'static str,
        url: String,
        status: StatusCode,
    },

    /// The response body could not be deserialized into the expected shape.
    #[error("invalid response body from '{url}': {source}")]
    InvalidBody {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The operation's cancellation token fired before completion.
    #[error("operation cancelled")]
    Cancelled,
}

impl ApiError {
    /// The HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error is an unexpected 4xx: a contract violation rather
    /// than a fault that retrying or waiting could fix.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self.status(), Some(status) if status.is_client_error())
    }
}
