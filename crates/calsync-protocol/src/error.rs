//! Credential proxy error types.

use thiserror::Error;

/// Result type for proxy operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors talking to the credential proxy.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The request could not be sent or the connection dropped.
    #[error("proxy transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// The proxy did not answer within the deadline.
    #[error("timeout during {operation}")]
    Timeout { operation: String },

    /// The bearer token was rejected.
    #[error("proxy rejected the session token")]
    Unauthorized,

    /// Non-success HTTP status from the proxy itself.
    #[error("proxy returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The proxy answered `success: false`.
    #[error("proxy refused {action}: {message}")]
    Rejected { action: &'static str, message: String },

    /// A reply was missing a field the action requires.
    #[error("proxy reply to {action} is missing {field}")]
    MissingField {
        action: &'static str,
        field: &'static str,
    },

    /// Body was not the JSON we expected.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The endpoint URL was unusable.
    #[error("invalid proxy endpoint: {0}")]
    InvalidEndpoint(String),
}

impl ProtocolError {
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Whether the proxy could not be reached at all, as opposed to answering
    /// with a refusal.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }
}

impl From<reqwest::Error> for ProtocolError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout("proxy request")
        } else {
            Self::Transport(err)
        }
    }
}
