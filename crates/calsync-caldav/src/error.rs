//! Error types for CalDAV operations.
//!
//! Every failure carries a [`CalDavErrorCode`] so callers can decide how to
//! react without matching on messages: authentication errors are shown
//! verbatim, transport errors suggest a manual `.ics` import, an invalidated
//! sync token triggers a full resync.

use std::fmt;

use calsync_core::CalendarUrl;
use thiserror::Error;

/// Classification of a CalDAV failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalDavErrorCode {
    /// Credentials rejected (401).
    AuthenticationFailed,
    /// Authenticated but not allowed (403).
    AuthorizationFailed,
    /// Connection, DNS, TLS or CORS-class failure.
    Transport,
    /// The request exceeded its deadline.
    Timeout,
    /// Malformed or unsupported response.
    InvalidResponse,
    /// The server no longer recognizes the sync token.
    TokenInvalidated,
    /// Required input missing; raised before any network call.
    Precondition,
    NotFound,
    RateLimited,
    /// 5xx from the server.
    ServerError,
    Internal,
}

impl CalDavErrorCode {
    /// Transient failures worth retrying later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport | Self::Timeout | Self::RateLimited | Self::ServerError
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "authentication_failed",
            Self::AuthorizationFailed => "authorization_failed",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::InvalidResponse => "invalid_response",
            Self::TokenInvalidated => "token_invalidated",
            Self::Precondition => "precondition",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for CalDavErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A CalDAV failure, optionally scoped to one calendar.
#[derive(Debug, Error)]
pub struct CalDavError {
    code: CalDavErrorCode,
    message: String,
    calendar: Option<CalendarUrl>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CalDavError {
    pub fn new(code: CalDavErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            calendar: None,
            source: None,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(CalDavErrorCode::AuthenticationFailed, message)
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(CalDavErrorCode::AuthorizationFailed, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(CalDavErrorCode::Transport, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(CalDavErrorCode::Timeout, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(CalDavErrorCode::InvalidResponse, message)
    }

    pub fn token_invalidated(message: impl Into<String>) -> Self {
        Self::new(CalDavErrorCode::TokenInvalidated, message)
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(CalDavErrorCode::Precondition, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(CalDavErrorCode::NotFound, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(CalDavErrorCode::RateLimited, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(CalDavErrorCode::ServerError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CalDavErrorCode::Internal, message)
    }

    /// Scopes the error to a calendar.
    pub fn with_calendar(mut self, calendar: CalendarUrl) -> Self {
        self.calendar = Some(calendar);
        self
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> CalDavErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn calendar(&self) -> Option<&CalendarUrl> {
        self.calendar.as_ref()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn is_token_invalidated(&self) -> bool {
        self.code == CalDavErrorCode::TokenInvalidated
    }

    /// Whether the user should be offered a manual `.ics` import instead.
    ///
    /// True for failures where the server could not be reached at all, such
    /// as a browser host blocking the request.
    pub fn suggests_file_import(&self) -> bool {
        self.code == CalDavErrorCode::Transport
    }
}

impl fmt::Display for CalDavError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(calendar) = &self.calendar {
            write!(f, "[{calendar}] ")?;
        }
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl From<calsync_protocol::ProtocolError> for CalDavError {
    fn from(err: calsync_protocol::ProtocolError) -> Self {
        use calsync_protocol::ProtocolError as P;

        let code = match &err {
            P::Timeout { .. } => CalDavErrorCode::Timeout,
            P::Transport(_) => CalDavErrorCode::Transport,
            P::Unauthorized => CalDavErrorCode::AuthenticationFailed,
            P::Rejected { .. } | P::Status { .. } => CalDavErrorCode::ServerError,
            P::MissingField { .. } | P::Serialization(_) => CalDavErrorCode::InvalidResponse,
            P::InvalidEndpoint(_) => CalDavErrorCode::Precondition,
        };
        Self::new(code, format!("credential proxy: {err}")).with_source(err)
    }
}

/// Result type for CalDAV operations.
pub type CalDavResult<T> = Result<T, CalDavError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_calendar() {
        let err = CalDavError::timeout("REPORT took too long")
            .with_calendar(CalendarUrl::new("https://example.com/cal/work/"));
        assert_eq!(
            err.to_string(),
            "[https://example.com/cal/work] timeout: REPORT took too long"
        );
        assert!(err.is_retryable());
        assert!(!err.suggests_file_import());
    }

    #[test]
    fn transport_suggests_import() {
        let err = CalDavError::transport("connection refused");
        assert!(err.suggests_file_import());
        assert!(err.is_retryable());
        assert_eq!(err.code().as_str(), "transport");
    }

    #[test]
    fn auth_and_token_are_not_retryable() {
        assert!(!CalDavError::authentication("bad password").is_retryable());
        let stale = CalDavError::token_invalidated("valid-sync-token");
        assert!(stale.is_token_invalidated());
        assert!(!stale.is_retryable());
    }

    #[test]
    fn source_is_chained() {
        use std::error::Error as _;
        let io = std::io::Error::other("boom");
        let err = CalDavError::internal("wrapped").with_source(io);
        assert_eq!(err.source().map(|s| s.to_string()), Some("boom".into()));
    }

    #[test]
    fn proxy_errors_map_to_codes() {
        let err: CalDavError = calsync_protocol::ProtocolError::Unauthorized.into();
        assert_eq!(err.code(), CalDavErrorCode::AuthenticationFailed);

        let err: CalDavError = calsync_protocol::ProtocolError::timeout("forward").into();
        assert_eq!(err.code(), CalDavErrorCode::Timeout);
    }
}
