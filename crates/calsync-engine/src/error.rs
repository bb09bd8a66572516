//! Engine error types.

use std::io;
use std::path::Path;

use calsync_caldav::{CalDavError, CalDavErrorCode};
use calsync_core::CalendarUrl;
use calsync_protocol::ProtocolError;
use serde::Serialize;
use thiserror::Error;

use crate::engine::TeardownReport;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for credential operations.
pub type CredentialResult<T> = Result<T, CredentialError>;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors from the local stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing a document failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// A document on disk could not be parsed.
    #[error("corrupt document {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// A document could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The event belongs to a calendar that rejects local edits.
    #[error("calendar {calendar} is read-only")]
    ReadOnly { calendar: CalendarUrl },

    /// No event with the given key.
    #[error("event not found: {remote_url}")]
    EventNotFound { remote_url: CalendarUrl },
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn corrupt(path: &Path, source: serde_json::Error) -> Self {
        Self::Corrupt {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Errors from the credential store.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The secure path needs an authenticated session.
    #[error("no active session")]
    NoSession,

    /// The secure path needs a credential proxy.
    #[error("no credential proxy configured")]
    NoProxy,

    /// The proxy call failed.
    #[error("credential proxy error: {0}")]
    Proxy(#[from] ProtocolError),

    /// `migrate_legacy` found nothing to migrate.
    #[error("no legacy credentials to migrate")]
    NothingToMigrate,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure category reported for a calendar that did not sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Authentication,
    /// Network class failure; importing an .ics file is the usual fallback.
    Transport,
    Timeout,
    /// Malformed or unsupported server response.
    Protocol,
    TokenInvalidated,
    Precondition,
    /// Another pass is already running for the calendar.
    Busy,
    /// Local persistence failed.
    Storage,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Protocol => "protocol",
            Self::TokenInvalidated => "token_invalidated",
            Self::Precondition => "precondition",
            Self::Busy => "busy",
            Self::Storage => "storage",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<CalDavErrorCode> for FailureKind {
    fn from(code: CalDavErrorCode) -> Self {
        match code {
            CalDavErrorCode::AuthenticationFailed | CalDavErrorCode::AuthorizationFailed => {
                Self::Authentication
            }
            CalDavErrorCode::Transport | CalDavErrorCode::RateLimited => Self::Transport,
            CalDavErrorCode::Timeout => Self::Timeout,
            CalDavErrorCode::TokenInvalidated => Self::TokenInvalidated,
            CalDavErrorCode::Precondition => Self::Precondition,
            CalDavErrorCode::InvalidResponse
            | CalDavErrorCode::NotFound
            | CalDavErrorCode::ServerError
            | CalDavErrorCode::Internal => Self::Protocol,
        }
    }
}

impl CredentialError {
    /// The category reported to callers.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Proxy(e) if e.is_unreachable() => FailureKind::Transport,
            Self::Store(_) => FailureKind::Storage,
            _ => FailureKind::Precondition,
        }
    }
}

/// Errors from the sync engine and the facade.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    CalDav(#[from] CalDavError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("credential error: {0}")]
    Credentials(#[from] CredentialError),

    /// A pass for this calendar is already in flight.
    #[error("calendar {calendar} is already syncing")]
    Busy { calendar: CalendarUrl },

    /// The remote call exceeded its deadline.
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// No sync settings are stored for the user.
    #[error("CalDAV is not configured for this user")]
    NotConfigured,

    /// Disconnect removed every local record but not the stored credentials.
    #[error("local CalDAV data removed, but deleting stored credentials failed: {source}")]
    CredentialsNotDeleted {
        report: TeardownReport,
        #[source]
        source: CredentialError,
    },
}

impl SyncError {
    pub fn timeout(operation: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            secs,
        }
    }

    /// The category reported to callers.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::CalDav(e) => e.code().into(),
            Self::Store(_) => FailureKind::Storage,
            Self::Credentials(e) | Self::CredentialsNotDeleted { source: e, .. } => e.kind(),
            Self::Busy { .. } => FailureKind::Busy,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::NotConfigured => FailureKind::Precondition,
        }
    }

    pub fn is_token_invalidated(&self) -> bool {
        matches!(self, Self::CalDav(e) if e.is_token_invalidated())
    }

    /// Whether the caller should suggest importing an .ics file instead.
    pub fn suggests_file_import(&self) -> bool {
        match self {
            Self::CalDav(e) => e.suggests_file_import(),
            _ => false,
        }
    }
}
