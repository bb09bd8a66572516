//! Client error types.

use calsync_caldav::CalDavError;
use calsync_engine::{CredentialError, StoreError, SyncError};
use thiserror::Error;

/// Result type for CLI commands.
pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(String),

    /// A `pass::` or `env::` reference could not be resolved.
    #[error("secret error: {0}")]
    Secret(String),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The command needs confirmation or an argument the user did not give.
    #[error("{0}")]
    Usage(String),
}

impl ClientError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Extra line printed after the error, if any.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Sync(e) if e.suggests_file_import() => {
                Some("hint: the server can't be used for sync; export the calendar as an .ics file and import it instead")
            }
            _ => None,
        }
    }
}

impl From<CalDavError> for ClientError {
    fn from(err: CalDavError) -> Self {
        Self::Sync(err.into())
    }
}

impl From<CredentialError> for ClientError {
    fn from(err: CredentialError) -> Self {
        Self::Sync(err.into())
    }
}

impl From<StoreError> for ClientError {
    fn from(err: StoreError) -> Self {
        Self::Sync(err.into())
    }
}
