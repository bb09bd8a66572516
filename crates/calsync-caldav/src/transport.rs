//! The seam between CalDAV logic and the wire.
//!
//! A [`DavTransport`] sends one WebDAV request and hands back the raw status
//! and body. Authentication happens inside the transport; interpreting the
//! status is left to the caller, since some statuses (404 during discovery,
//! 403 on sync-collection) mean different things depending on the request.

use std::future::Future;
use std::pin::Pin;

use tracing::warn;
use url::Url;

use crate::error::{CalDavError, CalDavResult};

/// A boxed future for object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// WebDAV `Depth` header values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
}

impl Depth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zero => "0",
            Self::One => "1",
        }
    }
}

/// One outgoing WebDAV request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavRequest {
    pub method: &'static str,
    pub url: Url,
    pub depth: Option<Depth>,
    pub body: Option<String>,
}

impl DavRequest {
    pub fn propfind(url: Url, depth: Depth, body: String) -> Self {
        Self {
            method: "PROPFIND",
            url,
            depth: Some(depth),
            body: Some(body),
        }
    }

    pub fn report(url: Url, depth: Depth, body: String) -> Self {
        Self {
            method: "REPORT",
            url,
            depth: Some(depth),
            body: Some(body),
        }
    }
}

/// Raw reply to a [`DavRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavResponse {
    pub status: u16,
    pub body: String,
}

impl DavResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns the body of a 2xx reply, or the error matching the status.
    pub fn into_body(self, what: &str) -> CalDavResult<String> {
        match self.status {
            200..=299 => Ok(self.body),
            401 => Err(CalDavError::authentication(format!(
                "{what}: server rejected the credentials"
            ))),
            403 => Err(CalDavError::authorization(format!("{what}: access denied"))),
            404 => Err(CalDavError::not_found(format!("{what}: resource not found"))),
            429 => Err(CalDavError::rate_limited(format!("{what}: too many requests"))),
            status @ 500..=599 => Err(CalDavError::server(format!(
                "{what}: server error {status}"
            ))),
            status => {
                warn!(status, what, "unexpected CalDAV status");
                Err(CalDavError::invalid_response(format!(
                    "{what}: unexpected status {status}"
                )))
            }
        }
    }
}

/// Sends WebDAV requests.
pub trait DavTransport: Send + Sync {
    /// Performs `request`. Errors are reserved for requests that produced no
    /// HTTP reply at all (connection failure, timeout).
    fn send(&self, request: DavRequest) -> BoxFuture<'_, CalDavResult<DavResponse>>;
}
