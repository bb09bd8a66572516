//! Read-only CalDAV client.
//!
//! [`CalDavClient`] discovers a user's calendars and fetches their events,
//! either as a full snapshot or as an RFC 6578 delta since a sync token.
//! Requests go straight to the server with Basic/Digest auth, or through the
//! credential proxy when the password is stored there.

pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod ics;
pub mod proxy;
pub mod remote_event;
pub mod transport;
pub mod xml;

pub use api::{CalDavApi, ChangeSet, FetchKind};
pub use client::{CalDavClient, MULTIGET_BATCH_SIZE, ProxyRoute, normalize_color};
pub use config::{CalDavConfig, CredentialSource};
pub use error::{CalDavError, CalDavErrorCode, CalDavResult};
pub use remote_event::RemoteEvent;
pub use transport::{BoxFuture, DavRequest, DavResponse, DavTransport, Depth};
