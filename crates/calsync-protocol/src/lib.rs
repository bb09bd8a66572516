//! Credential proxy protocol for calsync.
//!
//! The proxy is an authenticated HTTPS endpoint that keeps the CalDAV
//! password server-side. Clients send JSON objects tagged with an `action`:
//!
//! | action | reply |
//! |---|---|
//! | `loadSettings` | `exists`, `serverUrl`, `username`, `settingId`, `hasPassword` |
//! | `saveSettings` | `success`, `settingId` or `error` |
//! | `deleteSettings` | `success` or `error` |
//! | `forward` | upstream `status` and `body` |
//!
//! ```rust
//! use calsync_protocol::ProxyRequest;
//!
//! let json = serde_json::to_string(&ProxyRequest::LoadSettings).unwrap();
//! assert_eq!(json, r#"{"action":"loadSettings"}"#);
//! ```

mod channel;
mod error;
mod types;

pub use channel::{DEFAULT_PROXY_TIMEOUT, ProxyChannel, StoredAccount};
pub use error::{ProtocolError, ProtocolResult};
pub use types::{
    AckResponse, ForwardResponse, LoadSettingsResponse, ProxyRequest, SaveSettingsResponse,
};
