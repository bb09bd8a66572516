//! The authenticated host session.

use std::fmt::{self, Write as _};

/// The host application's authenticated user.
///
/// Passed explicitly into every store and engine call. An inactive session
/// (no access token) can still read and write local state but cannot reach
/// the credential proxy.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub access_token: Option<String>,
}

impl Session {
    /// A local-only session.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: None,
        }
    }

    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Whether the session carries a usable bearer token.
    pub fn is_active(&self) -> bool {
        self.bearer().is_some()
    }

    pub fn bearer(&self) -> Option<&str> {
        self.access_token.as_deref().filter(|t| !t.trim().is_empty())
    }

    /// File-system safe, collision-free encoding of the user id.
    ///
    /// ASCII alphanumerics, `-` and `_` pass through; every other byte is
    /// written as `~XX`.
    pub fn storage_key(&self) -> String {
        let mut key = String::with_capacity(self.user_id.len());
        for byte in self.user_id.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
                key.push(char::from(byte));
            } else {
                let _ = write!(key, "~{byte:02x}");
            }
        }
        if key.is_empty() {
            key.push('~');
        }
        key
    }
}

// The token must not end up in logs.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
