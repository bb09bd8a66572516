//! Per-request CalDAV connection settings.

use std::fmt;
use std::time::Duration;

use url::Url;

use crate::error::{CalDavError, CalDavResult};

/// How a request reaches the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource<'a> {
    /// Connect directly with the given password.
    Password(&'a str),
    /// Go through the credential proxy, which holds the password.
    Proxy { setting_id: &'a str },
}

/// Connection settings for one discovery or sync.
///
/// Either `password` or `setting_id` must be present. When both are set the
/// direct password wins.
#[derive(Clone)]
pub struct CalDavConfig {
    pub server_url: String,
    pub username: String,
    pub password: Option<String>,
    pub setting_id: Option<String>,
    /// Deadline for each HTTP request.
    pub timeout: Duration,
    pub verify_tls: bool,
    pub user_agent: String,
}

impl CalDavConfig {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    pub fn new(server_url: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            username: username.into(),
            password: None,
            setting_id: None,
            timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            verify_tls: true,
            user_agent: format!("calsync/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_setting_id(mut self, setting_id: impl Into<String>) -> Self {
        self.setting_id = Some(setting_id.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    /// Checks the settings and returns the parsed server root.
    ///
    /// # Errors
    ///
    /// `Precondition` when the server URL, the username or both credential
    /// forms are missing, or when the URL is not absolute http(s).
    pub fn validate(&self) -> CalDavResult<Url> {
        let server_url = self.server_url.trim();
        if server_url.is_empty() {
            return Err(CalDavError::precondition("server URL is required"));
        }
        if self.username.trim().is_empty() {
            return Err(CalDavError::precondition("username is required"));
        }
        self.credential_source()?;

        let url = Url::parse(server_url).map_err(|e| {
            CalDavError::precondition(format!("invalid server URL {server_url:?}: {e}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CalDavError::precondition(format!(
                "unsupported URL scheme {:?}",
                url.scheme()
            )));
        }
        Ok(url)
    }

    /// Which credential path this config uses.
    pub fn credential_source(&self) -> CalDavResult<CredentialSource<'_>> {
        match (non_empty(&self.password), non_empty(&self.setting_id)) {
            (Some(password), _) => Ok(CredentialSource::Password(password)),
            (None, Some(setting_id)) => Ok(CredentialSource::Proxy { setting_id }),
            (None, None) => Err(CalDavError::precondition(
                "a password or a stored credential id is required",
            )),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

impl fmt::Debug for CalDavConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalDavConfig")
            .field("server_url", &self.server_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("setting_id", &self.setting_id)
            .field("timeout", &self.timeout)
            .field("verify_tls", &self.verify_tls)
            .finish()
    }
}
