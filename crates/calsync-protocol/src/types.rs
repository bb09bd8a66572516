//! Request and response bodies of the credential proxy.
//!
//! Every request is a JSON object tagged by `action`; replies are plain
//! objects whose shape depends on the action.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A request to the credential proxy.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ProxyRequest {
    /// Look up the stored CalDAV account of the session's user.
    LoadSettings,

    /// Store (or replace) the CalDAV account.
    #[serde(rename_all = "camelCase")]
    SaveSettings {
        server_url: String,
        username: String,
        password: String,
    },

    /// Forget the stored account.
    DeleteSettings,

    /// Perform a CalDAV request server-side with the stored credentials.
    #[serde(rename_all = "camelCase")]
    Forward {
        setting_id: String,
        method: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        depth: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },
}

impl ProxyRequest {
    pub fn save_settings(
        server_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::SaveSettings {
            server_url: server_url.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Wire name of the action, for logs and errors.
    pub fn action(&self) -> &'static str {
        match self {
            Self::LoadSettings => "loadSettings",
            Self::SaveSettings { .. } => "saveSettings",
            Self::DeleteSettings => "deleteSettings",
            Self::Forward { .. } => "forward",
        }
    }
}

// Manual impl keeps the password out of logs.
impl fmt::Debug for ProxyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SaveSettings {
                server_url,
                username,
                ..
            } => f
                .debug_struct("SaveSettings")
                .field("server_url", server_url)
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Forward {
                setting_id,
                method,
                url,
                depth,
                body,
            } => f
                .debug_struct("Forward")
                .field("setting_id", setting_id)
                .field("method", method)
                .field("url", url)
                .field("depth", depth)
                .field("body_len", &body.as_ref().map(String::len))
                .finish(),
            other => f.write_str(other.action()),
        }
    }
}

/// Reply to [`ProxyRequest::LoadSettings`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSettingsResponse {
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setting_id: Option<String>,
    #[serde(default)]
    pub has_password: bool,
}

/// Reply to [`ProxyRequest::SaveSettings`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSettingsResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setting_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Generic `success`/`error` reply, used by `deleteSettings`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Reply to [`ProxyRequest::Forward`]: the upstream CalDAV status and body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardResponse {
    pub status: u16,
    #[serde(default)]
    pub body: String,
}
