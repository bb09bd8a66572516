//! HTTPS channel to the credential proxy.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{
    AckResponse, ForwardResponse, LoadSettingsResponse, ProxyRequest, SaveSettingsResponse,
};

/// Default deadline for a proxy round trip.
pub const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(30);

/// Stored account as reported by the proxy. The password never comes back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAccount {
    pub server_url: String,
    pub username: String,
    pub setting_id: String,
    pub has_password: bool,
}

/// Client for the credential proxy endpoint.
///
/// Every call is authorized with the caller's bearer token; the channel
/// itself holds no session state.
#[derive(Debug, Clone)]
pub struct ProxyChannel {
    http: reqwest::Client,
    endpoint: Url,
}

impl ProxyChannel {
    /// Creates a channel with the default deadline.
    pub fn new(endpoint: &str) -> ProtocolResult<Self> {
        Self::with_timeout(endpoint, DEFAULT_PROXY_TIMEOUT)
    }

    pub fn with_timeout(endpoint: &str, timeout: Duration) -> ProtocolResult<Self> {
        let endpoint =
            Url::parse(endpoint).map_err(|e| ProtocolError::InvalidEndpoint(e.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ProtocolError::Transport)?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Sends one action and decodes the reply as `R`.
    pub async fn call<R: DeserializeOwned>(
        &self,
        bearer: &str,
        request: &ProxyRequest,
    ) -> ProtocolResult<R> {
        let action = request.action();
        debug!(action, "calling credential proxy");

        let payload = serde_json::to_vec(request)?;
        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(bearer)
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!(action, status = status.as_u16(), "proxy rejected session");
            return Err(ProtocolError::Unauthorized);
        }
        if !status.is_success() {
            return Err(ProtocolError::Status {
                status: status.as_u16(),
                body: truncate(&body, 200),
            });
        }

        Ok(serde_json::from_str(&body)?)
    }

    /// Returns the stored account, or `None` when nothing is stored.
    pub async fn load_settings(&self, bearer: &str) -> ProtocolResult<Option<StoredAccount>> {
        let reply: LoadSettingsResponse = self.call(bearer, &ProxyRequest::LoadSettings).await?;
        if !reply.exists {
            return Ok(None);
        }

        let missing = |field: &'static str| ProtocolError::MissingField {
            action: "loadSettings",
            field,
        };
        Ok(Some(StoredAccount {
            server_url: reply.server_url.ok_or_else(|| missing("serverUrl"))?,
            username: reply.username.ok_or_else(|| missing("username"))?,
            setting_id: reply.setting_id.ok_or_else(|| missing("settingId"))?,
            has_password: reply.has_password,
        }))
    }

    /// Stores the account and returns its setting id.
    pub async fn save_settings(
        &self,
        bearer: &str,
        server_url: &str,
        username: &str,
        password: &str,
    ) -> ProtocolResult<String> {
        let request = ProxyRequest::save_settings(server_url, username, password);
        let reply: SaveSettingsResponse = self.call(bearer, &request).await?;

        if !reply.success {
            return Err(ProtocolError::Rejected {
                action: "saveSettings",
                message: reply.error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }
        reply.setting_id.ok_or(ProtocolError::MissingField {
            action: "saveSettings",
            field: "settingId",
        })
    }

    pub async fn delete_settings(&self, bearer: &str) -> ProtocolResult<()> {
        let reply: AckResponse = self.call(bearer, &ProxyRequest::DeleteSettings).await?;
        if reply.success {
            Ok(())
        } else {
            Err(ProtocolError::Rejected {
                action: "deleteSettings",
                message: reply.error.unwrap_or_else(|| "unknown error".to_string()),
            })
        }
    }

    /// Runs a CalDAV request through the proxy with the stored credentials.
    pub async fn forward(
        &self,
        bearer: &str,
        setting_id: &str,
        method: &str,
        url: &str,
        depth: Option<&str>,
        body: Option<String>,
    ) -> ProtocolResult<ForwardResponse> {
        let request = ProxyRequest::Forward {
            setting_id: setting_id.to_string(),
            method: method.to_string(),
            url: url.to_string(),
            depth: depth.map(str::to_string),
            body,
        };
        self.call(bearer, &request).await
    }
}

fn truncate(body: &str, max: usize) -> String {
    match body.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
