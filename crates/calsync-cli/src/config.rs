//! CLI configuration.
//!
//! All settings live in one `config.toml`, by default at
//! `~/.config/calsync/config.toml`:
//!
//! ```toml
//! [account]
//! server_url = "https://caldav.icloud.com"
//! username = "me@icloud.com"
//! password = "pass::caldav/icloud"
//!
//! [session]
//! user_id = "me"
//! access_token = "env::CALSYNC_TOKEN"
//!
//! [proxy]
//! endpoint = "https://sync.example.com/caldav-proxy"
//!
//! [sync]
//! fetch_timeout_secs = 60
//! ```
//!
//! `password` and `access_token` accept secret references (`pass::…`, `env::…`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use calsync_caldav::CalDavConfig;
use calsync_core::Session;
use calsync_engine::EngineConfig;
use calsync_protocol::{DEFAULT_PROXY_TIMEOUT, ProxyChannel};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::secret;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub account: Option<AccountSettings>,
    pub session: SessionSettings,
    pub proxy: Option<ProxySettings>,
    pub sync: SyncSettings,
}

/// The CalDAV account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountSettings {
    pub server_url: String,
    pub username: String,
    /// Direct password (supports secret references).
    pub password: Option<String>,
    /// Handle of credentials stored behind the proxy.
    pub setting_id: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_true")]
    pub verify_tls: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub user_id: String,
    /// Bearer token for the credential proxy (supports secret references).
    pub access_token: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            user_id: "default".to_string(),
            access_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    pub endpoint: String,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Where sync state and events are stored; defaults to the user data dir.
    pub data_dir: Option<PathBuf>,
    pub fetch_timeout_secs: Option<u64>,
    pub max_concurrent_fetches: Option<usize>,
}

impl ClientConfig {
    /// Loads the configuration from the default path, if it exists.
    pub fn load() -> ClientResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ClientResult<Self> {
        toml::from_str(content).map_err(|e| ClientError::config(format!("failed to parse config: {e}")))
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("calsync")
            .join("config.toml")
    }

    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("calsync")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.sync.data_dir.clone().unwrap_or_else(Self::default_data_dir)
    }

    pub fn account(&self) -> ClientResult<&AccountSettings> {
        self.account
            .as_ref()
            .ok_or_else(|| ClientError::config("no [account] section in config"))
    }

    /// The session, with its access token resolved.
    pub fn session(&self) -> ClientResult<Session> {
        let user_id = self.session.user_id.trim();
        if user_id.is_empty() {
            return Err(ClientError::config("session.user_id must not be empty"));
        }
        let mut session = Session::new(user_id);
        if let Some(token) = secret::resolve_opt(self.session.access_token.as_deref())? {
            session = session.with_access_token(token);
        }
        Ok(session)
    }

    pub fn proxy_channel(&self) -> ClientResult<Option<ProxyChannel>> {
        let Some(proxy) = &self.proxy else {
            return Ok(None);
        };
        let timeout = proxy
            .timeout_secs
            .map_or(DEFAULT_PROXY_TIMEOUT, Duration::from_secs);
        ProxyChannel::with_timeout(&proxy.endpoint, timeout)
            .map(Some)
            .map_err(|e| ClientError::config(format!("invalid proxy endpoint: {e}")))
    }

    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::new(self.data_dir());
        if let Some(secs) = self.sync.fetch_timeout_secs {
            config = config.with_fetch_timeout(Duration::from_secs(secs));
        }
        if let Some(max) = self.sync.max_concurrent_fetches {
            config = config.with_max_concurrent_fetches(max);
        }
        config
    }
}

impl AccountSettings {
    /// Connection settings with secrets resolved.
    ///
    /// The result may still lack both password and `setting_id`; callers
    /// fill those from the credential store.
    pub fn to_caldav_config(&self) -> ClientResult<CalDavConfig> {
        let mut config = CalDavConfig::new(&self.server_url, &self.username)
            .with_verify_tls(self.verify_tls);
        if let Some(password) = secret::resolve_opt(self.password.as_deref())? {
            config = config.with_password(password);
        }
        if let Some(id) = self.setting_id.as_deref().filter(|s| !s.is_empty()) {
            config = config.with_setting_id(id);
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }
}
