//! CalDAV credential storage.
//!
//! Two backends with a fixed precedence:
//!
//! 1. the credential proxy, reached with the session's bearer token; the
//!    password is held server-side and only a `setting_id` comes back
//! 2. a legacy local record (server URL and username only), consulted when
//!    the proxy is unavailable
//!
//! Legacy records are never written with a password. [`CredentialStore::migrate_legacy`]
//! moves one to the proxy once the user supplies the password again.

use calsync_core::Session;
use calsync_protocol::ProxyChannel;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CredentialError, CredentialResult};
use crate::storage::{Document, StorageLocation};

/// Result of [`CredentialStore::load_settings`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredCredentials {
    pub server_url: String,
    pub username: String,
    /// Handle for proxied requests; `None` for legacy records.
    pub setting_id: Option<String>,
    pub has_password: bool,
    /// False when the record came from the legacy store.
    pub authoritative: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LegacyRecord {
    server_url: String,
    username: String,
    /// Older clients stored the password here; it is read only to be dropped.
    #[serde(default, skip_serializing)]
    password: Option<String>,
}

/// Credential store with the proxy as the authoritative backend.
pub struct CredentialStore {
    proxy: Option<ProxyChannel>,
    legacy: Document<Option<LegacyRecord>>,
}

impl CredentialStore {
    pub fn new(proxy: Option<ProxyChannel>, location: StorageLocation) -> Self {
        Self {
            proxy,
            legacy: Document::new(location, "legacy-credentials"),
        }
    }

    pub fn proxy(&self) -> Option<&ProxyChannel> {
        self.proxy.as_ref()
    }

    /// Proxy and bearer, when the secure path is usable.
    fn secure_path<'a>(&'a self, session: &'a Session) -> CredentialResult<(&'a ProxyChannel, &'a str)> {
        let proxy = self.proxy.as_ref().ok_or(CredentialError::NoProxy)?;
        let bearer = session.bearer().ok_or(CredentialError::NoSession)?;
        Ok((proxy, bearer))
    }

    /// Looks up the user's credentials, preferring the proxy.
    ///
    /// A proxy that answers "not found" is final. The legacy record is only
    /// read when the proxy cannot be used or fails.
    pub async fn load_settings(&self, session: &Session) -> CredentialResult<Option<StoredCredentials>> {
        match self.secure_path(session) {
            Ok((proxy, bearer)) => match proxy.load_settings(bearer).await {
                Ok(Some(account)) => {
                    return Ok(Some(StoredCredentials {
                        server_url: account.server_url,
                        username: account.username,
                        setting_id: Some(account.setting_id),
                        has_password: account.has_password,
                        authoritative: true,
                    }));
                }
                Ok(None) => return Ok(None),
                Err(e) => warn!(error = %e, "credential proxy failed, falling back to legacy store"),
            },
            Err(reason) => debug!(%reason, "secure credential path unavailable"),
        }

        let legacy = self.legacy.read(session, |record| record.clone())?;
        Ok(legacy.map(|record| StoredCredentials {
            server_url: record.server_url,
            username: record.username,
            setting_id: None,
            has_password: false,
            authoritative: false,
        }))
    }

    /// Stores the credentials behind the proxy and returns the `setting_id`.
    ///
    /// Nothing local is touched, so a failure leaves earlier settings intact.
    pub async fn save_settings(
        &self,
        session: &Session,
        server_url: &str,
        username: &str,
        password: &str,
    ) -> CredentialResult<String> {
        let (proxy, bearer) = self.secure_path(session)?;
        let setting_id = proxy
            .save_settings(bearer, server_url, username, password)
            .await?;
        info!(server = %server_url, "saved CalDAV credentials");
        Ok(setting_id)
    }

    /// Records server URL and username locally, for hosts without a proxy.
    pub fn save_legacy(&self, session: &Session, server_url: &str, username: &str) -> CredentialResult<()> {
        let record = LegacyRecord {
            server_url: server_url.to_string(),
            username: username.to_string(),
            password: None,
        };
        self.legacy.update(session, |slot| {
            *slot = Some(record);
            Ok(())
        })?;
        Ok(())
    }

    /// Removes the stored credentials from both backends.
    ///
    /// Without a proxy or session there is nothing remote to delete, which
    /// counts as success.
    pub async fn delete_settings(&self, session: &Session) -> CredentialResult<()> {
        self.legacy.remove(session)?;
        match self.secure_path(session) {
            Ok((proxy, bearer)) => {
                proxy.delete_settings(bearer).await?;
                info!("deleted CalDAV credentials");
            }
            Err(reason) => debug!(%reason, "no remote credentials to delete"),
        }
        Ok(())
    }

    /// Moves the legacy record to the proxy using `password`, then drops the
    /// local record. Returns the new `setting_id`.
    pub async fn migrate_legacy(&self, session: &Session, password: &str) -> CredentialResult<String> {
        let record = self
            .legacy
            .read(session, |record| record.clone())?
            .ok_or(CredentialError::NothingToMigrate)?;

        let setting_id = self
            .save_settings(session, &record.server_url, &record.username, password)
            .await?;
        self.legacy.remove(session)?;
        info!(server = %record.server_url, "migrated legacy CalDAV credentials");
        Ok(setting_id)
    }
}
