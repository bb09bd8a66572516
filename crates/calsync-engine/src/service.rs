//! The operations the host application calls.

use std::sync::Arc;

use calsync_caldav::{CalDavApi, CalDavClient, CalDavConfig, CalDavResult, ProxyRoute};
use calsync_core::{
    Calendar, CalendarUrl, EventKey, LocalEvent, Session, SyncSettings,
    normalize_with_base,
};
use calsync_protocol::ProxyChannel;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::EngineConfig;
use crate::credentials::CredentialStore;
use crate::engine::{SyncEngine, SyncReport, TeardownReport};
use crate::error::{SyncError, SyncResult};
use crate::events::{EventStore, LocalEventStore};
use crate::sync_state::SyncStateStore;

/// Builds a CalDAV client for a config and session.
pub trait ClientFactory: Send + Sync {
    fn connect(&self, config: &CalDavConfig, session: &Session) -> CalDavResult<Box<dyn CalDavApi>>;
}

/// Connects real [`CalDavClient`]s, routing stored credentials through the
/// proxy with the session's bearer token.
pub struct CalDavClientFactory {
    proxy: Option<ProxyChannel>,
}

impl CalDavClientFactory {
    pub fn new(proxy: Option<ProxyChannel>) -> Self {
        Self { proxy }
    }
}

impl ClientFactory for CalDavClientFactory {
    fn connect(&self, config: &CalDavConfig, session: &Session) -> CalDavResult<Box<dyn CalDavApi>> {
        let route = match (&self.proxy, session.bearer()) {
            (Some(channel), Some(bearer)) => Some(ProxyRoute {
                channel: channel.clone(),
                bearer: bearer.to_string(),
            }),
            _ => None,
        };
        Ok(Box::new(CalDavClient::connect(config, route)?))
    }
}

/// CalDAV sync for the host application.
pub struct CalendarSync {
    engine: SyncEngine,
    credentials: CredentialStore,
    state: Arc<SyncStateStore>,
    clients: Arc<dyn ClientFactory>,
}

impl CalendarSync {
    /// Wires the stores and engine for `config`, talking to real servers.
    pub fn new(config: EngineConfig, proxy: Option<ProxyChannel>) -> Self {
        let clients = Arc::new(CalDavClientFactory::new(proxy.clone()));
        Self::with_clients(config, proxy, clients)
    }

    pub fn with_clients(
        config: EngineConfig,
        proxy: Option<ProxyChannel>,
        clients: Arc<dyn ClientFactory>,
    ) -> Self {
        let state = Arc::new(SyncStateStore::new(config.storage.clone()));
        let events: Arc<dyn EventStore> = Arc::new(LocalEventStore::new(config.storage.clone()));
        let credentials = CredentialStore::new(proxy, config.storage.clone());
        Self {
            engine: SyncEngine::new(config, events, state.clone()),
            credentials,
            state,
            clients,
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn state(&self) -> &SyncStateStore {
        &self.state
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Authenticates, lists the user's calendars and records their metadata,
    /// including the flags that decide whether local edits are accepted.
    ///
    /// When `config` carries a password the credentials are saved on the
    /// side; failures there are logged and do not fail the call.
    pub async fn get_calendars(
        &self,
        session: &Session,
        config: &CalDavConfig,
    ) -> SyncResult<Vec<Calendar>> {
        let client = self.clients.connect(config, session)?;
        let deadline = self.engine.config().fetch_timeout;
        let calendars = tokio::time::timeout(deadline, client.authenticate_and_discover())
            .await
            .map_err(|_| SyncError::timeout("calendar discovery", deadline.as_secs()))??;

        if let Err(e) = self.state.refresh_metadata(session, &calendars) {
            warn!(error = %e, "failed to refresh calendar metadata");
        }
        self.remember_account(session, config).await;

        info!(count = calendars.len(), "listed calendars");
        Ok(calendars)
    }

    /// Best-effort credential and settings auto-save after discovery.
    async fn remember_account(&self, session: &Session, config: &CalDavConfig) {
        let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) else {
            return;
        };

        let saved = if self.credentials.proxy().is_some() && session.is_active() {
            self.credentials
                .save_settings(session, &config.server_url, &config.username, password)
                .await
                .map(|_| ())
        } else {
            self.credentials
                .save_legacy(session, &config.server_url, &config.username)
        };
        if let Err(e) = saved {
            warn!(error = %e, "failed to save CalDAV credentials");
        }

        let result = match self.state.get(session) {
            Ok(Some(_)) => Ok(()),
            Ok(None) => self.state.save(
                session,
                SyncSettings::new(config.server_url.clone(), config.username.clone()),
            ),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(error = %e, "failed to save sync settings");
        }
    }

    /// Syncs the given calendars and returns the change counts.
    ///
    /// URLs are normalized against the server root before use.
    pub async fn sync_selected_calendars<S: AsRef<str>>(
        &self,
        session: &Session,
        config: &CalDavConfig,
        calendar_urls: &[S],
        last_sync_at: Option<DateTime<Utc>>,
    ) -> SyncResult<SyncReport> {
        let client = self.clients.connect(config, session)?;
        let selected: Vec<CalendarUrl> = calendar_urls
            .iter()
            .map(|url| Self::normalize_calendar_url(url.as_ref(), Some(config.server_url.as_str())))
            .map(CalendarUrl::from)
            .collect();
        self.engine
            .sync(session, client.as_ref(), &selected, last_sync_at)
            .await
    }

    /// Canonical form of a calendar URL, resolved against `server_url` when
    /// relative.
    pub fn normalize_calendar_url(url: &str, server_url: Option<&str>) -> String {
        let base = server_url.and_then(|s| Url::parse(s.trim()).ok());
        normalize_with_base(url, base.as_ref())
    }

    /// Records the user's selection and the metadata of the chosen calendars.
    ///
    /// Metadata of other calendars is kept, and deselected calendars keep
    /// their events until disconnect.
    pub fn select_calendars(
        &self,
        session: &Session,
        calendars: &[Calendar],
    ) -> SyncResult<SyncSettings> {
        let mut settings = self.state.get(session)?.ok_or(SyncError::NotConfigured)?;
        settings.selected_calendar_urls = calendars.iter().map(|c| c.url.clone()).collect();

        self.state.refresh_metadata(session, calendars)?;
        self.state.save(session, settings.clone())?;
        debug!(count = calendars.len(), "saved calendar selection");
        Ok(settings)
    }

    /// Applies a local edit; see [`SyncEngine::record_local_edit`].
    pub fn record_local_edit(
        &self,
        session: &Session,
        key: &EventKey,
        edit: impl FnOnce(&mut LocalEvent),
    ) -> SyncResult<LocalEvent> {
        self.engine.record_local_edit(session, key, edit)
    }

    /// Disconnects: removes synced events, tokens, settings and metadata,
    /// then the stored credentials.
    ///
    /// # Errors
    ///
    /// When only the credential removal fails, the error is
    /// [`SyncError::CredentialsNotDeleted`] and carries the teardown report:
    /// local data is gone and a retry only has the credentials left to do.
    pub async fn delete_all_caldav_data(&self, session: &Session) -> SyncResult<TeardownReport> {
        let report = self.engine.teardown(session).await?;
        if let Err(source) = self.credentials.delete_settings(session).await {
            warn!(error = %source, "local CalDAV data removed, credentials were not");
            return Err(SyncError::CredentialsNotDeleted { report, source });
        }
        Ok(report)
    }
}
