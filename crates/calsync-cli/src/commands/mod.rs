//! Subcommand implementations.

pub mod calendars;
pub mod config;
pub mod credentials;
pub mod sync;

use calsync_caldav::CalDavConfig;
use calsync_core::Session;
use calsync_engine::CalendarSync;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::ClientResult;

/// Everything a command needs: the loaded config, the session and the facade.
pub struct Context {
    pub config: ClientConfig,
    pub session: Session,
    pub sync: CalendarSync,
}

impl Context {
    pub fn open(config: ClientConfig) -> ClientResult<Self> {
        let session = config.session()?;
        let proxy = config.proxy_channel()?;
        let sync = CalendarSync::new(config.engine_config(), proxy);
        Ok(Self {
            config,
            session,
            sync,
        })
    }

    /// Connection settings for the configured account.
    ///
    /// Without a password in the config, the `setting_id` of stored proxy
    /// credentials is used.
    pub async fn caldav_config(&self) -> ClientResult<CalDavConfig> {
        let mut caldav = self.config.account()?.to_caldav_config()?;
        if caldav.credential_source().is_err()
            && let Some(stored) = self.sync.credentials().load_settings(&self.session).await?
            && let Some(setting_id) = stored.setting_id
        {
            debug!("using stored proxy credentials");
            caldav = caldav.with_setting_id(setting_id);
        }
        Ok(caldav)
    }
}
