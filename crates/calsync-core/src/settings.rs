//! Per-user sync settings and per-calendar sync cursors.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::url::CalendarUrl;

/// Default interval between background syncs.
pub const DEFAULT_SYNC_INTERVAL_MINUTES: u32 = 15;

fn default_interval() -> u32 {
    DEFAULT_SYNC_INTERVAL_MINUTES
}

/// One user's sync configuration.
///
/// The password is held in memory only and never serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    pub server_url: String,
    pub username: String,
    #[serde(skip)]
    pub password: Option<String>,
    #[serde(default)]
    pub selected_calendar_urls: BTreeSet<CalendarUrl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(default = "default_interval")]
    pub sync_interval_minutes: u32,
}

impl SyncSettings {
    pub fn new(server_url: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            username: username.into(),
            password: None,
            selected_calendar_urls: BTreeSet::new(),
            last_sync_at: None,
            sync_interval_minutes: DEFAULT_SYNC_INTERVAL_MINUTES,
        }
    }

    /// Replaces the selection; every URL is normalized.
    #[must_use]
    pub fn with_selection<I, U>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = U>,
        U: Into<CalendarUrl>,
    {
        self.selected_calendar_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_selected(&self, url: &CalendarUrl) -> bool {
        self.selected_calendar_urls.contains(url)
    }
}

/// A calendar-scoped server cursor.
///
/// Servers with RFC 6578 support hand out opaque tokens. For the rest the
/// engine records when the last full snapshot was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SyncToken {
    Opaque(String),
    Timestamp(DateTime<Utc>),
}

impl SyncToken {
    /// The server token, if this cursor can drive an incremental fetch.
    pub fn as_opaque(&self) -> Option<&str> {
        match self {
            Self::Opaque(token) => Some(token),
            Self::Timestamp(_) => None,
        }
    }
}
