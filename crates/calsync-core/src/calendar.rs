//! Remote calendars and their local projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::url::CalendarUrl;

/// A calendar collection discovered on the CalDAV server.
///
/// Identity is the normalized `url`; `display_name` and `color` may change
/// between discoveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calendar {
    pub url: CalendarUrl,
    pub display_name: String,
    /// `#RRGGBB` when the server advertises a color.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub is_shared: bool,
    #[serde(default)]
    pub is_subscription: bool,
    #[serde(default)]
    pub read_only: bool,
}

impl Calendar {
    pub fn new(url: impl Into<CalendarUrl>, display_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            display_name: display_name.into(),
            color: None,
            is_shared: false,
            is_subscription: false,
            read_only: false,
        }
    }

    #[must_use]
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    #[must_use]
    pub fn shared(mut self) -> Self {
        self.is_shared = true;
        self
    }

    /// Marks the calendar as a subscription, which also makes it read-only.
    #[must_use]
    pub fn subscription(mut self) -> Self {
        self.is_subscription = true;
        self.read_only = true;
        self
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Whether events of this calendar may be edited locally.
    pub fn accepts_local_edits(&self) -> bool {
        !self.read_only && !self.is_subscription
    }
}

/// Persisted projection of a selected [`Calendar`].
///
/// Created on selection, refreshed on every sync pass, removed only on
/// disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarMetadata {
    #[serde(flatten)]
    pub calendar: Calendar,
    /// End of the last successful sync pass for this calendar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl CalendarMetadata {
    pub fn url(&self) -> &CalendarUrl {
        &self.calendar.url
    }

    /// Takes the server-side fields from a fresh discovery, keeping local state.
    pub fn refresh(&mut self, calendar: &Calendar) {
        self.calendar.display_name.clone_from(&calendar.display_name);
        self.calendar.color.clone_from(&calendar.color);
        self.calendar.is_shared = calendar.is_shared;
        self.calendar.is_subscription = calendar.is_subscription;
        self.calendar.read_only = calendar.read_only;
    }

    pub fn mark_synced(&mut self, at: DateTime<Utc>) {
        self.last_synced_at = Some(at);
    }
}

impl From<Calendar> for CalendarMetadata {
    fn from(calendar: Calendar) -> Self {
        Self {
            calendar,
            last_synced_at: None,
        }
    }
}
