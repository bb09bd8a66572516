//! Local calendar events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time::EventTime;
use crate::url::CalendarUrl;

/// Event status as carried by iCalendar `STATUS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

impl EventStatus {
    /// Parses an iCalendar `STATUS` value; unknown values yield `None`.
    pub fn from_ical(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CONFIRMED" => Some(Self::Confirmed),
            "TENTATIVE" => Some(Self::Tentative),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Identity of a synced event: owning calendar plus remote resource URL.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub calendar_url: CalendarUrl,
    pub remote_url: CalendarUrl,
}

impl EventKey {
    pub fn new(calendar_url: CalendarUrl, remote_url: CalendarUrl) -> Self {
        Self {
            calendar_url,
            remote_url,
        }
    }
}

/// An event held in the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEvent {
    /// Stable local identifier, assigned on first insert.
    pub id: String,
    pub calendar_url: CalendarUrl,
    /// URL of the calendar object resource on the server.
    pub remote_url: CalendarUrl,
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EventStatus>,
    /// `LAST-MODIFIED` (or `DTSTAMP`) of the remote copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_modified_at: Option<DateTime<Utc>>,
    /// Digest of the synced fields, used to skip no-op updates.
    #[serde(default)]
    pub content_hash: String,
    /// Set when the user edits the event locally; cleared when remote wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locally_modified_at: Option<DateTime<Utc>>,
}

impl LocalEvent {
    pub fn key(&self) -> EventKey {
        EventKey::new(self.calendar_url.clone(), self.remote_url.clone())
    }

    pub fn is_all_day(&self) -> bool {
        self.start.is_all_day()
    }

    pub fn has_local_edits(&self) -> bool {
        self.locally_modified_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parsing_is_case_insensitive() {
        assert_eq!(EventStatus::from_ical("confirmed"), Some(EventStatus::Confirmed));
        assert_eq!(EventStatus::from_ical(" CANCELLED "), Some(EventStatus::Cancelled));
        assert_eq!(EventStatus::from_ical("X-CUSTOM"), None);
    }

    #[test]
    fn key_uses_normalized_urls() {
        let a = EventKey::new(
            CalendarUrl::new("https://Example.com/cal/"),
            CalendarUrl::new("https://example.com/cal//e1.ics"),
        );
        let b = EventKey::new(
            CalendarUrl::new("https://example.com/cal"),
            CalendarUrl::new("https://example.com:443/cal/e1.ics"),
        );
        assert_eq!(a, b);
    }
}
