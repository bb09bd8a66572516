//! Calendar objects as fetched from the server.

use calsync_core::{CalendarUrl, EventStatus, EventTime};
use chrono::{DateTime, Utc};

/// One VEVENT resource on the server, already mapped to workspace types.
///
/// Fields the local model has no use for (attendees, alarms, attachments)
/// are dropped during parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEvent {
    /// Normalized URL of the calendar object resource.
    pub url: CalendarUrl,
    pub etag: Option<String>,
    pub uid: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub recurrence_rule: Option<String>,
    pub status: Option<EventStatus>,
    /// `LAST-MODIFIED`, falling back to `DTSTAMP`.
    pub last_modified: Option<DateTime<Utc>>,
}

impl RemoteEvent {
    pub fn is_all_day(&self) -> bool {
        self.start.is_all_day()
    }
}
