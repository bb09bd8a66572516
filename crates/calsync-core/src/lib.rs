//! Core types for calsync.
//!
//! Calendars, events, per-user sync settings and the explicit [`Session`]
//! value shared by every other crate in the workspace, plus the canonical
//! URL form used for all identity comparisons.

pub mod calendar;
pub mod event;
pub mod session;
pub mod settings;
pub mod time;
pub mod tracing;
pub mod url;

pub use calendar::{Calendar, CalendarMetadata};
pub use event::{EventKey, EventStatus, LocalEvent};
pub use session::Session;
pub use settings::{DEFAULT_SYNC_INTERVAL_MINUTES, SyncSettings, SyncToken};
pub use time::EventTime;
pub use url::{CalendarUrl, normalize_calendar_url, normalize_with_base};
