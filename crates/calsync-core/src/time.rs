//! Time types for calendar events.
//!
//! Events are date-scoped and optionally time-ranged: an [`EventTime`] is
//! either a specific instant (stored in UTC) or a whole day.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Represents the start or end of a calendar event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum EventTime {
    /// A specific datetime, stored in UTC.
    DateTime(DateTime<Utc>),
    /// An all-day event date (no specific time).
    AllDay(NaiveDate),
}

impl EventTime {
    /// Creates a new `EventTime::DateTime` from a UTC datetime.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self::DateTime(dt)
    }

    /// Creates a new `EventTime::DateTime` from a datetime in any timezone.
    pub fn from_local<Tz: TimeZone>(dt: DateTime<Tz>) -> Self {
        Self::DateTime(dt.with_timezone(&Utc))
    }

    /// Creates a new `EventTime::AllDay` from a date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self::AllDay(date)
    }

    /// Returns `true` if this is an all-day event time.
    pub fn is_all_day(&self) -> bool {
        matches!(self, Self::AllDay(_))
    }

    /// Returns the datetime if this is a `DateTime` variant.
    pub fn as_datetime(&self) -> Option<&DateTime<Utc>> {
        match self {
            Self::DateTime(dt) => Some(dt),
            Self::AllDay(_) => None,
        }
    }

    /// Converts to a UTC datetime for comparison purposes.
    ///
    /// For all-day events, returns midnight UTC on that date.
    pub fn to_utc_datetime(&self) -> DateTime<Utc> {
        match self {
            Self::DateTime(dt) => *dt,
            Self::AllDay(date) => date.and_time(NaiveTime::MIN).and_utc(),
        }
    }

    /// Returns the date portion of this event time.
    pub fn date(&self) -> NaiveDate {
        match self {
            Self::DateTime(dt) => dt.date_naive(),
            Self::AllDay(date) => *date,
        }
    }
}

impl PartialOrd for EventTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_utc_datetime().cmp(&other.to_utc_datetime())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_datetime() -> DateTime<Utc> {
        "2025-02-05T10:00:00Z".parse().unwrap()
    }

    #[test]
    fn all_day_compares_at_midnight() {
        let day = EventTime::from_date(NaiveDate::from_ymd_opt(2025, 2, 5).unwrap());
        let morning = EventTime::from_utc(sample_datetime());

        assert!(day.is_all_day());
        assert!(day < morning);
        assert_eq!(day.date(), morning.date());
        assert_eq!(
            day.to_utc_datetime(),
            "2025-02-05T00:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn from_local_converts_to_utc() {
        let offset = chrono::FixedOffset::east_opt(2 * 3600).unwrap();
        let local = offset.with_ymd_and_hms(2025, 2, 5, 12, 0, 0).unwrap();
        assert_eq!(
            EventTime::from_local(local).as_datetime(),
            Some(&sample_datetime())
        );
    }

    #[test]
    fn serde_shape_is_tagged() {
        let json = serde_json::to_string(&EventTime::from_utc(sample_datetime())).unwrap();
        assert_eq!(json, r#"{"type":"DateTime","value":"2025-02-05T10:00:00Z"}"#);
    }
}
