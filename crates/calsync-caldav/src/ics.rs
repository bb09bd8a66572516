//! iCalendar (RFC 5545) parsing into [`RemoteEvent`].

use calsync_core::{CalendarUrl, EventStatus, EventTime};
use chrono::{Duration, TimeZone, Utc};
use icalendar::{
    Calendar, CalendarComponent, CalendarDateTime, Component, DatePerhapsTime, Event, EventLike,
};
use tracing::{debug, warn};

use crate::remote_event::RemoteEvent;

/// Parses the calendar data of one calendar object resource.
///
/// A resource holds one event, possibly with overridden instances; the
/// master component (the one without `RECURRENCE-ID`) is returned. Returns
/// `None` for resources without a usable VEVENT, such as tasks.
pub fn parse_calendar_object(
    url: CalendarUrl,
    etag: Option<String>,
    ics: &str,
) -> Option<RemoteEvent> {
    let calendar = match normalize_line_endings(ics).parse::<Calendar>() {
        Ok(calendar) => calendar,
        Err(e) => {
            warn!(url = %url, error = %e, "failed to parse calendar data");
            return None;
        }
    };

    let events: Vec<&Event> = calendar
        .iter()
        .filter_map(|component| match component {
            CalendarComponent::Event(event) => Some(event),
            _ => None,
        })
        .collect();

    let master = events
        .iter()
        .find(|e| e.property_value("RECURRENCE-ID").is_none())
        .or_else(|| events.first())?;

    let parsed = map_event(master, url, etag);
    if let Some(event) = &parsed {
        debug!(uid = %event.uid, start = ?event.start, "parsed calendar object");
    }
    parsed
}

fn map_event(event: &Event, url: CalendarUrl, etag: Option<String>) -> Option<RemoteEvent> {
    let uid = event.get_uid()?.to_string();
    let start = convert_time(event.get_start()?);
    let end = match event.get_end() {
        Some(end) => convert_time(end),
        None => default_end(&start, event.property_value("DURATION")),
    };

    Some(RemoteEvent {
        url,
        etag,
        uid,
        summary: event.get_summary().map(str::to_string),
        description: event.get_description().map(str::to_string),
        location: event.get_location().map(str::to_string),
        start,
        end,
        recurrence_rule: event.property_value("RRULE").map(str::to_string),
        status: event.property_value("STATUS").and_then(EventStatus::from_ical),
        last_modified: event.get_last_modified().or_else(|| event.get_timestamp()),
    })
}

/// End for events without `DTEND`: `DURATION` if given, otherwise one day
/// for all-day events and zero length for timed ones.
fn default_end(start: &EventTime, duration: Option<&str>) -> EventTime {
    let duration = duration.and_then(parse_duration);
    match (start, duration) {
        (EventTime::DateTime(dt), Some(d)) => EventTime::DateTime(*dt + d),
        (EventTime::DateTime(dt), None) => EventTime::DateTime(*dt),
        (EventTime::AllDay(date), d) => {
            let days = d.map_or(1, |d| d.num_days().max(1));
            EventTime::AllDay(*date + Duration::days(days))
        }
    }
}

/// Zoned times are taken as UTC; no timezone database is consulted.
fn convert_time(value: DatePerhapsTime) -> EventTime {
    match value {
        DatePerhapsTime::Date(date) => EventTime::AllDay(date),
        DatePerhapsTime::DateTime(CalendarDateTime::Utc(dt)) => EventTime::DateTime(dt),
        DatePerhapsTime::DateTime(CalendarDateTime::Floating(naive)) => {
            EventTime::DateTime(Utc.from_utc_datetime(&naive))
        }
        DatePerhapsTime::DateTime(CalendarDateTime::WithTimezone { date_time, .. }) => {
            EventTime::DateTime(Utc.from_utc_datetime(&date_time))
        }
    }
}

/// Parses a positive RFC 5545 duration such as `PT1H30M` or `P1W`.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let rest = value.trim().strip_prefix('+').unwrap_or(value.trim());
    let rest = rest.strip_prefix('P')?;

    let mut total = Duration::zero();
    let mut number = String::new();
    let mut in_time = false;
    for c in rest.chars() {
        match c {
            '0'..='9' => number.push(c),
            'T' => in_time = true,
            unit => {
                let n: i64 = number.parse().ok()?;
                number.clear();
                total += match (unit, in_time) {
                    ('W', false) => Duration::weeks(n),
                    ('D', false) => Duration::days(n),
                    ('H', true) => Duration::hours(n),
                    ('M', true) => Duration::minutes(n),
                    ('S', true) => Duration::seconds(n),
                    _ => return None,
                };
            }
        }
    }
    number.is_empty().then_some(total)
}

/// Folds every line ending to CRLF so the parser sees RFC 5545 input.
fn normalize_line_endings(ics: &str) -> String {
    ics.replace("\r\n", "\n").replace('\n', "\r\n")
}
