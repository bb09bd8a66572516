//! In-memory CalDAV server for engine tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use calsync_caldav::{
    BoxFuture, CalDavApi, CalDavError, CalDavResult, ChangeSet, FetchKind, RemoteEvent,
};
use calsync_core::{Calendar, CalendarUrl, EventTime, SyncToken};
use chrono::{DateTime, TimeZone, Utc};

#[derive(Default)]
struct FakeCalendar {
    revision: u64,
    events: BTreeMap<CalendarUrl, RemoteEvent>,
    /// (revision, resource) for every change.
    history: Vec<(u64, CalendarUrl)>,
    stalled: bool,
    failing_snapshots: bool,
}

#[derive(Default)]
struct Inner {
    calendars: HashMap<CalendarUrl, FakeCalendar>,
    invalid_tokens: HashSet<String>,
    fetches: Vec<(CalendarUrl, Option<SyncToken>)>,
    discovered: Vec<Calendar>,
}

/// A CalDAV server with per-calendar revisions; tokens are `rev-N`.
#[derive(Default)]
pub(crate) struct FakeCalDav {
    inner: Mutex<Inner>,
}

impl FakeCalDav {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn url_of(&self, calendar: &CalendarUrl, name: &str) -> CalendarUrl {
        CalendarUrl::new(format!("{calendar}/{name}.ics"))
    }

    fn write(
        &self,
        calendar: &CalendarUrl,
        name: &str,
        event: Option<(&str, Option<DateTime<Utc>>)>,
    ) {
        let url = self.url_of(calendar, name);
        let mut inner = self.inner.lock().unwrap();
        let cal = inner.calendars.entry(calendar.clone()).or_default();
        cal.revision += 1;
        cal.history.push((cal.revision, url.clone()));
        match event {
            Some((summary, last_modified)) => {
                let start = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
                cal.events.insert(
                    url.clone(),
                    RemoteEvent {
                        url,
                        etag: Some(cal.revision.to_string()),
                        uid: name.to_string(),
                        summary: Some(summary.to_string()),
                        description: None,
                        location: None,
                        start: EventTime::from_utc(start),
                        end: EventTime::from_utc(start + chrono::Duration::hours(1)),
                        recurrence_rule: None,
                        status: None,
                        last_modified,
                    },
                );
            }
            None => {
                cal.events.remove(&url);
            }
        }
    }

    pub(crate) fn put(&self, calendar: &CalendarUrl, name: &str, summary: &str) {
        self.write(calendar, name, Some((summary, None)));
    }

    pub(crate) fn put_modified_at(
        &self,
        calendar: &CalendarUrl,
        name: &str,
        summary: &str,
        at: DateTime<Utc>,
    ) {
        self.write(calendar, name, Some((summary, Some(at))));
    }

    pub(crate) fn remove(&self, calendar: &CalendarUrl, name: &str) {
        self.write(calendar, name, None);
    }

    pub(crate) fn invalidate(&self, token: &str) {
        self.inner.lock().unwrap().invalid_tokens.insert(token.to_string());
    }

    /// Makes full fetches of the calendar fail with `TokenInvalidated`.
    pub(crate) fn fail_snapshots(&self, calendar: &CalendarUrl) {
        let mut inner = self.inner.lock().unwrap();
        inner.calendars.entry(calendar.clone()).or_default().failing_snapshots = true;
    }

    /// Makes fetches of the calendar hang.
    pub(crate) fn stall(&self, calendar: &CalendarUrl) {
        let mut inner = self.inner.lock().unwrap();
        inner.calendars.entry(calendar.clone()).or_default().stalled = true;
    }

    pub(crate) fn set_discovered(&self, calendars: Vec<Calendar>) {
        self.inner.lock().unwrap().discovered = calendars;
    }

    pub(crate) fn fetches(&self) -> Vec<(CalendarUrl, Option<SyncToken>)> {
        self.inner.lock().unwrap().fetches.clone()
    }

    fn changes(&self, calendar: &CalendarUrl, since: Option<&SyncToken>) -> Result<ChangeSet, CalDavError> {
        let mut inner = self.inner.lock().unwrap();
        inner.fetches.push((calendar.clone(), since.cloned()));

        let opaque = since.and_then(SyncToken::as_opaque).map(str::to_string);
        if let Some(token) = &opaque
            && inner.invalid_tokens.contains(token)
        {
            return Err(CalDavError::token_invalidated("unknown sync token"));
        }

        let cal = inner.calendars.entry(calendar.clone()).or_default();
        let new_token = SyncToken::Opaque(format!("rev-{}", cal.revision));

        let Some(token) = opaque else {
            if cal.failing_snapshots {
                return Err(CalDavError::token_invalidated("snapshot refused"));
            }
            return Ok(ChangeSet {
                events: cal.events.values().cloned().collect(),
                deleted_urls: Vec::new(),
                new_token,
                kind: FetchKind::Snapshot,
            });
        };

        let since_rev: u64 = token
            .strip_prefix("rev-")
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        let touched: HashSet<&CalendarUrl> = cal
            .history
            .iter()
            .filter(|(rev, _)| *rev > since_rev)
            .map(|(_, url)| url)
            .collect();

        let mut events = Vec::new();
        let mut deleted_urls = Vec::new();
        for url in touched {
            match cal.events.get(url) {
                Some(event) => events.push(event.clone()),
                None => deleted_urls.push(url.clone()),
            }
        }
        Ok(ChangeSet {
            events,
            deleted_urls,
            new_token,
            kind: FetchKind::Delta,
        })
    }
}

impl CalDavApi for FakeCalDav {
    fn authenticate_and_discover(&self) -> BoxFuture<'_, CalDavResult<Vec<Calendar>>> {
        let calendars = self.inner.lock().unwrap().discovered.clone();
        Box::pin(async move { Ok(calendars) })
    }

    fn fetch_changes<'a>(
        &'a self,
        calendar_url: &'a CalendarUrl,
        since: Option<&'a SyncToken>,
    ) -> BoxFuture<'a, CalDavResult<ChangeSet>> {
        Box::pin(async move {
            let stalled = self
                .inner
                .lock()
                .unwrap()
                .calendars
                .get(calendar_url)
                .is_some_and(|c| c.stalled);
            if stalled {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
            }
            self.changes(calendar_url, since)
        })
    }
}
