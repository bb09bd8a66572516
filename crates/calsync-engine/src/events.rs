//! Local event storage.

use std::collections::{BTreeSet, HashSet};

use calsync_core::{CalendarUrl, EventKey, LocalEvent, Session};
use tracing::debug;

use crate::error::StoreResult;
use crate::storage::{Document, StorageLocation};

/// Writes for one calendar, applied all at once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBatch {
    /// Inserted or replaced events, matched by [`EventKey`].
    pub upserts: Vec<LocalEvent>,
    /// Remote URLs to remove. Missing events are ignored.
    pub deletes: Vec<CalendarUrl>,
}

impl EventBatch {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

/// Storage for synced events.
///
/// Implementations must apply a batch atomically: after an error, none of
/// the batch is visible.
pub trait EventStore: Send + Sync {
    /// Events of one calendar.
    fn events(&self, session: &Session, calendar: &CalendarUrl) -> StoreResult<Vec<LocalEvent>>;

    fn get(&self, session: &Session, key: &EventKey) -> StoreResult<Option<LocalEvent>>;

    /// Every calendar that owns at least one stored event, sorted.
    fn calendars(&self, session: &Session) -> StoreResult<Vec<CalendarUrl>>;

    fn apply(&self, session: &Session, calendar: &CalendarUrl, batch: &EventBatch)
    -> StoreResult<()>;

    /// Removes every event of the given calendars and returns the count.
    fn remove_calendars(&self, session: &Session, calendars: &[CalendarUrl])
    -> StoreResult<usize>;
}

/// [`EventStore`] over a per-user JSON document.
pub struct LocalEventStore {
    doc: Document<Vec<LocalEvent>>,
}

impl LocalEventStore {
    pub fn new(location: StorageLocation) -> Self {
        Self {
            doc: Document::new(location, "events"),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(StorageLocation::Memory)
    }

    /// Every stored event of the user.
    pub fn all(&self, session: &Session) -> StoreResult<Vec<LocalEvent>> {
        self.doc.read(session, |events| events.clone())
    }
}

impl EventStore for LocalEventStore {
    fn events(&self, session: &Session, calendar: &CalendarUrl) -> StoreResult<Vec<LocalEvent>> {
        self.doc.read(session, |events| {
            events
                .iter()
                .filter(|e| e.calendar_url == *calendar)
                .cloned()
                .collect()
        })
    }

    fn get(&self, session: &Session, key: &EventKey) -> StoreResult<Option<LocalEvent>> {
        self.doc.read(session, |events| {
            events
                .iter()
                .find(|e| e.calendar_url == key.calendar_url && e.remote_url == key.remote_url)
                .cloned()
        })
    }

    fn calendars(&self, session: &Session) -> StoreResult<Vec<CalendarUrl>> {
        self.doc.read(session, |events| {
            let owners: BTreeSet<&CalendarUrl> = events.iter().map(|e| &e.calendar_url).collect();
            owners.into_iter().cloned().collect()
        })
    }

    fn apply(
        &self,
        session: &Session,
        calendar: &CalendarUrl,
        batch: &EventBatch,
    ) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.doc.update(session, |events| {
            let deletes: HashSet<&CalendarUrl> = batch.deletes.iter().collect();
            events.retain(|e| !(e.calendar_url == *calendar && deletes.contains(&e.remote_url)));

            for event in &batch.upserts {
                match events
                    .iter_mut()
                    .find(|e| e.calendar_url == event.calendar_url && e.remote_url == event.remote_url)
                {
                    Some(existing) => *existing = event.clone(),
                    None => events.push(event.clone()),
                }
            }
            debug!(
                calendar = %calendar,
                upserts = batch.upserts.len(),
                deletes = batch.deletes.len(),
                "applied event batch"
            );
            Ok(())
        })
    }

    fn remove_calendars(
        &self,
        session: &Session,
        calendars: &[CalendarUrl],
    ) -> StoreResult<usize> {
        self.doc.update(session, |events| {
            let before = events.len();
            events.retain(|e| !calendars.contains(&e.calendar_url));
            Ok(before - events.len())
        })
    }
}
