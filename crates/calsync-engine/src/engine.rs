//! The sync engine: pull remote changes and merge them into the local store.
//!
//! One pass per selected calendar, at most `max_concurrent_fetches` at a
//! time. Each pass holds the calendar's lock from the token read until the
//! new token is stored:
//!
//! 1. read the stored token (none means a full fetch)
//! 2. fetch changes; an invalidated token is cleared and the fetch retried
//!    once without it
//! 3. merge the changes into one [`EventBatch`] and apply it
//! 4. store the new token
//!
//! A failure anywhere before step 4 leaves the token where it was, so the
//! next pass re-requests the same changes. Applying them again is a no-op.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use calsync_caldav::{CalDavApi, ChangeSet, FetchKind, RemoteEvent};
use calsync_core::{CalendarUrl, EventKey, LocalEvent, Session, SyncToken};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{FailureKind, StoreError, SyncError, SyncResult};
use crate::events::{EventBatch, EventStore};
use crate::sync_state::SyncStateStore;

/// A calendar that did not sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarFailure {
    pub calendar: CalendarUrl,
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of [`SyncEngine::sync`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Remote updates skipped because the local edit is newer.
    pub conflicts_kept: usize,
    pub synced: Vec<CalendarUrl>,
    pub failed: Vec<CalendarFailure>,
}

impl SyncReport {
    /// Inserted + updated + deleted.
    pub fn changes(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn absorb(&mut self, calendar: CalendarUrl, counts: MergeCounts) {
        self.inserted += counts.inserted;
        self.updated += counts.updated;
        self.deleted += counts.deleted;
        self.conflicts_kept += counts.conflicts_kept;
        self.synced.push(calendar);
    }
}

/// Counts for one calendar pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct MergeCounts {
    inserted: usize,
    updated: usize,
    deleted: usize,
    conflicts_kept: usize,
}

/// What [`SyncEngine::teardown`] removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    pub calendars: usize,
    pub events_deleted: usize,
    pub tokens_cleared: usize,
}

type LockKey = (String, CalendarUrl);

pub struct SyncEngine {
    config: EngineConfig,
    events: Arc<dyn EventStore>,
    state: Arc<SyncStateStore>,
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl SyncEngine {
    pub fn new(config: EngineConfig, events: Arc<dyn EventStore>, state: Arc<SyncStateStore>) -> Self {
        Self {
            config,
            events,
            state,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<dyn EventStore> {
        &self.events
    }

    pub fn state(&self) -> &Arc<SyncStateStore> {
        &self.state
    }

    fn lock_for(&self, session: &Session, calendar: &CalendarUrl) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry((session.storage_key(), calendar.clone()))
            .or_default()
            .clone()
    }

    /// Syncs the selected calendars.
    ///
    /// Calendars fail independently; their failures are listed in the
    /// report. `last_sync_at` is informational: a calendar without a stored
    /// token always gets a full fetch.
    ///
    /// # Errors
    ///
    /// Only when recording the overall sync time fails.
    pub async fn sync(
        &self,
        session: &Session,
        api: &dyn CalDavApi,
        selected: &[CalendarUrl],
        last_sync_at: Option<DateTime<Utc>>,
    ) -> SyncResult<SyncReport> {
        let calendars: BTreeSet<&CalendarUrl> = selected.iter().collect();
        info!(
            calendars = calendars.len(),
            last_sync_at = ?last_sync_at,
            "starting sync"
        );

        let outcomes: Vec<(CalendarUrl, SyncResult<MergeCounts>)> = stream::iter(calendars)
            .map(|calendar| async move {
                let outcome = self.sync_calendar(session, api, calendar).await;
                (calendar.clone(), outcome)
            })
            .buffer_unordered(self.config.max_concurrent_fetches.max(1))
            .collect()
            .await;

        let mut report = SyncReport::default();
        for (calendar, outcome) in outcomes {
            match outcome {
                Ok(counts) => report.absorb(calendar, counts),
                Err(e) => {
                    warn!(calendar = %calendar, kind = %e.kind(), error = %e, "calendar sync failed");
                    report.failed.push(CalendarFailure {
                        calendar,
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }
        report.synced.sort();
        report.failed.sort_by(|a, b| a.calendar.cmp(&b.calendar));

        if !report.synced.is_empty() {
            self.state.touch_last_sync(session, Utc::now())?;
        }

        info!(
            changes = report.changes(),
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            failed = report.failed.len(),
            "sync finished"
        );
        Ok(report)
    }

    async fn sync_calendar(
        &self,
        session: &Session,
        api: &dyn CalDavApi,
        calendar: &CalendarUrl,
    ) -> SyncResult<MergeCounts> {
        let _guard: OwnedMutexGuard<()> = self
            .lock_for(session, calendar)
            .try_lock_owned()
            .map_err(|_| SyncError::Busy {
                calendar: calendar.clone(),
            })?;

        let token = self.state.token(session, calendar)?;
        let changes = match self.fetch(api, calendar, token.as_ref()).await {
            Err(e) if e.is_token_invalidated() && token.is_some() => {
                warn!(calendar = %calendar, "sync token rejected, falling back to full fetch");
                self.state.clear_token(session, calendar)?;
                self.fetch(api, calendar, None).await?
            }
            other => other?,
        };

        let counts = self.apply(session, calendar, &changes)?;
        self.state.set_token(session, calendar, changes.new_token)?;
        self.state.mark_synced(session, calendar, Utc::now())?;

        debug!(calendar = %calendar, kind = ?changes.kind, ?counts, "calendar synced");
        Ok(counts)
    }

    async fn fetch(
        &self,
        api: &dyn CalDavApi,
        calendar: &CalendarUrl,
        since: Option<&SyncToken>,
    ) -> SyncResult<ChangeSet> {
        let deadline = self.config.fetch_timeout;
        match tokio::time::timeout(deadline, api.fetch_changes(calendar, since)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SyncError::timeout(
                format!("fetching {calendar}"),
                deadline.as_secs(),
            )),
        }
    }

    /// Merges a change set into the calendar's events in one batch.
    fn apply(
        &self,
        session: &Session,
        calendar: &CalendarUrl,
        changes: &ChangeSet,
    ) -> SyncResult<MergeCounts> {
        let existing: HashMap<CalendarUrl, LocalEvent> = self
            .events
            .events(session, calendar)?
            .into_iter()
            .map(|e| (e.remote_url.clone(), e))
            .collect();

        let mut counts = MergeCounts::default();
        let mut batch = EventBatch::default();
        let mut seen: HashSet<&CalendarUrl> = HashSet::new();

        for remote in &changes.events {
            seen.insert(&remote.url);
            let hash = content_hash(remote);
            match existing.get(&remote.url) {
                None => {
                    batch.upserts.push(to_local(calendar, remote, None, hash));
                    counts.inserted += 1;
                }
                Some(local) if local.content_hash == hash && local.etag == remote.etag => {}
                Some(local) if keeps_local_edit(local, remote) => {
                    debug!(event = %remote.url, "keeping newer local edit");
                    counts.conflicts_kept += 1;
                }
                Some(local) => {
                    batch
                        .upserts
                        .push(to_local(calendar, remote, Some(&local.id), hash));
                    counts.updated += 1;
                }
            }
        }

        let mut removals: Vec<&CalendarUrl> = changes.deleted_urls.iter().collect();
        if changes.kind == FetchKind::Snapshot {
            removals.extend(existing.keys());
        }
        let mut queued: HashSet<&CalendarUrl> = HashSet::new();
        for url in removals {
            if existing.contains_key(url) && !seen.contains(url) && queued.insert(url) {
                batch.deletes.push(url.clone());
                counts.deleted += 1;
            }
        }

        self.events.apply(session, calendar, &batch)?;
        Ok(counts)
    }

    /// Applies a local edit to a synced event.
    ///
    /// Holds the calendar's lock for the read-modify-write, so an edit never
    /// interleaves with a sync pass applying remote changes.
    ///
    /// # Errors
    ///
    /// `Busy` while the calendar is syncing. `ReadOnly` for events of
    /// read-only or subscription calendars, and of calendars whose flags were
    /// never recorded. `EventNotFound` for unknown keys.
    pub fn record_local_edit(
        &self,
        session: &Session,
        key: &EventKey,
        edit: impl FnOnce(&mut LocalEvent),
    ) -> SyncResult<LocalEvent> {
        let _guard = self
            .lock_for(session, &key.calendar_url)
            .try_lock_owned()
            .map_err(|_| SyncError::Busy {
                calendar: key.calendar_url.clone(),
            })?;

        if !self.state.accepts_local_edits(session, &key.calendar_url)? {
            return Err(StoreError::ReadOnly {
                calendar: key.calendar_url.clone(),
            }
            .into());
        }

        let mut event = self
            .events
            .get(session, key)?
            .ok_or_else(|| StoreError::EventNotFound {
                remote_url: key.remote_url.clone(),
            })?;
        edit(&mut event);
        event.calendar_url = key.calendar_url.clone();
        event.remote_url = key.remote_url.clone();
        event.locally_modified_at = Some(Utc::now());

        let batch = EventBatch {
            upserts: vec![event.clone()],
            deletes: Vec::new(),
        };
        self.events.apply(session, &key.calendar_url, &batch)?;
        Ok(event)
    }

    /// Removes every synced event, token and the settings of the user.
    ///
    /// Events go first and tokens stay until the events are gone, so a
    /// failed teardown still knows which calendars to clean up and a retry
    /// finishes the job.
    pub async fn teardown(&self, session: &Session) -> SyncResult<TeardownReport> {
        let mut calendars: BTreeSet<CalendarUrl> =
            self.state.known_calendars(session)?.into_iter().collect();
        calendars.extend(self.events.calendars(session)?);
        let calendars: Vec<CalendarUrl> = calendars.into_iter().collect();

        let mut guards = Vec::with_capacity(calendars.len());
        for calendar in &calendars {
            guards.push(self.lock_for(session, calendar).lock_owned().await);
        }

        let events_deleted = self.events.remove_calendars(session, &calendars)?;
        let tokens_cleared = self.state.clear_tokens(session)?;
        self.state.purge(session)?;
        drop(guards);
        self.prune_locks(session);

        let report = TeardownReport {
            calendars: calendars.len(),
            events_deleted,
            tokens_cleared,
        };
        info!(?report, "removed all CalDAV data");
        Ok(report)
    }

    /// Forgets the user's idle calendar locks.
    fn prune_locks(&self, session: &Session) {
        let user = session.storage_key();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // A lock is only cloned out under the map lock, so a count of one
        // means nobody holds or waits on it.
        locks.retain(|(owner, _), lock| *owner != user || Arc::strong_count(lock) > 1);
    }
}

/// Local edits win unless the remote copy is strictly newer. Without a
/// remote revision stamp the remote copy wins.
fn keeps_local_edit(local: &LocalEvent, remote: &RemoteEvent) -> bool {
    match (local.locally_modified_at, remote.last_modified) {
        (Some(edited), Some(remote_at)) => remote_at <= edited,
        _ => false,
    }
}

fn to_local(
    calendar: &CalendarUrl,
    remote: &RemoteEvent,
    id: Option<&str>,
    content_hash: String,
) -> LocalEvent {
    LocalEvent {
        id: id.map_or_else(|| Uuid::new_v4().to_string(), str::to_string),
        calendar_url: calendar.clone(),
        remote_url: remote.url.clone(),
        uid: remote.uid.clone(),
        etag: remote.etag.clone(),
        title: remote.summary.clone().unwrap_or_default(),
        description: remote.description.clone(),
        location: remote.location.clone(),
        start: remote.start.clone(),
        end: remote.end.clone(),
        recurrence_rule: remote.recurrence_rule.clone(),
        status: remote.status,
        remote_modified_at: remote.last_modified,
        content_hash,
        locally_modified_at: None,
    }
}

/// SHA-256 over the synced fields.
fn content_hash(remote: &RemoteEvent) -> String {
    let fields = (
        &remote.uid,
        &remote.summary,
        &remote.description,
        &remote.location,
        &remote.start,
        &remote.end,
        &remote.recurrence_rule,
        &remote.status,
    );
    let mut hasher = Sha256::new();
    // Serializing plain data into a Vec cannot fail.
    if let Ok(bytes) = serde_json::to_vec(&fields) {
        hasher.update(bytes);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LocalEventStore;
    use crate::testing::FakeCalDav;
    use calsync_core::{Calendar, EventTime, SyncSettings};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn session() -> Session {
        Session::new("user-1")
    }

    fn cal(name: &str) -> CalendarUrl {
        CalendarUrl::new(format!("https://caldav.example.com/cal/{name}"))
    }

    struct Fixture {
        engine: SyncEngine,
        events: Arc<LocalEventStore>,
        state: Arc<SyncStateStore>,
    }

    fn fixture() -> Fixture {
        let events = Arc::new(LocalEventStore::in_memory());
        let state = Arc::new(SyncStateStore::in_memory());
        let engine = SyncEngine::new(
            EngineConfig::in_memory().with_fetch_timeout(Duration::from_secs(5)),
            events.clone(),
            state.clone(),
        );
        Fixture {
            engine,
            events,
            state,
        }
    }

    /// Records `calendar` as an ordinary writable calendar.
    fn writable(state: &SyncStateStore, calendar: CalendarUrl) {
        state
            .refresh_metadata(&session(), &[Calendar::new(calendar, "Work")])
            .unwrap();
    }

    /// Event store whose writes can be made to fail.
    struct FlakyStore {
        inner: LocalEventStore,
        fail_apply: AtomicBool,
        fail_remove: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: LocalEventStore::in_memory(),
                fail_apply: AtomicBool::new(false),
                fail_remove: AtomicBool::new(false),
            }
        }
    }

    fn disk_full() -> StoreError {
        StoreError::Io {
            path: "events.json".into(),
            source: std::io::Error::other("disk full"),
        }
    }

    impl EventStore for FlakyStore {
        fn events(&self, session: &Session, calendar: &CalendarUrl) -> crate::StoreResult<Vec<LocalEvent>> {
            self.inner.events(session, calendar)
        }

        fn get(&self, session: &Session, key: &EventKey) -> crate::StoreResult<Option<LocalEvent>> {
            self.inner.get(session, key)
        }

        fn apply(&self, session: &Session, calendar: &CalendarUrl, batch: &EventBatch) -> crate::StoreResult<()> {
            if self.fail_apply.load(Ordering::SeqCst) {
                return Err(disk_full());
            }
            self.inner.apply(session, calendar, batch)
        }

        fn calendars(&self, session: &Session) -> crate::StoreResult<Vec<CalendarUrl>> {
            self.inner.calendars(session)
        }

        fn remove_calendars(&self, session: &Session, calendars: &[CalendarUrl]) -> crate::StoreResult<usize> {
            if self.fail_remove.load(Ordering::SeqCst) {
                return Err(disk_full());
            }
            self.inner.remove_calendars(session, calendars)
        }
    }

    #[tokio::test]
    async fn first_sync_is_a_full_fetch() {
        let f = fixture();
        let server = FakeCalDav::new();
        server.put(&cal("work"), "a", "Standup");
        server.put(&cal("work"), "b", "Review");

        let report = f
            .engine
            .sync(&session(), &server, &[cal("work")], Some(Utc::now()))
            .await
            .unwrap();

        assert_eq!(report.changes(), 2);
        assert_eq!(report.inserted, 2);
        assert_eq!(server.fetches(), vec![(cal("work"), None)]);
        assert_eq!(
            f.state.token(&session(), &cal("work")).unwrap(),
            Some(SyncToken::Opaque("rev-2".into()))
        );
    }

    #[tokio::test]
    async fn delta_applies_updates_and_deletions() {
        let f = fixture();
        let server = FakeCalDav::new();
        server.put(&cal("work"), "a", "Standup");
        server.put(&cal("work"), "b", "Review");
        f.engine.sync(&session(), &server, &[cal("work")], None).await.unwrap();

        server.put(&cal("work"), "a", "Standup (moved)");
        server.remove(&cal("work"), "b");
        server.put(&cal("work"), "c", "Retro");

        let report = f.engine.sync(&session(), &server, &[cal("work")], None).await.unwrap();
        assert_eq!((report.inserted, report.updated, report.deleted), (1, 1, 1));
        assert_eq!(
            server.fetches().last(),
            Some(&(cal("work"), Some(SyncToken::Opaque("rev-2".into()))))
        );

        let mut titles: Vec<String> = f
            .events
            .events(&session(), &cal("work"))
            .unwrap()
            .into_iter()
            .map(|e| e.title)
            .collect();
        titles.sort();
        assert_eq!(titles, vec!["Retro", "Standup (moved)"]);
    }

    #[tokio::test]
    async fn invalidated_token_retries_once_with_full_fetch() {
        let f = fixture();
        let server = FakeCalDav::new();
        server.put(&cal("work"), "a", "Standup");
        f.state
            .set_token(&session(), &cal("work"), SyncToken::Opaque("stale".into()))
            .unwrap();
        server.invalidate("stale");

        let report = f.engine.sync(&session(), &server, &[cal("work")], None).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.inserted, 1);
        assert_eq!(
            server.fetches(),
            vec![
                (cal("work"), Some(SyncToken::Opaque("stale".into()))),
                (cal("work"), None)
            ]
        );
    }

    #[tokio::test]
    async fn second_invalidation_is_surfaced() {
        let f = fixture();
        let server = FakeCalDav::new();
        f.state
            .set_token(&session(), &cal("work"), SyncToken::Opaque("stale".into()))
            .unwrap();
        server.invalidate("stale");
        server.fail_snapshots(&cal("work"));

        let report = f.engine.sync(&session(), &server, &[cal("work")], None).await.unwrap();
        assert_eq!(server.fetches().len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].kind, FailureKind::TokenInvalidated);
        assert_eq!(f.state.token(&session(), &cal("work")).unwrap(), None);
    }

    #[tokio::test]
    async fn failed_apply_keeps_token_and_retry_converges() {
        let events = Arc::new(FlakyStore::new());
        let state = Arc::new(SyncStateStore::in_memory());
        let engine = SyncEngine::new(EngineConfig::in_memory(), events.clone(), state.clone());
        let server = FakeCalDav::new();
        server.put(&cal("work"), "a", "Standup");
        engine.sync(&session(), &server, &[cal("work")], None).await.unwrap();

        server.put(&cal("work"), "b", "Review");
        events.fail_apply.store(true, Ordering::SeqCst);
        let report = engine.sync(&session(), &server, &[cal("work")], None).await.unwrap();
        assert_eq!(report.failed[0].kind, FailureKind::Storage);
        assert_eq!(
            state.token(&session(), &cal("work")).unwrap(),
            Some(SyncToken::Opaque("rev-1".into()))
        );

        events.fail_apply.store(false, Ordering::SeqCst);
        let report = engine.sync(&session(), &server, &[cal("work")], None).await.unwrap();
        assert_eq!(report.inserted, 1);
        let fetches = server.fetches();
        assert_eq!(fetches[1], fetches[2]);
        assert_eq!(events.inner.events(&session(), &cal("work")).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn applying_the_same_delta_twice_is_a_noop() {
        let f = fixture();
        let server = FakeCalDav::new();
        server.put(&cal("work"), "a", "Standup");
        f.engine.sync(&session(), &server, &[cal("work")], None).await.unwrap();
        let before = f.events.all(&session()).unwrap();

        // Rewind the token so the same changes come back.
        f.state.clear_token(&session(), &cal("work")).unwrap();
        let report = f.engine.sync(&session(), &server, &[cal("work")], None).await.unwrap();

        assert_eq!(report.changes(), 0);
        assert_eq!(f.events.all(&session()).unwrap(), before);
    }

    #[tokio::test]
    async fn deleting_an_absent_event_is_fine() {
        let f = fixture();
        let server = FakeCalDav::new();
        server.put(&cal("work"), "a", "Standup");
        server.remove(&cal("work"), "a");
        f.state
            .set_token(&session(), &cal("work"), SyncToken::Opaque("rev-0".into()))
            .unwrap();

        let report = f.engine.sync(&session(), &server, &[cal("work")], None).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.changes(), 0);
    }

    #[tokio::test]
    async fn snapshot_drops_events_missing_remotely() {
        let f = fixture();
        let server = FakeCalDav::new();
        server.put(&cal("work"), "a", "Standup");
        server.put(&cal("work"), "b", "Review");
        f.engine.sync(&session(), &server, &[cal("work")], None).await.unwrap();

        server.remove(&cal("work"), "b");
        f.state.clear_token(&session(), &cal("work")).unwrap();
        let report = f.engine.sync(&session(), &server, &[cal("work")], None).await.unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(f.events.events(&session(), &cal("work")).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn only_selected_calendars_are_synced() {
        let f = fixture();
        let server = FakeCalDav::new();
        server.put(&cal("work"), "a", "Standup");
        server.put(&cal("home"), "b", "Dinner");
        server.put(&cal("holidays"), "c", "Holiday");

        let report = f
            .engine
            .sync(&session(), &server, &[cal("work"), cal("home")], None)
            .await
            .unwrap();

        assert_eq!(report.inserted, 2);
        assert_eq!(report.synced, vec![cal("home"), cal("work")]);
        let tokens = f.state.tokens(&session()).unwrap();
        assert_eq!(tokens.keys().cloned().collect::<Vec<_>>(), vec![cal("home"), cal("work")]);
        assert!(f.events.events(&session(), &cal("holidays")).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fails_only_that_calendar() {
        let f = fixture();
        let server = FakeCalDav::new();
        server.put(&cal("a"), "1", "One");
        server.put(&cal("b"), "2", "Two");
        server.put(&cal("c"), "3", "Three");
        server.stall(&cal("b"));

        let report = f
            .engine
            .sync(&session(), &server, &[cal("a"), cal("b"), cal("c")], None)
            .await
            .unwrap();

        assert_eq!(report.synced, vec![cal("a"), cal("c")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].calendar, cal("b"));
        assert_eq!(report.failed[0].kind, FailureKind::Timeout);
        assert_eq!(f.state.token(&session(), &cal("b")).unwrap(), None);
    }

    #[tokio::test]
    async fn busy_calendar_is_rejected() {
        let f = fixture();
        let server = FakeCalDav::new();
        server.put(&cal("work"), "a", "Standup");

        let _held = f.engine.lock_for(&session(), &cal("work")).try_lock_owned().unwrap();
        let report = f.engine.sync(&session(), &server, &[cal("work")], None).await.unwrap();

        assert_eq!(report.failed[0].kind, FailureKind::Busy);
        assert!(server.fetches().is_empty());
    }

    #[tokio::test]
    async fn sync_bumps_last_sync_at() {
        let f = fixture();
        let server = FakeCalDav::new();
        f.state
            .save(&session(), SyncSettings::new("https://caldav.example.com", "me"))
            .unwrap();
        server.put(&cal("work"), "a", "Standup");

        f.engine.sync(&session(), &server, &[cal("work")], None).await.unwrap();
        assert!(f.state.get(&session()).unwrap().unwrap().last_sync_at.is_some());
    }

    #[tokio::test]
    async fn newer_local_edit_survives_older_remote_update() {
        let f = fixture();
        let server = FakeCalDav::new();
        server.put(&cal("work"), "a", "Standup");
        f.engine.sync(&session(), &server, &[cal("work")], None).await.unwrap();

        writable(&f.state, cal("work"));
        let key = EventKey::new(cal("work"), server.url_of(&cal("work"), "a"));
        f.engine
            .record_local_edit(&session(), &key, |e| e.title = "My standup".into())
            .unwrap();

        // Remote change stamped before the local edit.
        server.put_modified_at(&cal("work"), "a", "Standup v2", Utc::now() - chrono::Duration::hours(1));
        let report = f.engine.sync(&session(), &server, &[cal("work")], None).await.unwrap();
        assert_eq!(report.conflicts_kept, 1);
        assert_eq!(f.events.get(&session(), &key).unwrap().unwrap().title, "My standup");

        // A strictly newer remote copy wins and clears the local mark.
        server.put_modified_at(&cal("work"), "a", "Standup v3", Utc::now() + chrono::Duration::hours(1));
        let report = f.engine.sync(&session(), &server, &[cal("work")], None).await.unwrap();
        assert_eq!(report.updated, 1);
        let event = f.events.get(&session(), &key).unwrap().unwrap();
        assert_eq!(event.title, "Standup v3");
        assert!(!event.has_local_edits());
    }

    #[tokio::test]
    async fn unstamped_remote_copy_wins() {
        let f = fixture();
        let server = FakeCalDav::new();
        server.put(&cal("work"), "a", "Standup");
        f.engine.sync(&session(), &server, &[cal("work")], None).await.unwrap();

        writable(&f.state, cal("work"));
        let key = EventKey::new(cal("work"), server.url_of(&cal("work"), "a"));
        f.engine
            .record_local_edit(&session(), &key, |e| e.title = "Mine".into())
            .unwrap();
        server.put(&cal("work"), "a", "Theirs");

        let report = f.engine.sync(&session(), &server, &[cal("work")], None).await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(f.events.get(&session(), &key).unwrap().unwrap().title, "Theirs");
    }

    #[tokio::test]
    async fn read_only_calendars_reject_local_edits() {
        let f = fixture();
        let server = FakeCalDav::new();
        server.put(&cal("holidays"), "a", "Holiday");
        f.state
            .save_calendar_metadata(
                &session(),
                vec![Calendar::new(cal("holidays"), "Holidays").subscription().into()],
            )
            .unwrap();
        f.engine.sync(&session(), &server, &[cal("holidays")], None).await.unwrap();

        let key = EventKey::new(cal("holidays"), server.url_of(&cal("holidays"), "a"));
        let err = f
            .engine
            .record_local_edit(&session(), &key, |e| e.start = EventTime::from_utc(Utc::now()))
            .unwrap_err();
        assert!(matches!(err, SyncError::Store(StoreError::ReadOnly { .. })));
    }

    #[tokio::test]
    async fn teardown_removes_everything() {
        let f = fixture();
        let server = FakeCalDav::new();
        server.put(&cal("work"), "a", "Standup");
        server.put(&cal("home"), "b", "Dinner");
        f.state
            .save(
                &session(),
                SyncSettings::new("https://caldav.example.com", "me").with_selection([cal("work"), cal("home")]),
            )
            .unwrap();
        f.engine
            .sync(&session(), &server, &[cal("work"), cal("home")], None)
            .await
            .unwrap();

        let report = f.engine.teardown(&session()).await.unwrap();
        assert_eq!(report.events_deleted, 2);
        assert_eq!(report.tokens_cleared, 2);
        assert!(f.events.all(&session()).unwrap().is_empty());
        assert!(f.state.tokens(&session()).unwrap().is_empty());
        assert_eq!(f.state.get(&session()).unwrap(), None);
    }

    #[tokio::test]
    async fn edits_need_recorded_calendar_flags() {
        let f = fixture();
        let server = FakeCalDav::new();
        server.put(&cal("work"), "a", "Standup");
        f.engine.sync(&session(), &server, &[cal("work")], None).await.unwrap();

        let key = EventKey::new(cal("work"), server.url_of(&cal("work"), "a"));
        let err = f
            .engine
            .record_local_edit(&session(), &key, |e| e.title = "Mine".into())
            .unwrap_err();
        assert!(matches!(err, SyncError::Store(StoreError::ReadOnly { .. })));

        writable(&f.state, cal("work"));
        f.engine
            .record_local_edit(&session(), &key, |e| e.title = "Mine".into())
            .unwrap();
    }

    #[tokio::test]
    async fn edit_waits_for_running_pass() {
        let f = fixture();
        let server = FakeCalDav::new();
        server.put(&cal("work"), "a", "Standup");
        f.engine.sync(&session(), &server, &[cal("work")], None).await.unwrap();
        writable(&f.state, cal("work"));
        let key = EventKey::new(cal("work"), server.url_of(&cal("work"), "a"));

        server.stall(&cal("work"));
        let sess = session();
        let cals = [cal("work")];
        let mut pass = Box::pin(f.engine.sync(&sess, &server, &cals, None));
        assert!(futures_util::poll!(&mut pass).is_pending());

        let err = f
            .engine
            .record_local_edit(&session(), &key, |e| e.title = "Mine".into())
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Busy);
        assert_eq!(f.events.get(&session(), &key).unwrap().unwrap().title, "Standup");

        // Abandoning the pass releases the calendar.
        drop(pass);
        f.engine
            .record_local_edit(&session(), &key, |e| e.title = "Mine".into())
            .unwrap();
    }

    #[tokio::test]
    async fn teardown_retry_finishes_after_failed_event_removal() {
        let events = Arc::new(FlakyStore::new());
        let state = Arc::new(SyncStateStore::in_memory());
        let engine = SyncEngine::new(EngineConfig::in_memory(), events.clone(), state.clone());
        let server = FakeCalDav::new();
        server.put(&cal("work"), "a", "Standup");
        engine.sync(&session(), &server, &[cal("work")], None).await.unwrap();

        events.fail_remove.store(true, Ordering::SeqCst);
        let err = engine.teardown(&session()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Storage);
        assert_eq!(state.tokens(&session()).unwrap().len(), 1);

        events.fail_remove.store(false, Ordering::SeqCst);
        let report = engine.teardown(&session()).await.unwrap();
        assert_eq!(report.events_deleted, 1);
        assert!(events.inner.all(&session()).unwrap().is_empty());
        assert!(state.tokens(&session()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn teardown_finds_events_without_sync_state() {
        let f = fixture();
        let server = FakeCalDav::new();
        server.put(&cal("work"), "a", "Standup");
        f.engine.sync(&session(), &server, &[cal("work")], None).await.unwrap();
        f.state.purge(&session()).unwrap();

        let report = f.engine.teardown(&session()).await.unwrap();
        assert_eq!(report.events_deleted, 1);
        assert!(f.events.all(&session()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn teardown_prunes_idle_locks() {
        let f = fixture();
        let server = FakeCalDav::new();
        server.put(&cal("work"), "a", "Standup");
        server.put(&cal("home"), "b", "Dinner");
        f.engine
            .sync(&session(), &server, &[cal("work"), cal("home")], None)
            .await
            .unwrap();

        let other = Session::new("user-2");
        let _held = f.engine.lock_for(&other, &cal("work")).try_lock_owned().unwrap();
        assert_eq!(f.engine.locks.lock().unwrap().len(), 3);

        f.engine.teardown(&session()).await.unwrap();
        let locks = f.engine.locks.lock().unwrap();
        assert_eq!(locks.len(), 1);
        assert!(locks.contains_key(&(other.storage_key(), cal("work"))));
    }

    #[test]
    fn content_hash_ignores_etag() {
        let remote = RemoteEvent {
            url: cal("work/a.ics"),
            etag: Some("1".into()),
            uid: "a".into(),
            summary: Some("Standup".into()),
            description: None,
            location: None,
            start: EventTime::from_utc(Utc::now()),
            end: EventTime::from_utc(Utc::now()),
            recurrence_rule: None,
            status: None,
            last_modified: None,
        };
        let mut retagged = remote.clone();
        retagged.etag = Some("2".into());
        assert_eq!(content_hash(&remote), content_hash(&retagged));
        assert_eq!(content_hash(&remote).len(), 64);

        let mut renamed = remote.clone();
        renamed.summary = Some("Retro".into());
        assert_ne!(content_hash(&remote), content_hash(&renamed));
    }
}
