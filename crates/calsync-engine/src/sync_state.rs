//! Per-user sync settings, sync tokens and calendar metadata.

use std::collections::{BTreeMap, BTreeSet};

use calsync_core::{Calendar, CalendarMetadata, CalendarUrl, Session, SyncSettings, SyncToken};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StoreResult;
use crate::storage::{Document, StorageLocation};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UserState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    settings: Option<SyncSettings>,
    #[serde(default)]
    tokens: BTreeMap<CalendarUrl, SyncToken>,
    #[serde(default)]
    calendars: Vec<CalendarMetadata>,
}

/// Durable sync state, scoped to the session's user.
pub struct SyncStateStore {
    doc: Document<UserState>,
}

impl SyncStateStore {
    pub fn new(location: StorageLocation) -> Self {
        Self {
            doc: Document::new(location, "sync-state"),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(StorageLocation::Memory)
    }

    /// The user's settings, if any.
    pub fn get(&self, session: &Session) -> StoreResult<Option<SyncSettings>> {
        self.doc.read(session, |state| state.settings.clone())
    }

    /// Replaces the user's settings (last writer wins).
    pub fn save(&self, session: &Session, settings: SyncSettings) -> StoreResult<()> {
        self.doc.update(session, |state| {
            state.settings = Some(settings);
            Ok(())
        })
    }

    /// Removes the settings, leaving tokens and metadata in place.
    pub fn delete(&self, session: &Session) -> StoreResult<()> {
        self.doc.update(session, |state| {
            state.settings = None;
            Ok(())
        })
    }

    /// Records a successful sync pass in the settings, if there are any.
    pub fn touch_last_sync(&self, session: &Session, at: DateTime<Utc>) -> StoreResult<bool> {
        self.doc.update(session, |state| {
            Ok(match state.settings.as_mut() {
                Some(settings) => {
                    settings.last_sync_at = Some(at);
                    true
                }
                None => false,
            })
        })
    }

    pub fn token(&self, session: &Session, calendar: &CalendarUrl) -> StoreResult<Option<SyncToken>> {
        self.doc
            .read(session, |state| state.tokens.get(calendar).cloned())
    }

    pub fn tokens(&self, session: &Session) -> StoreResult<BTreeMap<CalendarUrl, SyncToken>> {
        self.doc.read(session, |state| state.tokens.clone())
    }

    pub fn set_token(
        &self,
        session: &Session,
        calendar: &CalendarUrl,
        token: SyncToken,
    ) -> StoreResult<()> {
        self.doc.update(session, |state| {
            state.tokens.insert(calendar.clone(), token);
            Ok(())
        })
    }

    pub fn clear_token(&self, session: &Session, calendar: &CalendarUrl) -> StoreResult<()> {
        self.doc.update(session, |state| {
            state.tokens.remove(calendar);
            Ok(())
        })
    }

    /// Drops every token, forcing full fetches. Returns how many were held.
    pub fn clear_tokens(&self, session: &Session) -> StoreResult<usize> {
        self.doc.update(session, |state| {
            let count = state.tokens.len();
            state.tokens.clear();
            Ok(count)
        })
    }

    pub fn calendar_metadata(&self, session: &Session) -> StoreResult<Vec<CalendarMetadata>> {
        self.doc.read(session, |state| state.calendars.clone())
    }

    /// Replaces the metadata list.
    pub fn save_calendar_metadata(
        &self,
        session: &Session,
        calendars: Vec<CalendarMetadata>,
    ) -> StoreResult<()> {
        self.doc.update(session, |state| {
            debug!(count = calendars.len(), "saving calendar metadata");
            state.calendars = calendars;
            Ok(())
        })
    }

    /// Records a fresh discovery: known entries take the new names, colors
    /// and flags, unknown calendars are added. Returns how many entries
    /// changed or were added.
    pub fn refresh_metadata(&self, session: &Session, discovered: &[Calendar]) -> StoreResult<usize> {
        let changed = self.doc.read(session, |state| {
            discovered.iter().any(|cal| {
                state
                    .calendars
                    .iter()
                    .find(|meta| *meta.url() == cal.url)
                    .is_none_or(|meta| meta.calendar != *cal)
            })
        })?;
        if !changed {
            return Ok(0);
        }

        self.doc.update(session, |state| {
            let mut count = 0;
            for cal in discovered {
                match state.calendars.iter_mut().find(|meta| *meta.url() == cal.url) {
                    Some(meta) if meta.calendar == *cal => {}
                    Some(meta) => {
                        meta.refresh(cal);
                        count += 1;
                    }
                    None => {
                        state.calendars.push(CalendarMetadata::from(cal.clone()));
                        count += 1;
                    }
                }
            }
            Ok(count)
        })
    }

    /// Whether events of `calendar` may be edited locally. Calendars without
    /// stored metadata are treated as read-only.
    pub fn accepts_local_edits(&self, session: &Session, calendar: &CalendarUrl) -> StoreResult<bool> {
        self.doc.read(session, |state| {
            state
                .calendars
                .iter()
                .find(|meta| meta.url() == calendar)
                .is_some_and(|meta| meta.calendar.accepts_local_edits())
        })
    }

    /// Stamps a calendar's metadata after a successful pass.
    pub fn mark_synced(
        &self,
        session: &Session,
        calendar: &CalendarUrl,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.doc.update(session, |state| {
            if let Some(meta) = state.calendars.iter_mut().find(|m| m.url() == calendar) {
                meta.mark_synced(at);
            }
            Ok(())
        })
    }

    /// Every calendar the user ever selected, synced or described.
    pub fn known_calendars(&self, session: &Session) -> StoreResult<Vec<CalendarUrl>> {
        self.doc.read(session, |state| {
            let mut urls: BTreeSet<CalendarUrl> = state.tokens.keys().cloned().collect();
            urls.extend(state.calendars.iter().map(|m| m.url().clone()));
            if let Some(settings) = &state.settings {
                urls.extend(settings.selected_calendar_urls.iter().cloned());
            }
            urls.into_iter().collect()
        })
    }

    /// Removes everything stored for the user.
    pub fn purge(&self, session: &Session) -> StoreResult<()> {
        self.doc.remove(session)?;
        info!("purged sync state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("user-1")
    }

    fn url(path: &str) -> CalendarUrl {
        CalendarUrl::new(format!("https://caldav.example.com{path}"))
    }

    #[test]
    fn settings_are_replaced_whole() {
        let store = SyncStateStore::in_memory();
        assert_eq!(store.get(&session()).unwrap(), None);

        let first = SyncSettings::new("https://caldav.example.com", "me")
            .with_selection([url("/cal/a")]);
        store.save(&session(), first).unwrap();

        let second = SyncSettings::new("https://caldav.example.com", "me");
        store.save(&session(), second.clone()).unwrap();
        assert_eq!(store.get(&session()).unwrap(), Some(second));

        store.delete(&session()).unwrap();
        assert_eq!(store.get(&session()).unwrap(), None);
    }

    #[test]
    fn tokens_are_keyed_by_normalized_url() {
        let store = SyncStateStore::in_memory();
        store
            .set_token(&session(), &url("/cal/a/"), SyncToken::Opaque("t1".into()))
            .unwrap();

        let token = store
            .token(&session(), &CalendarUrl::new("HTTPS://CALDAV.example.com:443//cal/a"))
            .unwrap();
        assert_eq!(token, Some(SyncToken::Opaque("t1".into())));

        store.clear_token(&session(), &url("/cal/a")).unwrap();
        assert_eq!(store.token(&session(), &url("/cal/a")).unwrap(), None);
    }

    #[test]
    fn tokens_are_per_user() {
        let store = SyncStateStore::in_memory();
        store
            .set_token(&session(), &url("/cal/a"), SyncToken::Opaque("t1".into()))
            .unwrap();
        assert_eq!(store.token(&Session::new("user-2"), &url("/cal/a")).unwrap(), None);
    }

    #[test]
    fn last_sync_needs_settings() {
        let store = SyncStateStore::in_memory();
        let now = Utc::now();
        assert!(!store.touch_last_sync(&session(), now).unwrap());

        store
            .save(&session(), SyncSettings::new("https://caldav.example.com", "me"))
            .unwrap();
        assert!(store.touch_last_sync(&session(), now).unwrap());
        assert_eq!(store.get(&session()).unwrap().unwrap().last_sync_at, Some(now));
    }

    #[test]
    fn metadata_refresh_and_sync_stamp() {
        let store = SyncStateStore::in_memory();
        let work = Calendar::new(url("/cal/work"), "Work");
        store
            .save_calendar_metadata(&session(), vec![work.clone().into()])
            .unwrap();

        assert_eq!(store.refresh_metadata(&session(), &[work.clone()]).unwrap(), 0);

        let renamed = Calendar::new(url("/cal/work/"), "Office").with_color("#00FF00");
        let holidays = Calendar::new(url("/cal/holidays"), "Holidays").subscription();
        assert_eq!(store.refresh_metadata(&session(), &[renamed, holidays]).unwrap(), 2);
        assert!(store.accepts_local_edits(&session(), &url("/cal/work")).unwrap());
        assert!(!store.accepts_local_edits(&session(), &url("/cal/holidays")).unwrap());
        assert!(!store.accepts_local_edits(&session(), &url("/cal/unknown")).unwrap());

        let at = Utc::now();
        store.mark_synced(&session(), &url("/cal/work"), at).unwrap();

        let meta = store.calendar_metadata(&session()).unwrap();
        assert_eq!(meta[0].calendar.display_name, "Office");
        assert_eq!(meta[0].calendar.color.as_deref(), Some("#00FF00"));
        assert_eq!(meta[0].last_synced_at, Some(at));
    }

    #[test]
    fn known_calendars_union_and_purge() {
        let dir = tempfile::tempdir().unwrap();
        let store = SyncStateStore::new(StorageLocation::Directory(dir.path().to_path_buf()));

        store
            .save(
                &session(),
                SyncSettings::new("https://caldav.example.com", "me").with_selection([url("/cal/a")]),
            )
            .unwrap();
        store
            .set_token(&session(), &url("/cal/b"), SyncToken::Opaque("t".into()))
            .unwrap();
        store
            .save_calendar_metadata(&session(), vec![Calendar::new(url("/cal/a"), "A").into()])
            .unwrap();

        assert_eq!(store.known_calendars(&session()).unwrap(), vec![url("/cal/a"), url("/cal/b")]);

        // Reopening reads the same state back from disk.
        let reopened = SyncStateStore::new(StorageLocation::Directory(dir.path().to_path_buf()));
        assert_eq!(reopened.tokens(&session()).unwrap().len(), 1);

        reopened.purge(&session()).unwrap();
        assert!(reopened.known_calendars(&session()).unwrap().is_empty());
        assert_eq!(reopened.get(&session()).unwrap(), None);
    }
}
