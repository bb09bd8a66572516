//! The protocol client's caller-facing contract.

use calsync_core::{Calendar, CalendarUrl, SyncToken};

use crate::error::CalDavResult;
use crate::remote_event::RemoteEvent;
use crate::transport::BoxFuture;

/// Whether a [`ChangeSet`] lists every resource or only the changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// Every event currently in the calendar. Local events absent from the
    /// set no longer exist remotely.
    Snapshot,
    /// Only resources changed or deleted since the given token.
    Delta,
}

/// Result of [`CalDavApi::fetch_changes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub events: Vec<RemoteEvent>,
    /// Resources removed on the server since the token. Always empty for a
    /// snapshot.
    pub deleted_urls: Vec<CalendarUrl>,
    /// Cursor to store once this set has been applied.
    pub new_token: SyncToken,
    pub kind: FetchKind,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.deleted_urls.is_empty()
    }
}

/// Read-only access to one CalDAV account.
///
/// Implementations never write to the server.
pub trait CalDavApi: Send + Sync {
    /// Verifies the credentials and lists the user's calendars.
    ///
    /// Errors carry `AuthenticationFailed` for rejected credentials,
    /// `Transport`/`Timeout` when the server cannot be reached and
    /// `InvalidResponse` for malformed replies.
    fn authenticate_and_discover(&self) -> BoxFuture<'_, CalDavResult<Vec<Calendar>>>;

    /// Fetches a full snapshot when `since` is `None` or not a server token,
    /// otherwise the delta since `since`.
    ///
    /// A token the server no longer accepts yields `TokenInvalidated`.
    fn fetch_changes<'a>(
        &'a self,
        calendar_url: &'a CalendarUrl,
        since: Option<&'a SyncToken>,
    ) -> BoxFuture<'a, CalDavResult<ChangeSet>>;
}
