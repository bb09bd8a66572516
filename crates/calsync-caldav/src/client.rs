//! CalDAV client: principal discovery and change fetching.

use std::sync::Arc;

use calsync_core::{Calendar, CalendarUrl, SyncToken};
use calsync_protocol::ProxyChannel;
use chrono::Utc;
use tracing::{debug, info, warn};
use url::Url;

use crate::api::{CalDavApi, ChangeSet, FetchKind};
use crate::config::{CalDavConfig, CredentialSource};
use crate::error::{CalDavError, CalDavResult};
use crate::http::HttpTransport;
use crate::ics::parse_calendar_object;
use crate::proxy::ProxyTransport;
use crate::remote_event::RemoteEvent;
use crate::transport::{BoxFuture, DavRequest, DavResponse, DavTransport, Depth};
use crate::xml::{
    ResponseEntry, calendar_home_set_body, calendar_multiget_body, calendar_query_body,
    current_user_principal_body, list_calendars_body, parse_multistatus, sync_collection_body,
    sync_state_body,
};

/// Resources fetched per calendar-multiget request.
pub const MULTIGET_BATCH_SIZE: usize = 100;

/// Route to the credential proxy for configs that carry a `setting_id`.
#[derive(Debug, Clone)]
pub struct ProxyRoute {
    pub channel: ProxyChannel,
    /// The session's bearer token.
    pub bearer: String,
}

/// CalDAV client for one account.
pub struct CalDavClient {
    root: Url,
    transport: Arc<dyn DavTransport>,
}

impl CalDavClient {
    /// Builds a client, choosing the direct or proxied transport from the
    /// config's credentials.
    ///
    /// # Errors
    ///
    /// `Precondition` for an incomplete config, or for a proxied config
    /// without a [`ProxyRoute`]. No request is sent.
    pub fn connect(config: &CalDavConfig, proxy: Option<ProxyRoute>) -> CalDavResult<Self> {
        let root = config.validate()?;
        let transport: Arc<dyn DavTransport> = match config.credential_source()? {
            CredentialSource::Password(password) => Arc::new(HttpTransport::new(config, password)?),
            CredentialSource::Proxy { setting_id } => {
                let route = proxy.ok_or_else(|| {
                    CalDavError::precondition(
                        "stored credentials need an active session and a credential proxy",
                    )
                })?;
                Arc::new(ProxyTransport::new(route.channel, route.bearer, setting_id))
            }
        };
        Ok(Self { root, transport })
    }

    /// Builds a client over an arbitrary transport.
    pub fn with_transport(root: Url, transport: Arc<dyn DavTransport>) -> Self {
        Self { root, transport }
    }

    pub fn root(&self) -> &Url {
        &self.root
    }

    async fn send(&self, request: DavRequest) -> CalDavResult<DavResponse> {
        self.transport.send(request).await
    }

    /// Lists VEVENT calendars under every calendar home.
    pub async fn discover(&self) -> CalDavResult<Vec<Calendar>> {
        let homes = self.calendar_homes().await?;

        let mut calendars: Vec<Calendar> = Vec::new();
        for home in &homes {
            let request = DavRequest::propfind(home.clone(), Depth::One, list_calendars_body()?);
            let xml = self.send(request).await?.into_body("list calendars")?;
            for entry in parse_multistatus(&xml)?.responses {
                if let Some(calendar) = self.to_calendar(&entry)
                    && !calendars.iter().any(|c| c.url == calendar.url)
                {
                    calendars.push(calendar);
                }
            }
        }

        info!(count = calendars.len(), homes = homes.len(), "discovered calendars");
        Ok(calendars)
    }

    /// Follows current-user-principal to calendar-home-set.
    ///
    /// Falls back to `/.well-known/caldav`, then to the server URL itself.
    async fn calendar_homes(&self) -> CalDavResult<Vec<Url>> {
        let mut principal = self.find_principal(&self.root).await?;
        if principal.is_none()
            && let Ok(well_known) = self.root.join("/.well-known/caldav")
            && well_known != self.root
        {
            debug!(url = %well_known, "retrying principal lookup via well-known URL");
            principal = self.find_principal(&well_known).await?;
        }

        let Some(principal) = principal else {
            debug!(url = %self.root, "no principal advertised, using server URL as calendar home");
            return Ok(vec![self.root.clone()]);
        };

        let request =
            DavRequest::propfind(principal.clone(), Depth::Zero, calendar_home_set_body()?);
        let response = self.send(request).await?;
        if is_soft_miss(response.status) {
            return Ok(vec![principal]);
        }
        let xml = response.into_body("calendar-home-set")?;

        let homes: Vec<Url> = parse_multistatus(&xml)?
            .responses
            .iter()
            .flat_map(|r| r.props.home_set_hrefs.iter())
            .filter_map(|href| self.root.join(href.trim()).ok())
            .collect();

        debug!(principal = %principal, homes = homes.len(), "resolved calendar homes");
        if homes.is_empty() {
            Ok(vec![principal])
        } else {
            Ok(homes)
        }
    }

    async fn find_principal(&self, url: &Url) -> CalDavResult<Option<Url>> {
        let request = DavRequest::propfind(url.clone(), Depth::Zero, current_user_principal_body()?);
        let response = self.send(request).await?;
        if is_soft_miss(response.status) {
            return Ok(None);
        }
        let xml = response.into_body("current-user-principal")?;

        // Redirects can land on an HTML page; that is a miss, not an error.
        let Ok(multistatus) = parse_multistatus(&xml) else {
            debug!(url = %url, "principal lookup did not return a multistatus");
            return Ok(None);
        };
        Ok(multistatus
            .responses
            .iter()
            .find_map(|r| r.props.principal_href.as_deref())
            .and_then(|href| self.root.join(href.trim()).ok()))
    }

    fn to_calendar(&self, entry: &ResponseEntry) -> Option<Calendar> {
        let props = &entry.props;
        let subscribed = props.has_resource_type("subscribed");
        if !props.has_resource_type("calendar") && !subscribed {
            return None;
        }

        let url = CalendarUrl::resolve(&entry.href, &self.root);
        if !props.components.is_empty() && !props.components.iter().any(|c| c == "VEVENT") {
            debug!(calendar = %url, "skipping collection without events");
            return None;
        }

        let display_name = props
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| fallback_name(&url));

        let writable = props
            .privileges
            .iter()
            .any(|p| matches!(p.as_str(), "write" | "write-content" | "bind" | "all"));

        let mut calendar = Calendar::new(url, display_name);
        calendar.color = props.color.as_deref().and_then(normalize_color);
        calendar.is_shared =
            props.has_resource_type("shared") || props.has_resource_type("shared-owner");
        calendar.is_subscription = subscribed;
        calendar.read_only = subscribed || (!props.privileges.is_empty() && !writable);
        Some(calendar)
    }

    /// Fetches a full snapshot or, with an opaque token, the delta.
    pub async fn fetch(
        &self,
        calendar: &CalendarUrl,
        since: Option<&SyncToken>,
    ) -> CalDavResult<ChangeSet> {
        let result = async {
            let collection = self.collection_url(calendar)?;
            match since.and_then(SyncToken::as_opaque) {
                Some(token) => self.fetch_delta(&collection, token).await,
                None => self.fetch_snapshot(&collection).await,
            }
        }
        .await;
        result.map_err(|e| e.with_calendar(calendar.clone()))
    }

    async fn fetch_snapshot(&self, collection: &Url) -> CalDavResult<ChangeSet> {
        // Read the cursor first: changes racing the query are then replayed
        // by the next delta rather than lost.
        let request = DavRequest::propfind(collection.clone(), Depth::Zero, sync_state_body()?);
        let xml = self.send(request).await?.into_body("read sync token")?;
        let server_token = parse_multistatus(&xml)?
            .responses
            .into_iter()
            .find_map(|r| r.props.sync_token)
            .filter(|t| !t.trim().is_empty());
        let taken_at = Utc::now();

        let request = DavRequest::report(collection.clone(), Depth::One, calendar_query_body()?);
        let xml = self.send(request).await?.into_body("calendar-query")?;

        let own = CalendarUrl::new(collection.as_str());
        let mut events = Vec::new();
        for entry in parse_multistatus(&xml)?.responses {
            let url = CalendarUrl::resolve(&entry.href, collection);
            if url == own {
                continue;
            }
            if let Some(event) = to_remote_event(url, entry) {
                events.push(event);
            }
        }

        debug!(
            calendar = %collection,
            events = events.len(),
            has_token = server_token.is_some(),
            "fetched calendar snapshot"
        );
        Ok(ChangeSet {
            events,
            deleted_urls: Vec::new(),
            new_token: match server_token {
                Some(token) => SyncToken::Opaque(token),
                None => SyncToken::Timestamp(taken_at),
            },
            kind: FetchKind::Snapshot,
        })
    }

    async fn fetch_delta(&self, collection: &Url, token: &str) -> CalDavResult<ChangeSet> {
        let request =
            DavRequest::report(collection.clone(), Depth::One, sync_collection_body(Some(token))?);
        let response = self.send(request).await?;
        if is_token_rejection(&response) {
            return Err(CalDavError::token_invalidated(format!(
                "server rejected sync token (HTTP {})",
                response.status
            )));
        }
        let multistatus = parse_multistatus(&response.into_body("sync-collection")?)?;

        let own = CalendarUrl::new(collection.as_str());
        let mut deleted_urls = Vec::new();
        let mut changed_hrefs = Vec::new();
        for entry in multistatus.responses {
            let url = CalendarUrl::resolve(&entry.href, collection);
            if url == own {
                continue;
            }
            if entry.is_gone() {
                deleted_urls.push(url);
            } else {
                changed_hrefs.push(entry.href);
            }
        }

        let mut events = Vec::with_capacity(changed_hrefs.len());
        for batch in changed_hrefs.chunks(MULTIGET_BATCH_SIZE) {
            let body = calendar_multiget_body(batch)?;
            let request = DavRequest::report(collection.clone(), Depth::One, body);
            let xml = self.send(request).await?.into_body("calendar-multiget")?;
            for entry in parse_multistatus(&xml)?.responses {
                let url = CalendarUrl::resolve(&entry.href, collection);
                if entry.is_gone() {
                    deleted_urls.push(url);
                } else if let Some(event) = to_remote_event(url, entry) {
                    events.push(event);
                }
            }
        }

        let new_token = match multistatus.sync_token.filter(|t| !t.trim().is_empty()) {
            Some(next) => next,
            None => {
                warn!(calendar = %collection, "sync-collection reply carried no token");
                token.to_string()
            }
        };

        debug!(
            calendar = %collection,
            changed = events.len(),
            deleted = deleted_urls.len(),
            "fetched calendar delta"
        );
        Ok(ChangeSet {
            events,
            deleted_urls,
            new_token: SyncToken::Opaque(new_token),
            kind: FetchKind::Delta,
        })
    }

    /// Request URL for a collection, with the trailing slash servers expect.
    fn collection_url(&self, calendar: &CalendarUrl) -> CalDavResult<Url> {
        let parsed = if calendar.is_absolute() {
            Url::parse(calendar.as_str())
        } else {
            self.root.join(calendar.as_str())
        };
        let mut url = parsed.map_err(|e| {
            CalDavError::precondition(format!("invalid calendar URL {calendar}: {e}"))
        })?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }
}

impl CalDavApi for CalDavClient {
    fn authenticate_and_discover(&self) -> BoxFuture<'_, CalDavResult<Vec<Calendar>>> {
        Box::pin(self.discover())
    }

    fn fetch_changes<'a>(
        &'a self,
        calendar_url: &'a CalendarUrl,
        since: Option<&'a SyncToken>,
    ) -> BoxFuture<'a, CalDavResult<ChangeSet>> {
        Box::pin(self.fetch(calendar_url, since))
    }
}

fn to_remote_event(url: CalendarUrl, entry: ResponseEntry) -> Option<RemoteEvent> {
    let data = entry.props.calendar_data?;
    parse_calendar_object(url, entry.props.etag, &data)
}

/// Statuses meaning "this server does not offer that here".
fn is_soft_miss(status: u16) -> bool {
    matches!(status, 400 | 404 | 405 | 501)
}

/// RFC 6578 reports an unknown token as a `DAV:valid-sync-token` precondition
/// failure; some servers answer 410 instead.
fn is_token_rejection(response: &DavResponse) -> bool {
    match response.status {
        410 => true,
        403 | 409 => response.body.contains("valid-sync-token"),
        _ => false,
    }
}

/// Last path segment, used when a calendar has no display name.
fn fallback_name(url: &CalendarUrl) -> String {
    url.as_str()
        .rsplit('/')
        .find(|s| !s.is_empty() && !s.contains("://"))
        .unwrap_or("Calendar")
        .to_string()
}

/// Trims Apple's `#RRGGBBAA` to `#RRGGBB` and expands `#RGB`.
pub fn normalize_color(raw: &str) -> Option<String> {
    let hex = raw.trim().strip_prefix('#')?;
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    match hex.len() {
        3 => Some(hex.chars().fold(String::from("#"), |mut out, c| {
            out.push(c);
            out.push(c);
            out
        })),
        6 | 8 => Some(format!("#{}", &hex[..6])),
        _ => None,
    }
}
