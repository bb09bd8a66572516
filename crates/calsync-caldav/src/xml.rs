//! WebDAV XML request bodies and multistatus parsing.

use std::borrow::Cow;
use std::fmt::Display;
use std::io::Cursor;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::error::{CalDavError, CalDavResult};

pub const DAV_NS: &str = "DAV:";
pub const CALDAV_NS: &str = "urn:ietf:params:xml:ns:caldav";
/// CalendarServer extensions (getctag, shared, subscribed).
pub const CS_NS: &str = "http://calendarserver.org/ns/";
/// Apple iCal extensions (calendar-color).
pub const ICAL_NS: &str = "http://apple.com/ns/ical/";

/// Small wrapper over the quick-xml writer with error mapping.
struct XmlWriter {
    inner: Writer<Cursor<Vec<u8>>>,
}

fn write_error(err: impl Display) -> CalDavError {
    CalDavError::internal(format!("failed to build XML body: {err}"))
}

impl XmlWriter {
    fn new() -> CalDavResult<Self> {
        let mut inner = Writer::new(Cursor::new(Vec::new()));
        inner
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(write_error)?;
        Ok(Self { inner })
    }

    /// Opens the root element with the namespace prefixes used below.
    fn root(&mut self, name: &str) -> CalDavResult<()> {
        let mut start = BytesStart::new(name);
        start.push_attribute(("xmlns:d", DAV_NS));
        start.push_attribute(("xmlns:c", CALDAV_NS));
        start.push_attribute(("xmlns:cs", CS_NS));
        start.push_attribute(("xmlns:ic", ICAL_NS));
        self.inner
            .write_event(Event::Start(start))
            .map_err(write_error)
    }

    fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> CalDavResult<()> {
        let mut start = BytesStart::new(name);
        for attr in attrs {
            start.push_attribute(*attr);
        }
        self.inner
            .write_event(Event::Start(start))
            .map_err(write_error)
    }

    fn end(&mut self, name: &str) -> CalDavResult<()> {
        self.inner
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(write_error)
    }

    fn empty(&mut self, name: &str) -> CalDavResult<()> {
        self.inner
            .write_event(Event::Empty(BytesStart::new(name)))
            .map_err(write_error)
    }

    fn text_element(&mut self, name: &str, text: &str) -> CalDavResult<()> {
        self.start(name, &[])?;
        self.inner
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(write_error)?;
        self.end(name)
    }

    fn prop(&mut self, props: &[&str]) -> CalDavResult<()> {
        self.start("d:prop", &[])?;
        for prop in props {
            self.empty(prop)?;
        }
        self.end("d:prop")
    }

    fn finish(self) -> CalDavResult<String> {
        String::from_utf8(self.inner.into_inner().into_inner())
            .map_err(|e| CalDavError::internal(format!("XML body is not UTF-8: {e}")))
    }
}

fn propfind(props: &[&str]) -> CalDavResult<String> {
    let mut w = XmlWriter::new()?;
    w.root("d:propfind")?;
    w.prop(props)?;
    w.end("d:propfind")?;
    w.finish()
}

/// PROPFIND body asking for the authenticated principal.
pub fn current_user_principal_body() -> CalDavResult<String> {
    propfind(&["d:current-user-principal"])
}

/// PROPFIND body asking for the principal's calendar home.
pub fn calendar_home_set_body() -> CalDavResult<String> {
    propfind(&["c:calendar-home-set"])
}

/// Depth-1 PROPFIND body listing calendar collections with their flags.
pub fn list_calendars_body() -> CalDavResult<String> {
    propfind(&[
        "d:displayname",
        "d:resourcetype",
        "d:current-user-privilege-set",
        "d:sync-token",
        "c:supported-calendar-component-set",
        "cs:getctag",
        "cs:source",
        "ic:calendar-color",
    ])
}

/// Depth-0 PROPFIND body reading a collection's sync cursor.
pub fn sync_state_body() -> CalDavResult<String> {
    propfind(&["d:sync-token", "cs:getctag"])
}

/// calendar-query REPORT for every VEVENT in a collection.
pub fn calendar_query_body() -> CalDavResult<String> {
    let mut w = XmlWriter::new()?;
    w.root("c:calendar-query")?;
    w.prop(&["d:getetag", "c:calendar-data"])?;
    w.start("c:filter", &[])?;
    w.start("c:comp-filter", &[("name", "VCALENDAR")])?;
    w.start("c:comp-filter", &[("name", "VEVENT")])?;
    w.end("c:comp-filter")?;
    w.end("c:comp-filter")?;
    w.end("c:filter")?;
    w.end("c:calendar-query")?;
    w.finish()
}

/// calendar-multiget REPORT for specific resources.
pub fn calendar_multiget_body<S: AsRef<str>>(hrefs: &[S]) -> CalDavResult<String> {
    let mut w = XmlWriter::new()?;
    w.root("c:calendar-multiget")?;
    w.prop(&["d:getetag", "c:calendar-data"])?;
    for href in hrefs {
        w.text_element("d:href", href.as_ref())?;
    }
    w.end("c:calendar-multiget")?;
    w.finish()
}

/// RFC 6578 sync-collection REPORT. An empty token requests the initial listing.
pub fn sync_collection_body(token: Option<&str>) -> CalDavResult<String> {
    let mut w = XmlWriter::new()?;
    w.root("d:sync-collection")?;
    match token {
        Some(token) => w.text_element("d:sync-token", token)?,
        None => w.empty("d:sync-token")?,
    }
    w.text_element("d:sync-level", "1")?;
    w.prop(&["d:getetag"])?;
    w.end("d:sync-collection")?;
    w.finish()
}

/// Properties reported for one resource, from its 2xx propstats.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropSet {
    pub display_name: Option<String>,
    pub color: Option<String>,
    pub ctag: Option<String>,
    pub sync_token: Option<String>,
    /// ETag without surrounding quotes.
    pub etag: Option<String>,
    pub calendar_data: Option<String>,
    /// Local names of the `resourcetype` children.
    pub resource_types: Vec<String>,
    /// Local names of the granted privileges.
    pub privileges: Vec<String>,
    /// `name` attributes of `supported-calendar-component-set`.
    pub components: Vec<String>,
    pub principal_href: Option<String>,
    pub home_set_hrefs: Vec<String>,
    pub source_href: Option<String>,
}

impl PropSet {
    pub fn has_resource_type(&self, name: &str) -> bool {
        self.resource_types.iter().any(|t| t == name)
    }

    fn merge(&mut self, other: PropSet) {
        fn fill(slot: &mut Option<String>, value: Option<String>) {
            if slot.is_none() {
                *slot = value;
            }
        }
        fill(&mut self.display_name, other.display_name);
        fill(&mut self.color, other.color);
        fill(&mut self.ctag, other.ctag);
        fill(&mut self.sync_token, other.sync_token);
        fill(&mut self.etag, other.etag);
        fill(&mut self.calendar_data, other.calendar_data);
        fill(&mut self.principal_href, other.principal_href);
        fill(&mut self.source_href, other.source_href);
        self.resource_types.extend(other.resource_types);
        self.privileges.extend(other.privileges);
        self.components.extend(other.components);
        self.home_set_hrefs.extend(other.home_set_hrefs);
    }
}

/// One `<response>` of a multistatus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseEntry {
    pub href: String,
    /// Response-level status; sync-collection reports deletions as 404 here.
    pub status: Option<u16>,
    pub props: PropSet,
}

impl ResponseEntry {
    pub fn is_gone(&self) -> bool {
        self.status == Some(404)
    }
}

/// A parsed `207 Multi-Status` body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Multistatus {
    pub responses: Vec<ResponseEntry>,
    /// Top-level sync token of a sync-collection reply.
    pub sync_token: Option<String>,
}

/// Parses `HTTP/1.1 404 Not Found` into `404`.
pub fn parse_status_line(line: &str) -> Option<u16> {
    line.split_whitespace().nth(1)?.parse().ok()
}

/// Parses a multistatus body.
///
/// Elements are matched by local name, so any namespace prefix works.
/// Properties from non-2xx propstats are discarded.
pub fn parse_multistatus(xml: &str) -> CalDavResult<Multistatus> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut result = Multistatus::default();
    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();

    let mut entry: Option<ResponseEntry> = None;
    let mut propstat: Option<(PropSet, Option<u16>)> = None;
    let mut seen_multistatus = false;

    loop {
        let event = reader.read_event().map_err(|e| {
            CalDavError::invalid_response(format!(
                "malformed multistatus at byte {}: {e}",
                reader.buffer_position()
            ))
        })?;

        match event {
            Event::Start(e) => {
                let name = local_name(&e);
                match name.as_str() {
                    "multistatus" => seen_multistatus = true,
                    "response" => entry = Some(ResponseEntry::default()),
                    "propstat" => propstat = Some((PropSet::default(), None)),
                    _ => {
                        if let Some((props, _)) = propstat.as_mut() {
                            collect_marker(&stack, &name, &e, props);
                        }
                    }
                }
                stack.push(name);
                text.clear();
            }
            Event::Empty(e) => {
                let name = local_name(&e);
                if name == "multistatus" {
                    seen_multistatus = true;
                } else if let Some((props, _)) = propstat.as_mut() {
                    collect_marker(&stack, &name, &e, props);
                }
            }
            Event::Text(e) => {
                let chunk = e.unescape().map_err(|err| {
                    CalDavError::invalid_response(format!("bad text in multistatus: {err}"))
                })?;
                text.push_str(&chunk);
            }
            Event::CData(e) => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Event::End(_) => {
                let Some(name) = stack.pop() else {
                    return Err(CalDavError::invalid_response("unbalanced multistatus"));
                };
                let parent = stack.last().map(String::as_str);
                let value = std::mem::take(&mut text);

                match name.as_str() {
                    "response" => {
                        if let Some(done) = entry.take() {
                            result.responses.push(done);
                        }
                    }
                    "propstat" => {
                        if let (Some((props, status)), Some(current)) =
                            (propstat.take(), entry.as_mut())
                        {
                            if status.is_none_or(|s| (200..300).contains(&s)) {
                                current.props.merge(props);
                            }
                        }
                    }
                    "status" => {
                        let status = parse_status_line(&value);
                        match parent {
                            Some("propstat") => {
                                if let Some((_, slot)) = propstat.as_mut() {
                                    *slot = status;
                                }
                            }
                            Some("response") => {
                                if let Some(current) = entry.as_mut() {
                                    current.status = status;
                                }
                            }
                            _ => {}
                        }
                    }
                    "sync-token" if parent == Some("multistatus") => {
                        result.sync_token = Some(value);
                    }
                    "href" => match (parent, propstat.as_mut(), entry.as_mut()) {
                        (Some("response"), _, Some(current)) => current.href = value,
                        (Some("current-user-principal"), Some((props, _)), _) => {
                            props.principal_href = Some(value);
                        }
                        (Some("calendar-home-set"), Some((props, _)), _) => {
                            props.home_set_hrefs.push(value);
                        }
                        (Some("source"), Some((props, _)), _) => props.source_href = Some(value),
                        _ => {}
                    },
                    other => {
                        if let (Some((props, _)), Some("prop")) = (propstat.as_mut(), parent) {
                            assign_text_prop(props, other, value);
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_multistatus {
        return Err(CalDavError::invalid_response("response is not a multistatus"));
    }
    Ok(result)
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Records marker elements: resource types, privileges and components.
fn collect_marker(stack: &[String], name: &str, e: &BytesStart<'_>, props: &mut PropSet) {
    match stack.last().map(String::as_str) {
        Some("resourcetype") => props.resource_types.push(name.to_string()),
        Some("privilege") => props.privileges.push(name.to_string()),
        Some("supported-calendar-component-set") if name == "comp" => {
            if let Ok(Some(attr)) = e.try_get_attribute("name") {
                let value: Cow<'_, str> = attr
                    .unescape_value()
                    .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned().into());
                props.components.push(value.to_ascii_uppercase());
            }
        }
        _ => {}
    }
}

fn assign_text_prop(props: &mut PropSet, name: &str, value: String) {
    match name {
        "displayname" => props.display_name = Some(value),
        "calendar-color" => props.color = Some(value),
        "getctag" => props.ctag = Some(value),
        "sync-token" => props.sync_token = Some(value),
        "getetag" => props.etag = Some(value.trim_matches('"').to_string()),
        "calendar-data" => props.calendar_data = Some(value),
        _ => {}
    }
}
