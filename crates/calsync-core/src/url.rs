//! Canonical form for calendar and resource URLs.
//!
//! CalDAV servers hand out the same collection under several spellings:
//! absolute or server-relative hrefs, explicit default ports, upper-case
//! hosts, doubled or trailing slashes. Every identity comparison in the
//! workspace (selection matching, event ownership, dedup, token keys) goes
//! through [`normalize_calendar_url`] so those spellings compare equal.
//!
//! Rules, applied in order:
//! 1. relative references are resolved against the server root, if known
//! 2. scheme and host are lower-cased, userinfo and fragment dropped
//! 3. default ports are stripped
//! 4. runs of `/` in the path collapse to one
//! 5. a trailing `/` is stripped
//!
//! Path case is preserved (paths are case-sensitive on most servers).
//! The function is pure and idempotent.

use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};
use url::Url;

/// A normalized calendar or calendar-object URL.
///
/// Constructing a `CalendarUrl` always normalizes, so two values compare
/// equal exactly when they identify the same resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct CalendarUrl(String);

impl CalendarUrl {
    /// Normalizes `url` without a server root.
    pub fn new(url: impl AsRef<str>) -> Self {
        Self(normalize_calendar_url(url.as_ref()))
    }

    /// Normalizes `url`, resolving relative references against `base`.
    pub fn resolve(url: impl AsRef<str>, base: &Url) -> Self {
        Self(normalize_with_base(url.as_ref(), Some(base)))
    }

    /// Returns the canonical string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this URL carries a scheme and host.
    pub fn is_absolute(&self) -> bool {
        self.0.contains("://")
    }

    /// Returns true if this URL names a resource inside the `parent` collection.
    pub fn is_child_of(&self, parent: &CalendarUrl) -> bool {
        self.0.len() > parent.0.len()
            && self.0.starts_with(parent.as_str())
            && self.0.as_bytes()[parent.0.len()] == b'/'
    }
}

impl fmt::Display for CalendarUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CalendarUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for CalendarUrl {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}

impl From<&str> for CalendarUrl {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<CalendarUrl> for String {
    fn from(url: CalendarUrl) -> Self {
        url.0
    }
}

/// Normalizes a calendar URL with no server root.
///
/// Relative references keep their (collapsed, dot-resolved) path form.
///
/// ```
/// use calsync_core::normalize_calendar_url;
///
/// assert_eq!(normalize_calendar_url("HTTPS://Host:443/a/"), "https://host/a");
/// ```
pub fn normalize_calendar_url(url: &str) -> String {
    normalize_with_base(url, None)
}

/// Normalizes a calendar URL, resolving relative references against `base`.
pub fn normalize_with_base(url: &str, base: Option<&Url>) -> String {
    let trimmed = url.trim();

    let parsed = match Url::parse(trimmed) {
        Ok(parsed) => Some(parsed),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            base.and_then(|b| b.join(&collapse_slashes(trimmed)).ok())
        }
        Err(_) => None,
    };

    match parsed {
        Some(parsed) if parsed.has_host() => render(&parsed),
        _ => normalize_path_only(trimmed),
    }
}

/// Renders an absolute URL in canonical form.
fn render(url: &Url) -> String {
    let mut out = String::with_capacity(url.as_str().len());
    out.push_str(url.scheme());
    out.push_str("://");
    if let Some(host) = url.host_str() {
        out.push_str(&host.to_ascii_lowercase());
    }
    // `Url::port` is None when the port equals the scheme default.
    if let Some(port) = url.port() {
        let _ = write!(out, ":{port}");
    }
    out.push_str(&canonical_path(url.path()));
    if let Some(query) = url.query() {
        out.push('?');
        out.push_str(query);
    }
    out
}

/// Normalizes a reference that has no host.
fn normalize_path_only(reference: &str) -> String {
    let collapsed = collapse_slashes(reference);
    if !collapsed.starts_with('/') {
        return canonical_path(&collapsed);
    }

    // Resolve dot segments the same way an absolute URL would.
    match Url::parse("http://localhost/").and_then(|root| root.join(&collapsed)) {
        Ok(resolved) => {
            let mut out = canonical_path(resolved.path());
            if let Some(query) = resolved.query() {
                out.push('?');
                out.push_str(query);
            }
            out
        }
        Err(_) => canonical_path(&collapsed),
    }
}

/// Collapses duplicate slashes and strips one trailing slash.
fn canonical_path(path: &str) -> String {
    let mut out = collapse_slashes(path);
    if out.ends_with('/') {
        out.pop();
    }
    out
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut previous_slash = false;
    for c in path.chars() {
        if c == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_host_and_default_port() {
        assert_eq!(normalize_calendar_url("HTTPS://Host:443/a/"), "https://host/a");
        assert_eq!(
            normalize_calendar_url("http://CalDAV.Example.com:80/cal"),
            "http://caldav.example.com/cal"
        );
    }

    #[test]
    fn non_default_port_is_kept() {
        assert_eq!(
            normalize_calendar_url("https://example.com:8443/dav/"),
            "https://example.com:8443/dav"
        );
    }

    #[test]
    fn duplicate_and_trailing_slashes() {
        assert_eq!(
            normalize_calendar_url("https://example.com//calendars///user/home/"),
            "https://example.com/calendars/user/home"
        );
        assert_eq!(normalize_calendar_url("https://example.com/"), "https://example.com");
    }

    #[test]
    fn path_case_is_preserved() {
        assert_eq!(
            normalize_calendar_url("https://EXAMPLE.com/Calendars/Work/"),
            "https://example.com/Calendars/Work"
        );
    }

    #[test]
    fn userinfo_and_fragment_dropped() {
        assert_eq!(
            normalize_calendar_url("https://user:pw@example.com/cal/#frag"),
            "https://example.com/cal"
        );
    }

    #[test]
    fn relative_resolved_against_base() {
        let base = Url::parse("https://p01-caldav.icloud.com/123/calendars/").unwrap();
        assert_eq!(
            normalize_with_base("/123/calendars/work/", Some(&base)),
            "https://p01-caldav.icloud.com/123/calendars/work"
        );
        assert_eq!(
            normalize_with_base("home/", Some(&base)),
            "https://p01-caldav.icloud.com/123/calendars/home"
        );
        assert_eq!(
            normalize_with_base("https://Other.example.com/x/", Some(&base)),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn relative_without_base_keeps_path() {
        assert_eq!(normalize_calendar_url("/calendars//user/a/../b/"), "/calendars/user/b");
        assert_eq!(normalize_calendar_url("/"), "");
    }

    #[test]
    fn equivalent_spellings_compare_equal() {
        let spellings = [
            "https://example.com/cal/work",
            "HTTPS://EXAMPLE.COM/cal/work/",
            "https://example.com:443//cal/work",
            " https://example.com/cal/./work/ ",
        ];
        let first = CalendarUrl::new(spellings[0]);
        for s in spellings {
            assert_eq!(CalendarUrl::new(s), first, "spelling {s:?}");
        }
    }

    #[test]
    fn normalization_is_idempotent() {
        let inputs = [
            "HTTPS://Host:443/a/",
            "https://example.com/",
            "https://example.com:8443//x//y/",
            "http://[::1]:80/dav/",
            "webcal://Feeds.Example.com/holidays.ics",
            "/calendars/a/../b//",
            "relative//path/",
            "https://example.com/a%20b/?q=1",
            "",
        ];
        for input in inputs {
            let once = normalize_calendar_url(input);
            assert_eq!(normalize_calendar_url(&once), once, "input {input:?}");
        }
    }

    #[test]
    fn child_detection() {
        let calendar = CalendarUrl::new("https://example.com/cal/work/");
        let event = CalendarUrl::new("https://example.com/cal/work/event-1.ics");
        let sibling = CalendarUrl::new("https://example.com/cal/workshop/event.ics");

        assert!(event.is_child_of(&calendar));
        assert!(!sibling.is_child_of(&calendar));
        assert!(!calendar.is_child_of(&calendar));
    }

    #[test]
    fn serde_renormalizes() {
        let url: CalendarUrl = serde_json::from_str(r#""HTTPS://Example.com/cal/""#).unwrap();
        assert_eq!(url.as_str(), "https://example.com/cal");
        assert_eq!(serde_json::to_string(&url).unwrap(), r#""https://example.com/cal""#);
    }
}
