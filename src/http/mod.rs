//! HTTP cache-control helpers for response headers.
//!
//! This module does not serve HTTP. It produces the header values a handler
//! attaches to its responses and decides whether a conditional request can be
//! answered with `304 Not Modified`:
//!
//! - [`CacheControl`]: `Cache-Control` directives.
//! - [`ETag`]: entity tags and `If-None-Match` matching.
//! - [`CacheHeaders`]: collects `Cache-Control`, `ETag`, `Expires`,
//!   `Last-Modified` and `Vary` for one response.
//! - [`http_date`] / [`parse_http_date`]: IMF-fixdate formatting.

use std::time::Duration;

use chrono::{DateTime, Utc};

pub mod cache_control;
pub mod etag;

pub use cache_control::{CacheControl, ParseCacheControlError};
pub use etag::{ETag, ParseETagError};

/// Formats `at` as an HTTP date, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parses an HTTP date in IMF-fixdate form. Returns `None` if malformed.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Outcome of evaluating a conditional request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The client's copy is current; answer `304 Not Modified`.
    NotModified,
    /// Send the full response.
    Modified,
}

/// The caching headers of one response.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rtcache::http::{CacheControl, CacheHeaders, ETag, Freshness};
///
/// let body = b"<h1>Conditional Content</h1>";
/// let headers = CacheHeaders::new()
///     .cache_control(CacheControl::cache_for(Duration::from_secs(300)))
///     .etag(ETag::from_content(body));
///
/// let etag = headers.get_etag().unwrap().to_string();
/// assert_eq!(headers.evaluate(Some(&etag), None), Freshness::NotModified);
/// assert_eq!(headers.evaluate(None, None), Freshness::Modified);
/// assert_eq!(headers.to_pairs()[0], ("Cache-Control", "public, max-age=300".to_string()));
/// ```
#[derive(Debug, Clone, Default)]
pub struct CacheHeaders {
    cache_control: Option<CacheControl>,
    etag: Option<ETag>,
    expires: Option<DateTime<Utc>>,
    last_modified: Option<DateTime<Utc>>,
    vary: Vec<String>,
}

impl CacheHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn cache_control(mut self, cc: CacheControl) -> Self {
        self.cache_control = Some(cc);
        self
    }

    #[must_use]
    pub fn etag(mut self, etag: ETag) -> Self {
        self.etag = Some(etag);
        self
    }

    #[must_use]
    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires = Some(at);
        self
    }

    /// Sets `Expires` to `now + ttl`. Durations too large for a date are ignored.
    #[must_use]
    pub fn expires_in(mut self, now: DateTime<Utc>, ttl: Duration) -> Self {
        self.expires = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl));
        self
    }

    #[must_use]
    pub fn last_modified(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = Some(at);
        self
    }

    /// Adds a request header name the response varies on.
    #[must_use]
    pub fn vary(mut self, header: impl Into<String>) -> Self {
        let header = header.into();
        if !self.vary.iter().any(|h| h.eq_ignore_ascii_case(&header)) {
            self.vary.push(header);
        }
        self
    }

    pub fn get_etag(&self) -> Option<&ETag> {
        self.etag.as_ref()
    }

    /// Header `(name, value)` pairs in a fixed order, skipping unset ones.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(5);
        if let Some(cc) = &self.cache_control {
            pairs.push(("Cache-Control", cc.to_string()));
        }
        if let Some(etag) = &self.etag {
            pairs.push(("ETag", etag.to_string()));
        }
        if let Some(at) = self.expires {
            pairs.push(("Expires", http_date(at)));
        }
        if let Some(at) = self.last_modified {
            pairs.push(("Last-Modified", http_date(at)));
        }
        if !self.vary.is_empty() {
            pairs.push(("Vary", self.vary.join(", ")));
        }
        pairs
    }

    /// Evaluates request preconditions against these headers.
    ///
    /// `If-None-Match` takes precedence; `If-Modified-Since` is consulted only
    /// when it is absent (RFC 9110 §13.2.2).
    pub fn evaluate(&self, if_none_match: Option<&str>, if_modified_since: Option<&str>) -> Freshness {
        if let Some(header) = if_none_match {
            return match &self.etag {
                Some(etag) if etag.matches_if_none_match(header) => Freshness::NotModified,
                _ => Freshness::Modified,
            };
        }

        let since = if_modified_since.and_then(parse_http_date);
        match (self.last_modified, since) {
            // HTTP dates have second precision.
            (Some(modified), Some(since)) if modified.timestamp() <= since.timestamp() => {
                Freshness::NotModified
            }
            _ => Freshness::Modified,
        }
    }
}
