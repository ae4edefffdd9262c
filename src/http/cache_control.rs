//! `Cache-Control` directive builder and parser (RFC 9111 §5.2).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// A set of `Cache-Control` response directives.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rtcache::http::CacheControl;
///
/// let cc = CacheControl::new().public().max_age(Duration::from_secs(3600));
/// assert_eq!(cc.to_string(), "public, max-age=3600");
///
/// let parsed: CacheControl = "no-cache, must-revalidate".parse().unwrap();
/// assert!(parsed.is_no_cache());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    visibility: Option<Visibility>,
    no_cache: bool,
    no_store: bool,
    must_revalidate: bool,
    immutable: bool,
    max_age: Option<u64>,
    s_maxage: Option<u64>,
    stale_while_revalidate: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visibility {
    Public,
    Private,
}

impl CacheControl {
    /// Creates an empty directive set.
    pub fn new() -> Self {
        Self::default()
    }

    /// `public, max-age=<ttl>`: content that rarely changes.
    pub fn cache_for(ttl: Duration) -> Self {
        Self::new().public().max_age(ttl)
    }

    /// `no-cache, must-revalidate`: content that must be revalidated on every use.
    pub fn revalidate() -> Self {
        Self::new().no_cache().must_revalidate()
    }

    /// `no-store`: content that must never be cached.
    pub fn never() -> Self {
        Self::new().no_store()
    }

    /// Cacheable by shared caches. Replaces `private`.
    #[must_use]
    pub fn public(mut self) -> Self {
        self.visibility = Some(Visibility::Public);
        self
    }

    /// Cacheable by the browser only. Replaces `public`.
    #[must_use]
    pub fn private(mut self) -> Self {
        self.visibility = Some(Visibility::Private);
        self
    }

    #[must_use]
    pub fn no_cache(mut self) -> Self {
        self.no_cache = true;
        self
    }

    #[must_use]
    pub fn no_store(mut self) -> Self {
        self.no_store = true;
        self
    }

    #[must_use]
    pub fn must_revalidate(mut self) -> Self {
        self.must_revalidate = true;
        self
    }

    #[must_use]
    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    /// Freshness lifetime, truncated to whole seconds.
    #[must_use]
    pub fn max_age(mut self, age: Duration) -> Self {
        self.max_age = Some(age.as_secs());
        self
    }

    /// Freshness lifetime for shared caches, truncated to whole seconds.
    #[must_use]
    pub fn s_maxage(mut self, age: Duration) -> Self {
        self.s_maxage = Some(age.as_secs());
        self
    }

    #[must_use]
    pub fn stale_while_revalidate(mut self, window: Duration) -> Self {
        self.stale_while_revalidate = Some(window.as_secs());
        self
    }

    pub fn is_public(&self) -> bool {
        self.visibility == Some(Visibility::Public)
    }

    pub fn is_private(&self) -> bool {
        self.visibility == Some(Visibility::Private)
    }

    pub fn is_no_cache(&self) -> bool {
        self.no_cache
    }

    pub fn is_no_store(&self) -> bool {
        self.no_store
    }

    pub fn get_max_age(&self) -> Option<Duration> {
        self.max_age.map(Duration::from_secs)
    }

    /// Whether a cache may serve a response of this age without revalidating.
    pub fn is_fresh(&self, age: Duration) -> bool {
        if self.no_store || self.no_cache {
            return false;
        }
        self.max_age.is_some_and(|max| age.as_secs() < max)
    }
}

impl fmt::Display for CacheControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        match self.visibility {
            Some(Visibility::Public) => parts.push("public".into()),
            Some(Visibility::Private) => parts.push("private".into()),
            None => {}
        }
        if self.no_cache {
            parts.push("no-cache".into());
        }
        if self.no_store {
            parts.push("no-store".into());
        }
        if self.must_revalidate {
            parts.push("must-revalidate".into());
        }
        if let Some(age) = self.max_age {
            parts.push(format!("max-age={age}"));
        }
        if let Some(age) = self.s_maxage {
            parts.push(format!("s-maxage={age}"));
        }
        if let Some(window) = self.stale_while_revalidate {
            parts.push(format!("stale-while-revalidate={window}"));
        }
        if self.immutable {
            parts.push("immutable".into());
        }
        f.write_str(&parts.join(", "))
    }
}

/// Error returned when a directive carries a malformed value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid Cache-Control directive `{0}`")]
pub struct ParseCacheControlError(String);

impl FromStr for CacheControl {
    type Err = ParseCacheControlError;

    /// Parses a header value. Unknown directives are ignored; known ones with
    /// unparseable values are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut cc = CacheControl::new();
        for raw in s.split(',') {
            let directive = raw.trim();
            if directive.is_empty() {
                continue;
            }
            let (name, value) = match directive.split_once('=') {
                Some((n, v)) => (n.trim(), Some(v.trim().trim_matches('"'))),
                None => (directive, None),
            };
            let seconds = || {
                value
                    .and_then(|v| v.parse::<u64>().ok())
                    .ok_or_else(|| ParseCacheControlError(directive.to_owned()))
            };
            match name.to_ascii_lowercase().as_str() {
                "public" => cc.visibility = Some(Visibility::Public),
                "private" => cc.visibility = Some(Visibility::Private),
                "no-cache" => cc.no_cache = true,
                "no-store" => cc.no_store = true,
                "must-revalidate" => cc.must_revalidate = true,
                "immutable" => cc.immutable = true,
                "max-age" => cc.max_age = Some(seconds()?),
                "s-maxage" => cc.s_maxage = Some(seconds()?),
                "stale-while-revalidate" => cc.stale_while_revalidate = Some(seconds()?),
                _ => {}
            }
        }
        Ok(cc)
    }
}
