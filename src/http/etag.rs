//! Entity tags and `If-None-Match` evaluation (RFC 9110 §8.8.3, §13.1.2).

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

/// An entity tag.
///
/// # Examples
///
/// ```
/// use rtcache::http::ETag;
///
/// let tag = ETag::from_content(b"<h1>Conditional Content</h1>");
/// assert!(!tag.is_weak());
/// assert!(tag.matches_if_none_match(&tag.to_string()));
/// assert!(tag.matches_if_none_match("*"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ETag {
    tag: String,
    weak: bool,
}

/// Hex digits of the content hash kept in a derived tag.
const CONTENT_TAG_LEN: usize = 32;

impl ETag {
    /// A strong tag with the given opaque value (without quotes).
    pub fn strong(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            weak: false,
        }
    }

    /// A weak tag with the given opaque value (without quotes).
    pub fn weak(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            weak: true,
        }
    }

    /// A strong tag derived from the response body, stable across processes.
    pub fn from_content(body: &[u8]) -> Self {
        let digest = Sha256::digest(body);
        let mut tag = hex::encode(digest);
        tag.truncate(CONTENT_TAG_LEN);
        Self::strong(tag)
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is_weak(&self) -> bool {
        self.weak
    }

    /// Weak comparison: opaque values equal, weakness ignored.
    pub fn weak_eq(&self, other: &ETag) -> bool {
        self.tag == other.tag
    }

    /// Strong comparison: both strong and opaque values equal.
    pub fn strong_eq(&self, other: &ETag) -> bool {
        !self.weak && !other.weak && self.tag == other.tag
    }

    /// Evaluates an `If-None-Match` header against this tag.
    ///
    /// Returns `true` when the client's copy is current and a
    /// `304 Not Modified` should be sent. Uses weak comparison as the RFC
    /// requires for this header. Malformed list members are skipped.
    pub fn matches_if_none_match(&self, header: &str) -> bool {
        let header = header.trim();
        if header == "*" {
            return true;
        }
        split_tag_list(header)
            .filter_map(|candidate| candidate.parse::<ETag>().ok())
            .any(|candidate| candidate.weak_eq(self))
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.weak {
            write!(f, "W/\"{}\"", self.tag)
        } else {
            write!(f, "\"{}\"", self.tag)
        }
    }
}

/// Error returned for a header value that is not a quoted entity tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid entity tag `{0}`")]
pub struct ParseETagError(String);

impl FromStr for ETag {
    type Err = ParseETagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (weak, rest) = match s.strip_prefix("W/") {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let tag = rest
            .strip_prefix('"')
            .and_then(|r| r.strip_suffix('"'))
            .filter(|t| !t.contains('"'))
            .ok_or_else(|| ParseETagError(s.to_owned()))?;
        Ok(Self {
            tag: tag.to_owned(),
            weak,
        })
    }
}

// Splits on commas outside quotes; tags may legally contain commas.
fn split_tag_list(header: &str) -> impl Iterator<Item = &str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in header.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&header[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&header[start..]);
    parts.into_iter().map(str::trim).filter(|p| !p.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_tags_are_stable() {
        let a = ETag::from_content(b"hello");
        let b = ETag::from_content(b"hello");
        let c = ETag::from_content(b"hello!");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.tag().len(), CONTENT_TAG_LEN);
        assert_eq!(a.tag(), "2cf24dba5fb0a30e26e83b2ac5b9e29e");
    }

    #[test]
    fn display_and_parse() {
        assert_eq!(ETag::strong("v1").to_string(), "\"v1\"");
        assert_eq!(ETag::weak("v1").to_string(), "W/\"v1\"");
        assert_eq!("W/\"v1\"".parse::<ETag>().unwrap(), ETag::weak("v1"));
        assert_eq!(" \"v1\" ".parse::<ETag>().unwrap(), ETag::strong("v1"));
        assert!("v1".parse::<ETag>().is_err());
        assert!("\"a\"b\"".parse::<ETag>().is_err());
    }

    #[test]
    fn comparisons() {
        let strong = ETag::strong("x");
        let weak = ETag::weak("x");
        assert!(strong.weak_eq(&weak));
        assert!(!strong.strong_eq(&weak));
        assert!(strong.strong_eq(&ETag::strong("x")));
    }

    #[test]
    fn if_none_match_lists() {
        let tag = ETag::strong("v2");
        assert!(tag.matches_if_none_match("\"v1\", \"v2\""));
        assert!(tag.matches_if_none_match("W/\"v2\""));
        assert!(!tag.matches_if_none_match("\"v1\""));
        assert!(!tag.matches_if_none_match(""));
        assert!(tag.matches_if_none_match("garbage, \"v2\""));
    }

    #[test]
    fn commas_inside_tags() {
        let tag = ETag::strong("a,b");
        assert!(tag.matches_if_none_match("\"x\", \"a,b\""));
        assert!(!ETag::strong("a").matches_if_none_match("\"a,b\""));
    }
}
