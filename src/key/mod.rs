//! Deterministic cache key derivation.
//!
//! A [`CacheKey`] is built from a logical name and an ordered list of
//! [`KeyArg`]s. The layout is
//!
//! ```text
//! name ( 0x1F  tag  byte-length  ':'  value )*
//! ```
//!
//! where `tag` is one letter naming the argument type. Because every argument
//! carries its own length, a key decodes unambiguously from the left: no
//! argument value (even one containing the delimiter) can make two different
//! `(name, args)` pairs produce the same key, and no data key equals a lock
//! key. A string argument may still end in the lock suffix; use
//! [`is_lock_key`] rather than a suffix test to tell the two apart.

use std::fmt;

use crate::error::{CacheError, Result};

/// Field delimiter between the name and each argument.
pub const DELIMITER: char = '\u{1F}';

/// Suffix appended to a data key to form its stampede lock key.
pub const LOCK_SUFFIX: &str = "\u{1F}lock";

/// A single typed argument of a cache key.
///
/// The type is part of the encoding: `Int(1)`, `UInt(1)` and `Str("1")` give
/// three different keys.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyArg {
    Str(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Null,
}

impl KeyArg {
    fn tag(&self) -> char {
        match self {
            KeyArg::Str(_) => 's',
            KeyArg::Int(_) => 'i',
            KeyArg::UInt(_) => 'u',
            KeyArg::Float(_) => 'f',
            KeyArg::Bool(_) => 'b',
            KeyArg::Null => 'n',
        }
    }

    // Canonical textual form of the value, independent of formatting settings.
    fn canonical(&self) -> Result<String> {
        Ok(match self {
            KeyArg::Str(s) => s.clone(),
            KeyArg::Int(i) => i.to_string(),
            KeyArg::UInt(u) => u.to_string(),
            KeyArg::Float(f) => {
                if !f.is_finite() {
                    return Err(CacheError::Encoding(format!(
                        "float argument {f} has no deterministic encoding"
                    )));
                }
                // -0.0 and 0.0 compare equal, so they must encode equally.
                let normalised = if *f == 0.0 { 0.0f64 } else { *f };
                format!("{:016x}", normalised.to_bits())
            }
            KeyArg::Bool(b) => (if *b { "1" } else { "0" }).to_owned(),
            KeyArg::Null => String::new(),
        })
    }
}

impl From<&str> for KeyArg {
    fn from(v: &str) -> Self {
        KeyArg::Str(v.to_owned())
    }
}

impl From<String> for KeyArg {
    fn from(v: String) -> Self {
        KeyArg::Str(v)
    }
}

impl From<&String> for KeyArg {
    fn from(v: &String) -> Self {
        KeyArg::Str(v.clone())
    }
}

macro_rules! impl_from_int {
    ($variant:ident as $target:ty: $($ty:ty),*) => {
        $(impl From<$ty> for KeyArg {
            fn from(v: $ty) -> Self {
                KeyArg::$variant(v as $target)
            }
        })*
    };
}

impl_from_int!(Int as i64: i8, i16, i32, i64, isize);
impl_from_int!(UInt as u64: u8, u16, u32, u64, usize);

impl From<f32> for KeyArg {
    fn from(v: f32) -> Self {
        KeyArg::Float(v as f64)
    }
}

impl From<f64> for KeyArg {
    fn from(v: f64) -> Self {
        KeyArg::Float(v)
    }
}

impl From<bool> for KeyArg {
    fn from(v: bool) -> Self {
        KeyArg::Bool(v)
    }
}

impl<T: Into<KeyArg>> From<Option<T>> for KeyArg {
    fn from(v: Option<T>) -> Self {
        v.map_or(KeyArg::Null, Into::into)
    }
}

/// Builds a `Vec<KeyArg>` from values of mixed types.
///
/// ```
/// use rtcache::{key_args, KeyArg};
///
/// let args = key_args![1u32, "name", true];
/// assert_eq!(args, vec![KeyArg::UInt(1), KeyArg::Str("name".into()), KeyArg::Bool(true)]);
/// ```
#[macro_export]
macro_rules! key_args {
    ($($arg:expr),* $(,)?) => {
        vec![$($crate::KeyArg::from($arg)),*]
    };
}

/// An encoded cache key.
///
/// Keys are compared and hashed by their encoded string. Use
/// [`KeyCodec::encode`] for keys with arguments and [`CacheKey::new`] for plain
/// names such as `"product:42"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Creates a key from a logical name with no arguments.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Encoding`] if `name` is empty or contains the
    /// field delimiter.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self(name))
    }

    /// The encoded key as stored in the backend.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The key of the advisory lock guarding this key's computation.
    pub fn lock_key(&self) -> String {
        format!("{}{LOCK_SUFFIX}", self.0)
    }

    /// Consumes the key, returning the encoded string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The delimiter is unprintable; show it as `|` in logs.
        for c in self.0.chars() {
            if c == DELIMITER {
                f.write_str("|")?;
            } else {
                write!(f, "{c}")?;
            }
        }
        Ok(())
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derives [`CacheKey`]s from a logical name and ordered arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyCodec;

impl KeyCodec {
    /// Encodes `name` and `args` into a key.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Encoding`] if the name is empty or contains the
    /// delimiter, or if a float argument is NaN or infinite.
    ///
    /// # Examples
    ///
    /// ```
    /// use rtcache::{key_args, KeyCodec};
    ///
    /// let a = KeyCodec::encode("product_list", &key_args![1, 10]).unwrap();
    /// let b = KeyCodec::encode("product_list", &key_args![1, 10]).unwrap();
    /// let c = KeyCodec::encode("product_list", &key_args![10, 1]).unwrap();
    /// assert_eq!(a, b);
    /// assert_ne!(a, c);
    /// assert!(a.as_str().starts_with("product_list"));
    /// ```
    pub fn encode(name: &str, args: &[KeyArg]) -> Result<CacheKey> {
        validate_name(name)?;

        let mut key = String::with_capacity(name.len() + args.len() * 8);
        key.push_str(name);
        for arg in args {
            let value = arg.canonical()?;
            key.push(DELIMITER);
            key.push(arg.tag());
            key.push_str(&value.len().to_string());
            key.push(':');
            key.push_str(&value);
        }
        Ok(CacheKey(key))
    }

    /// The prefix shared by every key encoded under `name`, with or without
    /// arguments. Suitable for prefix invalidation of a whole family.
    ///
    /// This is a plain string prefix: `product_list` also covers keys named
    /// `product_list_api`.
    pub fn family_prefix(name: &str) -> Result<String> {
        validate_name(name)?;
        Ok(name.to_owned())
    }
}

/// `true` if `key` is the stampede lock of some data key.
///
/// A lock key is a well-formed data key followed by [`LOCK_SUFFIX`]. Decoding
/// from the left stops at the suffix because `l` is not an argument tag, so a
/// data key whose last string argument happens to end in the suffix is not
/// mistaken for a lock.
pub fn is_lock_key(key: &str) -> bool {
    match key.strip_suffix(LOCK_SUFFIX) {
        Some(data) => !data.is_empty() && decodes(data) && !decodes(key),
        None => false,
    }
}

// Whether `key` parses as `name ( 0x1F tag len ':' value )*`.
fn decodes(key: &str) -> bool {
    let Some(start) = key.find(DELIMITER) else {
        return !key.is_empty();
    };
    if start == 0 {
        return false;
    }
    let mut rest = &key[start..];
    while let Some(field) = rest.strip_prefix(DELIMITER) {
        let mut chars = field.chars();
        if !matches!(chars.next(), Some('s' | 'i' | 'u' | 'f' | 'b' | 'n')) {
            return false;
        }
        let field = chars.as_str();
        let Some((len, value)) = field.split_once(':') else {
            return false;
        };
        let Ok(len) = len.parse::<usize>() else {
            return false;
        };
        if value.len() < len || !value.is_char_boundary(len) {
            return false;
        }
        rest = &value[len..];
    }
    rest.is_empty()
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CacheError::Encoding("logical name is empty".into()));
    }
    if name.contains(DELIMITER) {
        return Err(CacheError::Encoding(format!(
            "logical name {name:?} contains the reserved delimiter"
        )));
    }
    Ok(())
}
