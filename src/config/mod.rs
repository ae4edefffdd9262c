//! Cache configuration.
//!
//! A [`CacheConfig`] selects the backend and sets the read-path tunables. It
//! deserializes with per-field defaults, so a host application can embed it in
//! its own config file, and it can also be read from `RTCACHE_*` environment
//! variables with [`CacheConfig::from_env`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Which store a [`Cache`](crate::Cache) talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// Process-local map; not shared across processes.
    #[default]
    InProcess,
    /// Networked key-value server reached at [`CacheConfig::url`].
    Networked,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::InProcess => write!(f, "in-process"),
            Backend::Networked => write!(f, "networked"),
        }
    }
}

impl FromStr for Backend {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in-process" | "inprocess" | "memory" | "local" => Ok(Backend::InProcess),
            "networked" | "redis" | "remote" => Ok(Backend::Networked),
            other => Err(CacheError::Config(format!("unknown backend `{other}`"))),
        }
    }
}

/// Per-instance cache settings.
///
/// | Field               | Default                     |
/// |---------------------|-----------------------------|
/// | `backend`           | `in-process`                |
/// | `url`               | `redis://127.0.0.1:6379/0`  |
/// | `default_ttl_secs`  | `300`                       |
/// | `lock_timeout_secs` | `5`                         |
/// | `backoff_ms`        | `50`                        |
/// | `max_retries`       | `100`                       |
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rtcache::config::{Backend, CacheConfig};
///
/// let config = CacheConfig::default()
///     .backend(Backend::Networked)
///     .url("redis://cache.internal:6379/1")
///     .default_ttl(Duration::from_secs(60));
/// assert!(config.validate().is_ok());
/// assert_eq!(config.lock_timeout(), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Store selection.
    #[serde(default)]
    pub backend: Backend,

    /// Connection target for the networked backend.
    #[serde(default = "default_url")]
    pub url: String,

    /// TTL used by [`fetch`](crate::Cache::fetch).
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Lifetime of a stampede lock, bounding how long a crashed holder can
    /// block other callers.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,

    /// Pause between retries while another caller holds the lock.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Retries before a waiter gives up with a lock timeout.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_lock_timeout_secs() -> u64 {
    5
}

fn default_backoff_ms() -> u64 {
    50
}

fn default_max_retries() -> u32 {
    100
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            url: default_url(),
            default_ttl_secs: default_ttl_secs(),
            lock_timeout_secs: default_lock_timeout_secs(),
            backoff_ms: default_backoff_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl CacheConfig {
    /// Sets the backend.
    #[must_use]
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Sets the networked backend's connection URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Sets the default TTL, truncated to whole seconds.
    #[must_use]
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_secs = ttl.as_secs();
        self
    }

    /// Sets the lock timeout, truncated to whole seconds.
    #[must_use]
    pub fn lock_timeout_secs(mut self, secs: u64) -> Self {
        self.lock_timeout_secs = secs;
        self
    }

    /// Sets the wait between lock retries.
    #[must_use]
    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets how many times a waiter retries before timing out.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// The default TTL as a [`Duration`].
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// The lock timeout as a [`Duration`].
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// The retry backoff as a [`Duration`].
    pub fn backoff_interval(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Longest a waiter will wait for another caller's computation. Saturates
    /// at [`Duration::MAX`].
    pub fn max_wait(&self) -> Duration {
        self.backoff_interval()
            .checked_mul(self.max_retries)
            .unwrap_or(Duration::MAX)
    }

    /// Checks the settings are usable.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] for a zero TTL, lock timeout or backoff,
    /// or an empty URL with the networked backend.
    pub fn validate(&self) -> Result<()> {
        if self.default_ttl_secs == 0 {
            return Err(CacheError::Config("default_ttl_secs must be positive".into()));
        }
        if self.lock_timeout_secs == 0 {
            return Err(CacheError::Config("lock_timeout_secs must be positive".into()));
        }
        if self.backoff_ms == 0 {
            return Err(CacheError::Config("backoff_ms must be positive".into()));
        }
        if self.backend == Backend::Networked && self.url.trim().is_empty() {
            return Err(CacheError::Config(
                "networked backend requires a connection url".into(),
            ));
        }
        Ok(())
    }

    /// Builds a config from `RTCACHE_*` environment variables, falling back to
    /// the defaults for unset ones.
    ///
    /// | Variable                    | Field               |
    /// |-----------------------------|---------------------|
    /// | `RTCACHE_BACKEND`           | `backend`           |
    /// | `RTCACHE_URL`               | `url`               |
    /// | `RTCACHE_DEFAULT_TTL_SECS`  | `default_ttl_secs`  |
    /// | `RTCACHE_LOCK_TIMEOUT_SECS` | `lock_timeout_secs` |
    /// | `RTCACHE_BACKOFF_MS`        | `backoff_ms`        |
    /// | `RTCACHE_MAX_RETRIES`       | `max_retries`       |
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] if a variable is set but cannot be parsed,
    /// or if the resulting config fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = lookup("RTCACHE_BACKEND") {
            config.backend = v.parse()?;
        }
        if let Some(v) = lookup("RTCACHE_URL") {
            config.url = v;
        }
        if let Some(v) = lookup("RTCACHE_DEFAULT_TTL_SECS") {
            config.default_ttl_secs = parse_var("RTCACHE_DEFAULT_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("RTCACHE_LOCK_TIMEOUT_SECS") {
            config.lock_timeout_secs = parse_var("RTCACHE_LOCK_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("RTCACHE_BACKOFF_MS") {
            config.backoff_ms = parse_var("RTCACHE_BACKOFF_MS", &v)?;
        }
        if let Some(v) = lookup("RTCACHE_MAX_RETRIES") {
            config.max_retries = parse_var("RTCACHE_MAX_RETRIES", &v)?;
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| CacheError::Config(format!("{name}={value:?}: {e}")))
}
