//! Error type shared by every cache component.

use std::time::Duration;

use thiserror::Error;

/// Boxed error used to carry backend and producer failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors produced by the cache.
///
/// Every variant propagates to the immediate caller of
/// [`get_or_compute`](crate::cache::ReadThroughCache::get_or_compute) or
/// [`invalidate`](crate::invalidation::InvalidationManager::invalidate). The
/// cache never falls back to stale data on its own.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The store could not be reached or rejected the operation.
    #[error("cache backend unavailable: {0}")]
    BackendUnavailable(#[source] BoxError),

    /// Waiting for another caller's computation exceeded the retry bound.
    #[error("timed out after {waited:?} waiting for the lock on `{key}`")]
    LockTimeout { key: String, waited: Duration },

    /// The value producer returned an error. The lock was released first.
    #[error("value producer failed: {0}")]
    ProducerFailure(#[source] BoxError),

    /// A cache key could not be derived deterministically.
    #[error("cannot encode cache key: {0}")]
    Encoding(String),

    /// A computed value could not be serialized for storage.
    #[error("cannot serialize cached value: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The cache configuration is invalid.
    #[error("invalid cache configuration: {0}")]
    Config(String),
}

impl CacheError {
    /// Wraps any backend error as [`CacheError::BackendUnavailable`].
    pub fn backend(err: impl Into<BoxError>) -> Self {
        Self::BackendUnavailable(err.into())
    }

    /// Returns `true` for [`CacheError::LockTimeout`], the one kind a caller may
    /// want to answer by serving stale data.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::BackendUnavailable(Box::new(err))
    }
}
