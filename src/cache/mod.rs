//! Caching layer: read-through caching over in-memory and external backends.
//!
//! ## Core types
//!
//! - [`ReadThroughCache`]: get-or-compute with TTL and stampede protection.
//! - [`Cache`]: a configured cache instance owning one store, exposing the
//!   read path ([`get_or_compute`](Cache::get_or_compute)) and the write path
//!   ([`invalidate`](Cache::invalidate)).
//! - [`CacheStats`]: hit / miss counters.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::info;

use crate::config::{Backend, CacheConfig};
use crate::error::{BoxError, Result};
use crate::invalidation::{InvalidationManager, InvalidationReport};
use crate::key::CacheKey;
use crate::store::{MemoryStore, Store};

mod lock;
pub mod read_through;
pub mod stats;

pub use read_through::ReadThroughCache;
pub use stats::CacheStats;

/// A configured cache instance.
///
/// Owns one [`Store`] shared by its read-through cache and its invalidation
/// manager. Construct it once at startup and share it (e.g. behind an `Arc`)
/// for the life of the process.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rtcache::{Cache, CacheConfig, CacheKey, KeyCodec, key_args};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> rtcache::Result<()> {
/// let cache = Cache::connect(CacheConfig::default()).await?;
///
/// let page = KeyCodec::encode("product_list", &key_args![1, 10])?;
/// let names: Vec<String> = cache
///     .fetch(&page, || async { Ok::<_, std::io::Error>(vec!["Widget".to_string()]) })
///     .await?;
/// assert_eq!(names, ["Widget"]);
///
/// // After updating product 42:
/// cache.invalidate(&CacheKey::new("product:42")?, ["product_list"]).await?;
/// assert!(cache.get::<Vec<String>>(&page).await?.is_none());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Cache {
    reader: ReadThroughCache,
    invalidator: InvalidationManager,
}

impl Cache {
    /// Validates `config` and builds the backend it selects.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Config`](crate::CacheError::Config) if the config is
    ///   invalid, or selects the networked backend without the `redis` feature.
    /// - [`CacheError::BackendUnavailable`](crate::CacheError::BackendUnavailable)
    ///   if the networked backend cannot be reached.
    pub async fn connect(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn Store> = match config.backend {
            Backend::InProcess => Arc::new(MemoryStore::new()),
            Backend::Networked => connect_networked(&config.url).await?,
        };
        info!(backend = %config.backend, store = store.name(), "cache ready");
        Self::with_store(store, config)
    }

    /// Builds a cache over an existing store.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`](crate::CacheError::Config) if `config`
    /// is invalid. `config.backend` and `config.url` are ignored.
    pub fn with_store(store: Arc<dyn Store>, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            invalidator: InvalidationManager::new(Arc::clone(&store)),
            reader: ReadThroughCache::new(store, config),
        })
    }

    /// The read path: see [`ReadThroughCache::get_or_compute`].
    pub async fn get_or_compute<T, F, Fut, E>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        lock_timeout: Duration,
        producer: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        self.reader
            .get_or_compute(key, ttl, lock_timeout, producer)
            .await
    }

    /// The read path with the configured TTL and lock timeout.
    pub async fn fetch<T, F, Fut, E>(&self, key: &CacheKey, producer: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        self.reader.fetch(key, producer).await
    }

    /// The write path: see [`InvalidationManager::invalidate`].
    pub async fn invalidate<I, S>(
        &self,
        entity_key: &CacheKey,
        list_prefixes: I,
    ) -> Result<InvalidationReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.invalidator.invalidate(entity_key, list_prefixes).await
    }

    /// Reads `key` without computing on a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        self.reader.get(key).await
    }

    /// Stores `value` under `key` unconditionally.
    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) -> Result<()> {
        self.reader.set(key, value, ttl).await
    }

    /// Removes a single key.
    pub async fn delete(&self, key: &CacheKey) -> Result<()> {
        self.reader.delete(key).await
    }

    pub fn stats(&self) -> CacheStats {
        self.reader.stats()
    }

    pub fn reader(&self) -> &ReadThroughCache {
        &self.reader
    }

    pub fn invalidator(&self) -> &InvalidationManager {
        &self.invalidator
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        self.reader.store()
    }
}

#[cfg(feature = "redis")]
async fn connect_networked(url: &str) -> Result<Arc<dyn Store>> {
    let store = crate::store::RedisStore::connect(url).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
async fn connect_networked(_url: &str) -> Result<Arc<dyn Store>> {
    Err(crate::error::CacheError::Config(
        "the networked backend requires the `redis` feature".into(),
    ))
}
