//! Read-through cache with stampede protection.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::lock::LockGuard;
use super::stats::{CacheStats, StatsRecorder};
use crate::config::CacheConfig;
use crate::error::{BoxError, CacheError, Result};
use crate::key::CacheKey;
use crate::store::Store;

/// Get-or-compute over a [`Store`].
///
/// On a miss the first caller takes a short-lived lock entry next to the key,
/// runs the producer, stores the result and deletes the lock. Callers that
/// miss while the lock is held sleep for the configured backoff and look
/// again, up to `max_retries` times, so the producer runs at most once per
/// miss across every caller sharing the store.
///
/// Values are stored as JSON. Producer errors are never cached.
pub struct ReadThroughCache {
    store: Arc<dyn Store>,
    config: CacheConfig,
    stats: StatsRecorder,
}

impl ReadThroughCache {
    /// Wraps `store`, taking TTL and retry defaults from `config`.
    pub fn new(store: Arc<dyn Store>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            stats: StatsRecorder::default(),
        }
    }

    /// Returns the cached value for `key`, computing and storing it on a miss.
    ///
    /// # Arguments
    ///
    /// - `key`: the encoded cache key.
    /// - `ttl`: lifetime of a freshly computed entry.
    /// - `lock_timeout`: lifetime of the stampede lock; bounds how long a
    ///   crashed holder can keep others waiting.
    /// - `producer`: computes the value on a miss. Called at most once.
    ///
    /// # Errors
    ///
    /// - [`CacheError::BackendUnavailable`] if the store fails.
    /// - [`CacheError::LockTimeout`] if another caller held the lock for longer
    ///   than `backoff × max_retries`.
    /// - [`CacheError::ProducerFailure`] if `producer` fails. The lock is
    ///   released and nothing is stored.
    /// - [`CacheError::Serialization`] if the value cannot be serialized.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use std::time::Duration;
    /// use rtcache::{CacheConfig, CacheKey, MemoryStore, ReadThroughCache};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> rtcache::Result<()> {
    /// let cache = ReadThroughCache::new(Arc::new(MemoryStore::new()), CacheConfig::default());
    /// let key = CacheKey::new("product:42")?;
    ///
    /// let name: String = cache
    ///     .get_or_compute(&key, Duration::from_secs(60), Duration::from_secs(5), || async {
    ///         Ok::<_, std::io::Error>("Widget".to_string())
    ///     })
    ///     .await?;
    /// assert_eq!(name, "Widget");
    /// # Ok(())
    /// # }
    /// ```
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
        let backoff = self.config.backoff_interval();
        let mut retries: u32 = 0;

        loop {
            if let Some(value) = self.lookup(key).await? {
                self.stats.hit();
                debug!(key = %key, retries, "cache hit");
                return Ok(value);
            }

            if let Some(guard) = LockGuard::try_acquire(&self.store, key, lock_timeout).await? {
                return self.compute(key, ttl, guard, producer).await;
            }

            if retries >= self.config.max_retries {
                self.stats.lock_timeout();
                let waited = backoff.checked_mul(retries).unwrap_or(Duration::MAX);
                warn!(key = %key, ?waited, "gave up waiting for lock holder");
                return Err(CacheError::LockTimeout {
                    key: key.to_string(),
                    waited,
                });
            }
            if retries == 0 {
                self.stats.lock_wait();
                debug!(key = %key, "lock held elsewhere, waiting");
            }
            retries += 1;
            tokio::time::sleep(backoff).await;
        }
    }

    /// [`get_or_compute`](Self::get_or_compute) with the configured default TTL
    /// and lock timeout.
    pub async fn fetch<T, F, Fut, E>(&self, key: &CacheKey, producer: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        self.get_or_compute(key, self.config.ttl(), self.config.lock_timeout(), producer)
            .await
    }

    /// Reads `key` without computing anything on a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        let value = self.lookup(key).await?;
        if value.is_some() {
            self.stats.hit();
        } else {
            self.stats.miss();
        }
        Ok(value)
    }

    /// Stores `value` under `key` unconditionally.
    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.store.set(key.as_str(), Bytes::from(payload), ttl).await
    }

    /// Removes `key`.
    pub async fn delete(&self, key: &CacheKey) -> Result<()> {
        self.store.delete(key.as_str()).await
    }

    /// Counters since this cache was created.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The settings this cache was built with.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // Runs with the lock held. Every path below releases it explicitly; the
    // guard's Drop only covers cancellation and panics.
    async fn compute<T, F, Fut, E>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        guard: LockGuard,
        producer: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        // The previous holder may have published and released between our
        // miss and our lock.
        match self.lookup(key).await {
            Ok(Some(value)) => {
                guard.release().await;
                self.stats.hit();
                debug!(key = %key, "cache hit after lock");
                return Ok(value);
            }
            Ok(None) => {}
            Err(err) => {
                guard.release().await;
                return Err(err);
            }
        }

        self.stats.miss();
        debug!(key = %key, ?ttl, "cache miss, computing");

        let value = match producer().await {
            Ok(value) => value,
            Err(err) => {
                guard.release().await;
                self.stats.producer_failure();
                let err: BoxError = err.into();
                warn!(key = %key, error = %err, "producer failed, nothing cached");
                return Err(CacheError::ProducerFailure(err));
            }
        };

        let stored = self.set(key, &value, ttl).await;
        guard.release().await;
        stored?;
        Ok(value)
    }

    // A payload that no longer decodes (e.g. the value type changed shape) is
    // dropped and treated as a miss.
    async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        let Some(payload) = self.store.get(key.as_str()).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&payload) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(key = %key, error = %err, "discarding undecodable cached payload");
                self.store.delete(key.as_str()).await?;
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for ReadThroughCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadThroughCache")
            .field("store", &self.store.name())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    const TTL: Duration = Duration::from_secs(60);
    const LOCK: Duration = Duration::from_secs(5);

    fn cache_over(store: Arc<dyn Store>) -> ReadThroughCache {
        let config = CacheConfig::default()
            .backoff(Duration::from_millis(10))
            .max_retries(50);
        ReadThroughCache::new(store, config)
    }

    fn memory_cache() -> (ReadThroughCache, Arc<dyn Store>) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        (cache_over(Arc::clone(&store)), store)
    }

    fn key(name: &str) -> CacheKey {
        CacheKey::new(name).unwrap()
    }

    #[tokio::test]
    async fn second_call_is_a_hit() {
        let (cache, _) = memory_cache();
        let calls = &AtomicUsize::new(0);
        let k = key("product:42");

        for _ in 0..2 {
            let v: u32 = cache
                .get_or_compute(&k, TTL, LOCK, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, io::Error>(42)
                })
                .await
                .unwrap();
            assert_eq!(v, 42);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn producer_error_is_not_cached_and_releases_lock() {
        let (cache, store) = memory_cache();
        let k = key("product:7");

        let err = cache
            .get_or_compute::<u32, _, _, _>(&k, TTL, LOCK, || async {
                Err(io::Error::other("db down"))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::ProducerFailure(_)));
        assert!(store.get(k.as_str()).await.unwrap().is_none());
        assert!(store.get(&k.lock_key()).await.unwrap().is_none());
        assert_eq!(cache.stats().producer_failures, 1);

        // The next caller computes normally.
        let v: u32 = cache
            .get_or_compute(&k, TTL, LOCK, || async { Ok::<_, io::Error>(7) })
            .await
            .unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test]
    async fn held_lock_times_out() {
        let (cache, store) = memory_cache();
        let k = key("page:9");
        store
            .set_if_absent(&k.lock_key(), Bytes::from_static(b"other"), LOCK)
            .await
            .unwrap();

        let called = &AtomicUsize::new(0);
        let err = cache
            .get_or_compute::<u32, _, _, _>(&k, TTL, LOCK, move || async move {
                called.fetch_add(1, Ordering::SeqCst);
                Ok::<_, io::Error>(1)
            })
            .await
            .unwrap_err();

        match err {
            CacheError::LockTimeout { key, waited } => {
                assert_eq!(key, "page:9");
                assert_eq!(waited, Duration::from_millis(500));
            }
            other => panic!("expected LockTimeout, got {other:?}"),
        }
        assert_eq!(called.load(Ordering::SeqCst), 0);
        let stats = cache.stats();
        assert_eq!((stats.lock_waits, stats.lock_timeouts), (1, 1));
    }

    #[tokio::test]
    async fn waiter_picks_up_value_published_by_holder() {
        let (cache, store) = memory_cache();
        let k = key("page:2");
        store
            .set_if_absent(&k.lock_key(), Bytes::from_static(b"other"), LOCK)
            .await
            .unwrap();

        let publisher = {
            let store = Arc::clone(&store);
            let k = k.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(40)).await;
                store.set(k.as_str(), Bytes::from_static(b"\"fresh\""), TTL).await.unwrap();
                store.delete(&k.lock_key()).await.unwrap();
            })
        };

        let v: String = cache
            .get_or_compute(&k, TTL, LOCK, || async {
                Ok::<_, io::Error>("recomputed".to_string())
            })
            .await
            .unwrap();
        publisher.await.unwrap();

        assert_eq!(v, "fresh");
        assert_eq!(cache.stats().misses, 0);
    }

    #[tokio::test]
    async fn expired_lock_is_reclaimed() {
        let clock = ManualClock::new();
        let store: Arc<dyn Store> = Arc::new(MemoryStore::with_clock(Arc::new(clock.clone())));
        let cache = cache_over(Arc::clone(&store));
        let k = key("page:3");
        store
            .set_if_absent(&k.lock_key(), Bytes::from_static(b"crashed"), LOCK)
            .await
            .unwrap();
        clock.advance(LOCK);

        let v: u32 = cache
            .get_or_compute(&k, TTL, LOCK, || async { Ok::<_, io::Error>(3) })
            .await
            .unwrap();
        assert_eq!(v, 3);
        assert_eq!(cache.stats().lock_waits, 0);
    }

    #[tokio::test]
    async fn undecodable_payload_is_recomputed() {
        let (cache, store) = memory_cache();
        let k = key("product:1");
        store.set(k.as_str(), Bytes::from_static(b"not json"), TTL).await.unwrap();

        let v: u32 = cache
            .get_or_compute(&k, TTL, LOCK, || async { Ok::<_, io::Error>(1) })
            .await
            .unwrap();
        assert_eq!(v, 1);
        assert_eq!(store.get(k.as_str()).await.unwrap(), Some(Bytes::from_static(b"1")));
    }

    #[tokio::test]
    async fn explicit_get_set_delete() {
        let (cache, _) = memory_cache();
        let k = key("product_list_api");

        assert_eq!(cache.get::<Vec<u32>>(&k).await.unwrap(), None);
        cache.set(&k, &vec![1u32, 2, 3], TTL).await.unwrap();
        assert_eq!(cache.get::<Vec<u32>>(&k).await.unwrap(), Some(vec![1, 2, 3]));
        cache.delete(&k).await.unwrap();
        assert_eq!(cache.get::<Vec<u32>>(&k).await.unwrap(), None);
    }

    #[tokio::test]
    async fn fetch_uses_configured_ttl() {
        let clock = ManualClock::new();
        let store: Arc<dyn Store> = Arc::new(MemoryStore::with_clock(Arc::new(clock.clone())));
        let config = CacheConfig::default().default_ttl(Duration::from_secs(30));
        let cache = ReadThroughCache::new(store, config);
        let k = key("weather");
        let calls = &AtomicUsize::new(0);
        let produce = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, io::Error>(72.5f64)
        };

        cache.fetch::<f64, _, _, _>(&k, produce).await.unwrap();
        clock.advance(Duration::from_secs(29));
        cache.fetch::<f64, _, _, _>(&k, produce).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(1));
        cache.fetch::<f64, _, _, _>(&k, produce).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    // Accepts locks but refuses to store values.
    struct RefusingSet(MemoryStore);

    #[async_trait]
    impl Store for RefusingSet {
        fn name(&self) -> &'static str {
            "refusing-set"
        }
        async fn get(&self, key: &str) -> Result<Option<Bytes>> {
            self.0.get(key).await
        }
        async fn set(&self, _key: &str, _value: Bytes, _ttl: Duration) -> Result<()> {
            Err(CacheError::backend("write refused"))
        }
        async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool> {
            self.0.set_if_absent(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<()> {
            self.0.delete(key).await
        }
        async fn delete_if_eq(&self, key: &str, expected: &[u8]) -> Result<bool> {
            self.0.delete_if_eq(key, expected).await
        }
        async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
            self.0.delete_prefix(prefix).await
        }
    }

    #[tokio::test]
    async fn failed_store_write_releases_lock() {
        let store: Arc<dyn Store> = Arc::new(RefusingSet(MemoryStore::new()));
        let cache = cache_over(Arc::clone(&store));
        let k = key("page:6");

        let err = cache
            .get_or_compute(&k, TTL, LOCK, || async { Ok::<_, io::Error>(6u32) })
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::BackendUnavailable(_)));
        assert!(store.get(&k.lock_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unserializable_value_releases_lock() {
        let (cache, store) = memory_cache();
        let k = key("page:7");

        // JSON object keys must be strings.
        let err = cache
            .get_or_compute(&k, TTL, LOCK, || async {
                Ok::<_, io::Error>(BTreeMap::from([((1u32, 2u32), 3u32)]))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::Serialization(_)));
        assert!(store.get(k.as_str()).await.unwrap().is_none());
        assert!(store.get(&k.lock_key()).await.unwrap().is_none());
    }
}
