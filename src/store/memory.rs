//! In-process store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::trace;

use super::Store;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::key::is_lock_key;

/// A stored value with its expiry bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Bytes,
    pub stored_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(value: Bytes, stored_at: Instant, ttl: Duration) -> Self {
        Self {
            value,
            stored_at,
            ttl,
        }
    }

    /// `true` once `ttl` has fully elapsed at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) >= self.ttl
    }

    /// Time left before expiry, or `None` if already expired.
    pub fn ttl_remaining(&self, now: Instant) -> Option<Duration> {
        let age = now.saturating_duration_since(self.stored_at);
        self.ttl.checked_sub(age).filter(|d| !d.is_zero())
    }
}

/// A process-local [`Store`] backed by a `HashMap`.
///
/// Every operation takes the same mutex, which makes
/// [`set_if_absent`](Store::set_if_absent) atomic across threads. Entries are
/// not shared with other processes and live only as long as the store.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use bytes::Bytes;
/// use rtcache::store::{MemoryStore, Store};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> rtcache::Result<()> {
/// let store = MemoryStore::new();
/// store.set("greeting", Bytes::from_static(b"hi"), Duration::from_secs(60)).await?;
/// assert_eq!(store.get("greeting").await?, Some(Bytes::from_static(b"hi")));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Creates an empty store reading [`SystemClock`].
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store reading the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .lock()
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    /// `true` if no live entries remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every expired entry, returning how many were removed.
    ///
    /// Reads already ignore expired entries; this only reclaims their memory.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    /// Remaining TTL of `key`, or `None` if absent or expired.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        self.entries.lock().get(key)?.ttl_remaining(now)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }
        trace!(key, "dropping expired entry");
        entries.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let entry = CacheEntry::new(value, self.clock.now(), ttl);
        self.entries.lock().insert(key.to_owned(), entry);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|e| !e.is_expired(now)) {
            return Ok(false);
        }
        entries.insert(key.to_owned(), CacheEntry::new(value, now, ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn delete_if_eq(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let owned = entries
            .get(key)
            .is_some_and(|e| !e.is_expired(now) && e.value[..] == *expected);
        if owned {
            entries.remove(key);
        }
        Ok(owned)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let now = self.clock.now();
        let mut removed = 0;
        self.entries.lock().retain(|key, entry| {
            if !key.starts_with(prefix) || is_lock_key(key) {
                return true;
            }
            if !entry.is_expired(now) {
                removed += 1;
            }
            false
        });
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store_with_clock() -> (MemoryStore, ManualClock) {
        let clock = ManualClock::new();
        (MemoryStore::with_clock(Arc::new(clock.clone())), clock)
    }

    fn b(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn get_returns_what_was_set() {
        let store = MemoryStore::new();
        store.set("k", b("v"), MINUTE).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b("v")));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_overwrites() {
        let store = MemoryStore::new();
        store.set("k", b("one"), MINUTE).await.unwrap();
        store.set("k", b("two"), MINUTE).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b("two")));
    }

    #[tokio::test]
    async fn entries_expire_lazily() {
        let (store, clock) = store_with_clock();
        store.set("k", b("v"), Duration::from_secs(1)).await.unwrap();

        clock.advance(Duration::from_millis(999));
        assert!(store.get("k").await.unwrap().is_some());

        clock.advance(Duration::from_millis(1));
        assert_eq!(store.get("k").await.unwrap(), None);
        // Removed on read, not just hidden.
        assert_eq!(store.entries.lock().len(), 0);
    }

    #[tokio::test]
    async fn set_if_absent_only_stores_once() {
        let store = MemoryStore::new();
        assert!(store.set_if_absent("lock", b("a"), MINUTE).await.unwrap());
        assert!(!store.set_if_absent("lock", b("b"), MINUTE).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), Some(b("a")));
    }

    #[tokio::test]
    async fn set_if_absent_reclaims_expired_entries() {
        let (store, clock) = store_with_clock();
        assert!(store.set_if_absent("lock", b("a"), Duration::from_secs(5)).await.unwrap());
        clock.advance(Duration::from_secs(5));
        assert!(store.set_if_absent("lock", b("b"), Duration::from_secs(5)).await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), Some(b("b")));
    }

    #[tokio::test]
    async fn set_if_absent_is_atomic_across_threads() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.set_if_absent("lock", b("x"), MINUTE).await.unwrap()
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new();
        store.set("k", b("v"), MINUTE).await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn delete_prefix_leaves_other_keys() {
        let store = MemoryStore::new();
        store.set("product_list:1", b("a"), MINUTE).await.unwrap();
        store.set("product_list:2", b("b"), MINUTE).await.unwrap();
        store.set("product:1", b("c"), MINUTE).await.unwrap();

        assert_eq!(store.delete_prefix("product_list").await.unwrap(), 2);
        assert_eq!(store.get("product_list:1").await.unwrap(), None);
        assert_eq!(store.get("product:1").await.unwrap(), Some(b("c")));
        assert_eq!(store.delete_prefix("nothing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_if_eq_only_removes_matching_value() {
        let (store, clock) = store_with_clock();
        store.set("lock", b("mine"), Duration::from_secs(5)).await.unwrap();

        assert!(!store.delete_if_eq("lock", b"theirs").await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), Some(b("mine")));
        assert!(store.delete_if_eq("lock", b"mine").await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), None);
        assert!(!store.delete_if_eq("lock", b"mine").await.unwrap());

        store.set("lock", b("mine"), Duration::from_secs(5)).await.unwrap();
        clock.advance(Duration::from_secs(5));
        assert!(!store.delete_if_eq("lock", b"mine").await.unwrap());
    }

    #[tokio::test]
    async fn delete_prefix_keeps_locks() {
        use crate::key::{CacheKey, KeyCodec, LOCK_SUFFIX};
        use crate::key_args;

        let store = MemoryStore::new();
        let page = KeyCodec::encode("product_list", &key_args![1, 10]).unwrap();
        let tricky = KeyCodec::encode("product_list", &key_args![format!("x{LOCK_SUFFIX}")]).unwrap();
        let plain = CacheKey::new("product_list").unwrap();
        store.set(page.as_str(), b("page"), MINUTE).await.unwrap();
        store.set(&page.lock_key(), b("holder"), MINUTE).await.unwrap();
        store.set(&plain.lock_key(), b("holder"), MINUTE).await.unwrap();
        store.set(tricky.as_str(), b("data"), MINUTE).await.unwrap();

        assert_eq!(store.delete_prefix("product_list").await.unwrap(), 2);
        assert_eq!(store.get(page.as_str()).await.unwrap(), None);
        assert_eq!(store.get(tricky.as_str()).await.unwrap(), None);
        assert_eq!(store.get(&page.lock_key()).await.unwrap(), Some(b("holder")));
        assert_eq!(store.get(&plain.lock_key()).await.unwrap(), Some(b("holder")));
    }

    #[tokio::test]
    async fn delete_prefix_does_not_count_expired() {
        let (store, clock) = store_with_clock();
        store.set("p:old", b("a"), Duration::from_secs(1)).await.unwrap();
        clock.advance(Duration::from_secs(2));
        store.set("p:new", b("b"), MINUTE).await.unwrap();
        assert_eq!(store.delete_prefix("p:").await.unwrap(), 1);
        assert_eq!(store.entries.lock().len(), 0);
    }

    #[tokio::test]
    async fn purge_and_ttl() {
        let (store, clock) = store_with_clock();
        store.set("short", b("a"), Duration::from_secs(1)).await.unwrap();
        store.set("long", b("b"), Duration::from_secs(10)).await.unwrap();
        clock.advance(Duration::from_secs(4));

        assert_eq!(store.ttl("long"), Some(Duration::from_secs(6)));
        assert_eq!(store.ttl("short"), None);
        assert_eq!(store.len(), 1);
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.purge_expired(), 0);
    }
}
