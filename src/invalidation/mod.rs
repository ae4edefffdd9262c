//! Write-path invalidation.
//!
//! Call [`InvalidationManager::invalidate`] right after a mutation commits:
//! it deletes the mutated entity's entry and every entry under the given list
//! prefixes (cached collection views that may contain the entity).

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{CacheError, Result};
use crate::key::CacheKey;
use crate::store::Store;

/// What an [`invalidate`](InvalidationManager::invalidate) call removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    /// The entity key that was deleted.
    pub entity_key: String,
    /// Distinct prefixes that were cleared, in sorted order.
    pub prefixes: Vec<String>,
    /// Live entries removed across all prefixes.
    pub list_entries_removed: usize,
}

/// Issues point and prefix deletes against a [`Store`].
///
/// Failures are not retried. A failed delete means the mutation succeeded but
/// the cache may still serve the old value until its TTL runs out; the error
/// is returned so the caller can decide what to do about that.
#[derive(Clone)]
pub struct InvalidationManager {
    store: Arc<dyn Store>,
}

impl InvalidationManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Deletes `entity_key` and every entry under each of `list_prefixes`.
    ///
    /// Duplicate prefixes are collapsed. Deletes run in order (entity first,
    /// then prefixes sorted) and stop at the first failure.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Encoding`] if a prefix is empty, which would clear the
    ///   whole keyspace. Checked before anything is deleted.
    /// - [`CacheError::BackendUnavailable`] if a delete fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use std::time::Duration;
    /// use bytes::Bytes;
    /// use rtcache::{CacheKey, InvalidationManager, MemoryStore, Store};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> rtcache::Result<()> {
    /// let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    /// store.set("product:42", Bytes::from_static(b"{}"), Duration::from_secs(60)).await?;
    /// store.set("product_list:1", Bytes::from_static(b"[]"), Duration::from_secs(60)).await?;
    ///
    /// let manager = InvalidationManager::new(Arc::clone(&store));
    /// let report = manager
    ///     .invalidate(&CacheKey::new("product:42")?, ["product_list"])
    ///     .await?;
    /// assert_eq!(report.list_entries_removed, 1);
    /// assert!(store.get("product:42").await?.is_none());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn invalidate<I, S>(
        &self,
        entity_key: &CacheKey,
        list_prefixes: I,
    ) -> Result<InvalidationReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prefixes: BTreeSet<String> = list_prefixes
            .into_iter()
            .map(|p| p.as_ref().to_owned())
            .collect();
        if prefixes.iter().any(String::is_empty) {
            return Err(CacheError::Encoding(
                "empty invalidation prefix would match every key".into(),
            ));
        }

        if let Err(err) = self.store.delete(entity_key.as_str()).await {
            warn!(key = %entity_key, error = %err, "invalidation failed, cache may be stale");
            return Err(err);
        }

        let mut removed = 0;
        for prefix in &prefixes {
            match self.store.delete_prefix(prefix).await {
                Ok(n) => removed += n,
                Err(err) => {
                    warn!(
                        key = %entity_key,
                        prefix = %prefix,
                        error = %err,
                        "list invalidation failed, cache may be stale"
                    );
                    return Err(err);
                }
            }
        }

        debug!(
            key = %entity_key,
            prefixes = prefixes.len(),
            removed,
            backend = self.store.name(),
            "invalidated"
        );
        Ok(InvalidationReport {
            entity_key: entity_key.as_str().to_owned(),
            prefixes: prefixes.into_iter().collect(),
            list_entries_removed: removed,
        })
    }
}

impl std::fmt::Debug for InvalidationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationManager")
            .field("store", &self.store.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::key::KeyCodec;
    use crate::key_args;
    use crate::store::MemoryStore;

    const TTL: Duration = Duration::from_secs(60);

    async fn seeded() -> Arc<dyn Store> {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        for key in ["product:1", "product:2", "product_list:1", "product_list:2", "cat_list:1"] {
            store.set(key, Bytes::from_static(b"1"), TTL).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn removes_entity_and_lists() {
        let store = seeded().await;
        let manager = InvalidationManager::new(Arc::clone(&store));

        let report = manager
            .invalidate(&CacheKey::new("product:1").unwrap(), ["product_list", "product_list"])
            .await
            .unwrap();

        assert_eq!(report.entity_key, "product:1");
        assert_eq!(report.prefixes, vec!["product_list".to_string()]);
        assert_eq!(report.list_entries_removed, 2);
        assert!(store.get("product:1").await.unwrap().is_none());
        assert!(store.get("product_list:2").await.unwrap().is_none());
        assert!(store.get("product:2").await.unwrap().is_some());
        assert!(store.get("cat_list:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_entity_is_fine() {
        let store = seeded().await;
        let manager = InvalidationManager::new(store);
        let report = manager
            .invalidate(&CacheKey::new("product:99").unwrap(), Vec::<String>::new())
            .await
            .unwrap();
        assert_eq!(report.list_entries_removed, 0);
        assert!(report.prefixes.is_empty());
    }

    #[tokio::test]
    async fn empty_prefix_rejected_before_deleting() {
        let store = seeded().await;
        let manager = InvalidationManager::new(Arc::clone(&store));
        let err = manager
            .invalidate(&CacheKey::new("product:1").unwrap(), [""])
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Encoding(_)));
        assert!(store.get("product:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn in_flight_lock_survives_list_invalidation() {
        let store = seeded().await;
        let page = KeyCodec::encode("product_list", &key_args![1, 10]).unwrap();
        store.set(page.as_str(), Bytes::from_static(b"[]"), TTL).await.unwrap();
        store
            .set_if_absent(&page.lock_key(), Bytes::from_static(b"holder"), TTL)
            .await
            .unwrap();
        let manager = InvalidationManager::new(Arc::clone(&store));

        manager
            .invalidate(&CacheKey::new("product:1").unwrap(), ["product_list"])
            .await
            .unwrap();

        assert!(store.get(page.as_str()).await.unwrap().is_none());
        assert_eq!(
            store.get(&page.lock_key()).await.unwrap(),
            Some(Bytes::from_static(b"holder"))
        );
    }

    // Fails every prefix delete, succeeds everything else.
    struct BrokenScan(MemoryStore);

    #[async_trait]
    impl Store for BrokenScan {
        fn name(&self) -> &'static str {
            "broken-scan"
        }
        async fn get(&self, key: &str) -> Result<Option<Bytes>> {
            self.0.get(key).await
        }
        async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
            self.0.set(key, value, ttl).await
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
        async fn delete_prefix(&self, _prefix: &str) -> Result<usize> {
            Err(CacheError::backend("scan refused"))
        }
    }

    #[tokio::test]
    async fn backend_failure_is_surfaced() {
        let store: Arc<dyn Store> = Arc::new(BrokenScan(MemoryStore::new()));
        store.set("product:1", Bytes::from_static(b"1"), TTL).await.unwrap();
        let manager = InvalidationManager::new(Arc::clone(&store));

        let err = manager
            .invalidate(&CacheKey::new("product:1").unwrap(), ["product_list"])
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::BackendUnavailable(_)));
        // The point delete ran before the failing prefix delete.
        assert!(store.get("product:1").await.unwrap().is_none());
    }
}
