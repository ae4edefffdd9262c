//! Scoped stampede lock.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::key::CacheKey;
use crate::store::Store;

/// Holds the advisory lock for one cache key.
///
/// The lock is a plain store entry at [`CacheKey::lock_key`] whose value is a
/// random holder marker and whose TTL is the lock timeout. Release deletes the
/// entry only while it still carries this guard's marker, so a holder that
/// outlived its timeout cannot drop the lock of whoever took over. Call
/// [`release`](Self::release) on every normal exit path. If the guard is
/// dropped without being released (the holding future was cancelled or the
/// producer panicked), the delete is handed to the Tokio runtime; if no
/// runtime is available, the lock's own expiry reclaims it.
pub(crate) struct LockGuard {
    store: Arc<dyn Store>,
    key: CacheKey,
    lock_key: String,
    holder: String,
    released: bool,
}

impl LockGuard {
    /// Attempts to take the lock for `key`. Returns `None` if another caller
    /// holds it.
    pub(crate) async fn try_acquire(
        store: &Arc<dyn Store>,
        key: &CacheKey,
        timeout: Duration,
    ) -> Result<Option<Self>> {
        let lock_key = key.lock_key();
        let holder = Uuid::new_v4().to_string();
        let acquired = store
            .set_if_absent(&lock_key, Bytes::from(holder.clone()), timeout)
            .await?;
        if !acquired {
            return Ok(None);
        }
        debug!(key = %key, holder = %holder, ?timeout, "lock acquired");
        Ok(Some(Self {
            store: Arc::clone(store),
            key: key.clone(),
            lock_key,
            holder,
            released: false,
        }))
    }

    /// Deletes the lock if this guard still owns it. A failed delete is
    /// logged, not returned: the value has already been handled and the lock
    /// will expire on its own.
    pub(crate) async fn release(mut self) {
        self.released = true;
        match self.store.delete_if_eq(&self.lock_key, self.holder.as_bytes()).await {
            Ok(true) => debug!(key = %self.key, holder = %self.holder, "lock released"),
            Ok(false) => warn!(
                key = %self.key,
                holder = %self.holder,
                "lock expired before release; left to its current holder"
            ),
            Err(err) => warn!(
                key = %self.key,
                error = %err,
                "failed to release lock; it will expire on its own"
            ),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = Arc::clone(&self.store);
        let lock_key = std::mem::take(&mut self.lock_key);
        let holder = std::mem::take(&mut self.holder);
        let key = self.key.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(key = %key, "releasing abandoned lock");
                handle.spawn(async move {
                    if let Err(err) = store.delete_if_eq(&lock_key, holder.as_bytes()).await {
                        warn!(key = %key, error = %err, "failed to release abandoned lock");
                    }
                });
            }
            Err(_) => warn!(key = %key, "no runtime to release abandoned lock; waiting for expiry"),
        }
    }
}
