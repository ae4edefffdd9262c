//! Key-value backends behind a single async contract.
//!
//! ## Realizations
//!
//! - [`MemoryStore`]: in-process map guarded by a mutex; TTL checked lazily
//!   against a [`Clock`](crate::clock::Clock) on every read.
//! - [`RedisStore`]: networked backend speaking the Redis protocol; TTL is
//!   enforced by the server (requires the `redis` feature).
//!
//! Both are used through `Arc<dyn Store>` so the read-through cache and the
//! invalidation manager never know which one they talk to.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::{CacheEntry, MemoryStore};
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// The backend contract every store implements.
///
/// # Contract
///
/// - `get` treats expired entries exactly like missing ones.
/// - `set` overwrites unconditionally; the entry is visible to the next `get`
///   and expires no earlier than `ttl` after the call.
/// - `set_if_absent` is a single atomic operation, never a read followed by a
///   write. Stampede protection depends on it.
/// - `delete` is idempotent.
/// - `delete_if_eq` compares and deletes in one atomic step. Lock release
///   depends on it: a holder whose lock expired must not delete its
///   successor's lock.
/// - `delete_prefix` removes every data key that starts with `prefix` and
///   leaves stampede locks ([`is_lock_key`](crate::key::is_lock_key)) in
///   place. It need not be atomic across the whole prefix; keys written
///   concurrently with the scan may survive.
#[async_trait]
pub trait Store: Send + Sync {
    /// Short backend label used in log events.
    fn name(&self) -> &'static str;

    /// Returns the live value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Stores `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Stores `value` only if `key` has no live value. Returns whether it stored.
    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool>;

    /// Removes `key`. Succeeds when the key is already absent.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Removes `key` only if its live value equals `expected`. Returns whether
    /// it removed anything.
    async fn delete_if_eq(&self, key: &str, expected: &[u8]) -> Result<bool>;

    /// Removes every data key starting with `prefix`, returning how many were
    /// removed. Lock keys are skipped.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;
}
