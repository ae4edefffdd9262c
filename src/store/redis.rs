//! Networked store speaking the Redis protocol.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tracing::{debug, info};

use super::Store;
use crate::error::Result;
use crate::key::is_lock_key;

/// Keys requested per `SCAN` round trip during prefix deletes.
const SCAN_BATCH: usize = 500;

// Compare-and-delete; GET and DEL must not be split across round trips.
static DELETE_IF_EQ: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"if redis.call('GET', KEYS[1]) == ARGV[1] then
            return redis.call('DEL', KEYS[1])
        else
            return 0
        end",
    )
});

/// A [`Store`] backed by a Redis (or protocol-compatible) server.
///
/// Expiry is enforced server-side. [`set_if_absent`](Store::set_if_absent) maps
/// to `SET key value NX PX ttl`, which the server executes atomically, so
/// every process sharing the server shares the stampede locks.
///
/// [`delete_prefix`](Store::delete_prefix) walks the keyspace with
/// `SCAN MATCH` and deletes each batch as it goes, leaving lock keys alone.
/// Keys written while the scan runs may survive it.
///
/// [`delete_if_eq`](Store::delete_if_eq) runs as a Lua script so the
/// comparison and the delete are one server-side step.
///
/// The underlying [`ConnectionManager`] reconnects on its own; a failed
/// command surfaces as [`CacheError::BackendUnavailable`](crate::CacheError::BackendUnavailable)
/// and is not retried here.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    /// Connects to `url` (e.g. `redis://127.0.0.1:6379/0`) and verifies the
    /// server answers `PING`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::BackendUnavailable`](crate::CacheError::BackendUnavailable)
    /// if the URL is malformed or the server cannot be reached.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        let store = Self { connection };
        store.ping().await?;
        info!(url = %redact(url), "connected to redis");
        Ok(store)
    }

    /// Round-trips a `PING`.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl Store for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(&value[..])
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection.clone();
        // `OK` when stored, nil when the key already holds a live value.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&value[..])
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn delete_if_eq(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let mut conn = self.connection.clone();
        let deleted: i64 = DELETE_IF_EQ
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut conn = self.connection.clone();
        let pattern = prefix_pattern(prefix);
        let mut cursor: u64 = 0;
        let mut removed = 0usize;

        loop {
            let (next, mut keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            keys.retain(|key| !is_lock_key(key));
            if !keys.is_empty() {
                let deleted: i64 = redis::cmd("DEL")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await?;
                removed += deleted.max(0) as usize;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(prefix, removed, "prefix scan complete");
        Ok(removed)
    }
}

// `PX 0` is rejected by the server, so sub-millisecond TTLs round up.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Builds a `SCAN MATCH` glob that matches `prefix` literally, followed by
/// anything.
fn prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

// Strip credentials before logging a connection URL.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_owned(),
    }
}
