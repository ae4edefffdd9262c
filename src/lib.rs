//! # rtcache
//!
//! Read-through caching for web-tier request handlers: TTL expiry, stampede
//! protection and explicit invalidation over an in-process or networked store.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use rtcache::{Cache, CacheConfig, CacheKey};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = Cache::connect(CacheConfig::from_env()?).await?;
//!     let key = CacheKey::new("product:42")?;
//!
//!     let name: String = cache
//!         .get_or_compute(&key, Duration::from_secs(60), Duration::from_secs(5), || async {
//!             // Slow database lookup goes here.
//!             Ok::<_, std::io::Error>("Widget".to_string())
//!         })
//!         .await?;
//!     println!("{name}");
//!
//!     // After the product row is updated:
//!     cache.invalidate(&key, ["product_list"]).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod invalidation;
pub mod key;
pub mod store;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{Cache, CacheStats, ReadThroughCache};
pub use config::{Backend, CacheConfig};
pub use error::{BoxError, CacheError, Result};
pub use invalidation::{InvalidationManager, InvalidationReport};
pub use key::{CacheKey, KeyArg, KeyCodec};
pub use store::{MemoryStore, Store};
#[cfg(feature = "redis")]
pub use store::RedisStore;
