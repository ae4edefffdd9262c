//! Product catalog demo: a slow "database" fronted by the read-through cache.
//!
//! Run with `RUST_LOG=rtcache=debug cargo run --example product_catalog`.
//! Set `RTCACHE_BACKEND=networked` and `RTCACHE_URL=redis://...` to use Redis.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rtcache::http::{CacheControl, CacheHeaders, ETag, Freshness};
use rtcache::{Cache, CacheConfig, CacheKey, KeyCodec, key_args};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Product {
    id: u64,
    name: String,
    price_cents: u64,
}

/// Stand-in for the ORM: every read takes a while.
struct Database {
    rows: RwLock<HashMap<u64, Product>>,
}

impl Database {
    fn seeded() -> Self {
        let rows = (1..=25)
            .map(|id| {
                let product = Product {
                    id,
                    name: format!("Product {id}"),
                    price_cents: 999 + id * 100,
                };
                (id, product)
            })
            .collect();
        Self {
            rows: RwLock::new(rows),
        }
    }

    async fn product(&self, id: u64) -> Result<Product, std::io::Error> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.rows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no such product"))
    }

    async fn page(&self, page: u64, per_page: u64) -> Result<Vec<Product>, std::io::Error> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let rows = self.rows.read().await;
        let mut products: Vec<_> = rows.values().cloned().collect();
        products.sort_by_key(|p| p.id);
        let start = ((page.saturating_sub(1)) * per_page) as usize;
        Ok(products.into_iter().skip(start).take(per_page as usize).collect())
    }

    async fn rename(&self, id: u64, name: &str) {
        if let Some(p) = self.rows.write().await.get_mut(&id) {
            p.name = name.to_owned();
        }
    }
}

fn product_key(id: u64) -> rtcache::Result<CacheKey> {
    KeyCodec::encode("product", &key_args![id])
}

async fn product_detail(cache: &Cache, db: &Arc<Database>, id: u64) -> rtcache::Result<Product> {
    let db = Arc::clone(db);
    cache
        .get_or_compute(
            &product_key(id)?,
            Duration::from_secs(15 * 60),
            Duration::from_secs(5),
            move || async move { db.product(id).await },
        )
        .await
}

async fn product_list(cache: &Cache, db: &Arc<Database>, page: u64) -> rtcache::Result<Vec<Product>> {
    let db = Arc::clone(db);
    let key = KeyCodec::encode("product_list", &key_args![page, 10])?;
    cache.fetch(&key, move || async move { db.page(page, 10).await }).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rtcache=info,product_catalog=info".into()),
        )
        .init();

    let cache = Cache::connect(CacheConfig::from_env()?).await?;
    let db = Arc::new(Database::seeded());

    for attempt in 1..=2 {
        let started = Instant::now();
        let product = product_detail(&cache, &db, 25).await?;
        info!(attempt, name = %product.name, elapsed = ?started.elapsed(), "product detail");
    }

    let started = Instant::now();
    let (a, b) = tokio::join!(product_list(&cache, &db, 1), product_list(&cache, &db, 1));
    info!(
        first = a?.len(),
        second = b?.len(),
        elapsed = ?started.elapsed(),
        "two concurrent list requests, one database query"
    );

    db.rename(25, "Renamed product").await;
    let lists = KeyCodec::family_prefix("product_list")?;
    let report = cache.invalidate(&product_key(25)?, [lists]).await?;
    info!(removed = report.list_entries_removed, "invalidated after update");

    let product = product_detail(&cache, &db, 25).await?;
    info!(name = %product.name, "fresh after invalidation");

    let body = serde_json::to_vec(&product)?;
    let headers = CacheHeaders::new()
        .cache_control(CacheControl::cache_for(Duration::from_secs(300)))
        .etag(ETag::from_content(&body));
    for (name, value) in headers.to_pairs() {
        info!("{name}: {value}");
    }
    let etag = headers.get_etag().map(ToString::to_string);
    if headers.evaluate(etag.as_deref(), None) == Freshness::NotModified {
        info!("revalidation with the same ETag answers 304 Not Modified");
    }

    info!(stats = ?cache.stats(), "done");
    Ok(())
}
