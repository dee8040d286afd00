//! Goods catalog with an explicit expiry.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::checkbox::client::CheckboxClient;
use crate::checkbox::error::{CheckboxResult, ErrorKind};
use crate::checkbox::models::{CatalogItem, Page};

/// Fetches `/goods` sorted by code.
pub async fn fetch_catalog(client: &CheckboxClient) -> CheckboxResult<Vec<CatalogItem>> {
    let page: Page<CatalogItem> = client.get_json("/goods", &[], ErrorKind::Api).await?;
    let mut items = page.results;
    items.sort_by(|a, b| a.code.cmp(&b.code));
    Ok(items)
}

struct Cached {
    items: Vec<CatalogItem>,
    fetched_at: Instant,
}

/// Catalog cache refreshed on read once `ttl` has passed.
#[derive(Clone)]
pub struct CatalogCache {
    client: CheckboxClient,
    ttl: Duration,
    cached: Arc<RwLock<Option<Cached>>>,
}

impl CatalogCache {
    pub fn new(client: CheckboxClient, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            cached: Arc::new(RwLock::new(None)),
        }
    }

    /// Current catalog. On refresh failure a stale copy is served if there is one.
    pub async fn items(&self) -> CheckboxResult<Vec<CatalogItem>> {
        if let Some(cached) = self.cached.read().await.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.items.clone());
            }
        }

        let mut guard = self.cached.write().await;
        match fetch_catalog(&self.client).await {
            Ok(items) => {
                log::info!("Goods catalog refreshed: {} items", items.len());
                *guard = Some(Cached {
                    items: items.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(items)
            }
            Err(e) => match guard.as_ref() {
                Some(stale) => {
                    log::warn!("Goods catalog refresh failed, serving stale copy: {}", e);
                    Ok(stale.items.clone())
                }
                None => Err(e),
            },
        }
    }
}
