use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};

use crate::db::Repository;
use crate::error::Result;
use crate::models::{FeedConfig, NewFeed, NewItem};
use crate::registry::FeedRegistry;
use crate::schedule::JobHandler;

/// A fetched and parsed feed document.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub metadata: NewFeed,
    pub items: Vec<NewItem>,
}

/// Fetches a feed's remote document. Implementations bound their own timeouts.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn collect(&self, config: &FeedConfig) -> Result<ParsedFeed>;
}

/// One collection cycle: fetch, make sure the feed row exists, archive what is new.
///
/// Archive writes happen under `archive_lock` and only while the feed is still
/// registered, so a feed deleted mid-fetch is never written back.
pub struct CollectJob {
    collector: Arc<dyn Collector>,
    repository: Arc<Repository>,
    feeds: Arc<FeedRegistry>,
    archive_lock: Mutex<()>,
}

impl CollectJob {
    pub fn new(
        collector: Arc<dyn Collector>,
        repository: Arc<Repository>,
        feeds: Arc<FeedRegistry>,
    ) -> Self {
        Self {
            collector,
            repository,
            feeds,
            archive_lock: Mutex::new(()),
        }
    }

    /// Held while a feed's archive rows are removed so no cycle writes them back.
    pub async fn lock_archive(&self) -> MutexGuard<'_, ()> {
        self.archive_lock.lock().await
    }

    pub async fn collect_once(&self, config: &FeedConfig) -> Result<usize> {
        let parsed = self.collector.collect(config).await?;

        let _guard = self.archive_lock.lock().await;
        if self.feeds.get(&config.id).is_none() {
            tracing::info!(
                "Feed {} was removed during collection, discarding {} items",
                config.id,
                parsed.items.len()
            );
            return Ok(0);
        }
        self.repository.add_feed(parsed.metadata, &config.id).await?;

        let mut batch_ids: HashSet<String> = HashSet::new();
        let candidates: Vec<NewItem> = parsed
            .items
            .into_iter()
            .filter(|item| batch_ids.insert(item.item_id.clone()))
            .collect();

        // item ids are unique across the whole archive, not per feed
        let archived = self
            .repository
            .find_archived_ids(batch_ids.into_iter().collect())
            .await?;
        let fresh: Vec<NewItem> = candidates
            .into_iter()
            .filter(|item| !archived.contains(&item.item_id))
            .collect();

        let count = fresh.len();
        if self.repository.add_items(fresh, &config.id).await? {
            tracing::info!("Fetched {} new items from {}", count, config.name);
        } else {
            tracing::debug!("No new items from {}", config.name);
        }
        Ok(count)
    }
}

#[async_trait]
impl JobHandler for CollectJob {
    async fn run(&self, config: &FeedConfig) -> Result<usize> {
        self.collect_once(config).await
    }
}
