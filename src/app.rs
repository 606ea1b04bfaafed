use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::task::JoinHandle;

use crate::collect::{CollectJob, Collector};
use crate::config::Config;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::feed::{parse_opml_file, FeedFetcher, OpmlImport};
use crate::models::{Category, CategoryUpdate, FeedConfig, Period};
use crate::registry::{CategoryTree, FeedRegistry};
use crate::schedule::Scheduler;

/// Cadence given to feeds that arrive through an OPML import.
pub const IMPORT_CADENCE: Period = Period::hours(1);

/// Outcome of an OPML import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub categories_added: usize,
    pub feeds_added: usize,
    pub skipped: usize,
}

/// Everything the daemon needs, built once at startup and shared by reference.
pub struct App {
    config: Config,
    categories: CategoryTree,
    feeds: Arc<FeedRegistry>,
    scheduler: Scheduler,
    repository: Arc<Repository>,
    job: Arc<CollectJob>,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        let fetcher = FeedFetcher::new(config)?;
        Self::with_collector(config, Arc::new(fetcher)).await
    }

    /// Build the context around any collector. Schedules are not created until
    /// [`App::start`].
    pub async fn with_collector(config: &Config, collector: Arc<dyn Collector>) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let categories = CategoryTree::load(config.category_tree_path())?;
        let feeds = Arc::new(FeedRegistry::load(config.feeds_dir())?);
        let repository = Arc::new(Repository::new(config.db_path()).await?);
        let job = Arc::new(CollectJob::new(
            collector,
            Arc::clone(&repository),
            Arc::clone(&feeds),
        ));
        let scheduler = Scheduler::new(job.clone());

        tracing::info!(
            "Loaded {} categories and {} feeds from {}",
            categories.len(),
            feeds.count(),
            config.data_dir.display()
        );

        Ok(Self {
            config: config.clone(),
            categories,
            feeds,
            scheduler,
            repository,
            job,
        })
    }

    /// Create a schedule for every registered feed that does not have one yet.
    pub fn start(&self) -> Result<()> {
        for feed in self.feeds.list() {
            if self.scheduler.trigger(&feed.id).is_some() {
                continue;
            }
            self.scheduler.add_job(&feed)?;
        }
        tracing::info!("Started {} schedules", self.scheduler.count());
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn categories(&self) -> &CategoryTree {
        &self.categories
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    // Categories

    pub fn find_category(&self, id: &str) -> Option<Category> {
        self.categories.find_by_id(id)
    }

    pub fn add_category(&self, category: Category, parent_id: &str) -> Result<()> {
        self.categories.add_child(category, parent_id)
    }

    pub fn update_category(&self, update: CategoryUpdate, id: &str) -> Result<()> {
        self.categories.update(update, id)
    }

    /// Feeds filed under the removed subtree keep their category id.
    pub fn delete_category(&self, id: &str) -> Result<bool> {
        self.categories.delete(id)
    }

    // Feeds

    pub fn list_feeds(&self) -> Vec<FeedConfig> {
        self.feeds.list()
    }

    pub fn get_feed(&self, id: &str) -> Option<FeedConfig> {
        self.feeds.get(id)
    }

    /// Register and schedule a feed. An empty id is replaced with a fresh one.
    pub fn add_feed(&self, config: FeedConfig) -> Result<FeedConfig> {
        let config = self.feeds.add(config, &self.categories)?;
        if let Err(e) = self.scheduler.add_job(&config) {
            if let Err(rollback) = self.feeds.delete(&config.id) {
                tracing::error!("Failed to roll back feed {}: {}", config.id, rollback);
            }
            return Err(e);
        }
        Ok(config)
    }

    /// Replace a feed's configuration and rebuild its schedule from it.
    pub fn update_feed(&self, id: &str, config: FeedConfig) -> Result<FeedConfig> {
        let config = self.feeds.update(id, config, &self.categories)?;
        match self.scheduler.delete(id) {
            Ok(()) | Err(AppError::UnknownJobId(_)) => {}
            Err(e) => return Err(e),
        }
        self.scheduler.add_job(&config)?;
        Ok(config)
    }

    /// Persist the flag, then start or stop the feed's schedule. A feed with no
    /// schedule yet picks the flag up in [`App::start`].
    pub fn set_feed_enabled(&self, id: &str, enabled: bool) -> Result<FeedConfig> {
        let mut config = self
            .feeds
            .get(id)
            .ok_or_else(|| AppError::UnknownFeedId(id.to_string()))?;
        let scheduled = self.scheduler.is_running(id).is_some();
        config.enabled = enabled;
        let config = self.feeds.update(id, config, &self.categories)?;
        if !scheduled {
            return Ok(config);
        }
        if enabled {
            self.scheduler.start(id)?;
        } else {
            self.scheduler.stop(id)?;
        }
        Ok(config)
    }

    /// Remove the feed, its schedule and everything archived for it.
    pub async fn delete_feed(&self, id: &str) -> Result<FeedConfig> {
        // collections already past their fetch wait here and then see the feed gone
        let _guard = self.job.lock_archive().await;
        let config = self.feeds.delete(id)?;
        match self.scheduler.delete(id) {
            Ok(()) | Err(AppError::UnknownJobId(_)) => {}
            Err(e) => return Err(e),
        }

        let item_ids = self.repository.get_item_ids(id).await;
        let removed = self.repository.delete_items(item_ids).await?;
        self.repository.delete_feed(id).await?;

        tracing::info!("Deleted feed {} and {} archived items", id, removed);
        Ok(config)
    }

    // Collection and archive

    /// Run one collection cycle for a feed right away, whether or not it is enabled.
    pub async fn collect_feed(&self, id: &str) -> Result<usize> {
        let config = self
            .feeds
            .get(id)
            .ok_or_else(|| AppError::UnknownFeedId(id.to_string()))?;
        self.job.collect_once(&config).await
    }

    /// Collect every enabled feed once. Failures are logged and reported per feed.
    pub async fn refresh_all(&self) -> Vec<(String, Result<usize>)> {
        let feeds: Vec<FeedConfig> = self.feeds.list().into_iter().filter(|f| f.enabled).collect();
        let job = &self.job;

        stream::iter(feeds)
            .map(|feed| async move {
                let result = job.collect_once(&feed).await;
                if let Err(e) = &result {
                    tracing::warn!("Failed to refresh {}: {}", feed.name, e);
                }
                (feed.id, result)
            })
            .buffer_unordered(self.config.refresh_concurrency)
            .collect()
            .await
    }

    pub async fn clean_archive(&self, retention: Period) -> Result<usize> {
        self.repository.clean_items(retention).await
    }

    /// Periodically expire archived items per the configured retention.
    /// Returns `None` when retention is disabled.
    pub fn spawn_retention_sweep(&self) -> Option<JoinHandle<()>> {
        let retention = self.config.retention?;
        let period = Duration::from_secs(u64::from(self.config.cleanup_interval_minutes) * 60);
        let repository = Arc::clone(&self.repository);

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let Err(e) = repository.clean_items(retention).await {
                    tracing::error!("Retention sweep failed: {}", e);
                }
            }
        }))
    }

    pub fn import_opml(&self, path: &Path) -> Result<ImportSummary> {
        let import = parse_opml_file(path)?;
        Ok(self.apply_import(import))
    }

    /// Add imported categories and feeds, skipping anything already present.
    pub fn apply_import(&self, import: OpmlImport) -> ImportSummary {
        let mut summary = ImportSummary::default();

        for category in import.categories {
            if self.categories.exists(&category.id) {
                tracing::debug!("Category {} already exists", category.id);
                continue;
            }
            match self
                .categories
                .add_child(Category::new(category.id.as_str(), category.name), &category.parent_id)
            {
                Ok(()) => summary.categories_added += 1,
                Err(e) => {
                    tracing::warn!("Failed to import category {}: {}", category.id, e);
                    summary.skipped += 1;
                }
            }
        }

        for feed in import.feeds {
            let config = FeedConfig {
                id: String::new(),
                category_id: feed.category_id,
                name: feed.name,
                url: feed.url,
                cadence: IMPORT_CADENCE,
                icon_url: None,
                enabled: true,
            };
            match self.add_feed(config) {
                Ok(_) => summary.feeds_added += 1,
                Err(e) => {
                    tracing::warn!("Failed to import feed: {}", e);
                    summary.skipped += 1;
                }
            }
        }

        tracing::info!(
            "Imported {} categories and {} feeds ({} skipped)",
            summary.categories_added,
            summary.feeds_added,
            summary.skipped
        );
        summary
    }

    /// Stop every schedule. In-flight collections are abandoned.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        tracing::info!("Scheduler shut down");
    }
}
