use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::FeedConfig;

use super::category_tree::CategoryTree;
use super::files::{read_json, remove_file, write_json_atomic};

/// On-disk form of a feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FeedRecord {
    #[serde(flatten)]
    config: FeedConfig,
    registered_at: DateTime<Utc>,
}

/// Every configured feed, one JSON record per feed id under `dir`.
///
/// Mutations are checked against the in-memory index first, written to disk
/// second, and only then applied to the index, so a rejected or failed write
/// leaves nothing behind.
#[derive(Debug)]
pub struct FeedRegistry {
    dir: PathBuf,
    records: Mutex<Vec<FeedRecord>>,
}

impl FeedRegistry {
    /// Load every persisted feed. Two records with the same id are treated as
    /// corruption and abort the load.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut records: Vec<FeedRecord> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let record = match read_json::<FeedRecord>(&path) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Skipping unreadable feed record {:?}: {}", path, e);
                    continue;
                }
            };
            if records.iter().any(|r| r.config.id == record.config.id) {
                return Err(AppError::DuplicateFeedId(record.config.id));
            }
            records.push(record);
        }

        records.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.config.id.cmp(&b.config.id))
        });
        tracing::debug!("Loaded {} feed configs from {:?}", records.len(), dir);

        Ok(Self {
            dir,
            records: Mutex::new(records),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Register a new feed. An empty id is replaced with a generated one; the
    /// stored config is returned.
    pub fn add(&self, mut config: FeedConfig, categories: &CategoryTree) -> Result<FeedConfig> {
        let mut records = self.lock();

        if config.id.trim().is_empty() {
            config.id = uuid::Uuid::new_v4().to_string();
        }
        if records.iter().any(|r| r.config.id == config.id) {
            return Err(AppError::DuplicateFeedId(config.id));
        }
        check_category(&config, categories)?;
        if records.iter().any(|r| r.config.url == config.url) {
            return Err(AppError::DuplicateFeedUrl(config.url));
        }
        check_fields(&config)?;

        // strictly increasing, so reloads keep registration order
        let now = Utc::now();
        let registered_at = records
            .iter()
            .map(|r| r.registered_at + chrono::Duration::microseconds(1))
            .max()
            .filter(|next| *next > now)
            .unwrap_or(now);

        let record = FeedRecord {
            config,
            registered_at,
        };
        write_json_atomic(&self.record_path(&record.config.id), &record)?;
        records.push(record.clone());

        tracing::info!("Registered feed {} ({})", record.config.id, record.config.url);
        Ok(record.config)
    }

    /// Replace every field of feed `id`; the id itself cannot change.
    pub fn update(
        &self,
        id: &str,
        config: FeedConfig,
        categories: &CategoryTree,
    ) -> Result<FeedConfig> {
        let mut records = self.lock();

        let position = records
            .iter()
            .position(|r| r.config.id == id)
            .ok_or_else(|| AppError::UnknownFeedId(id.to_string()))?;
        if config.id != id {
            return Err(AppError::ImmutableFeedId {
                current: id.to_string(),
                requested: config.id,
            });
        }
        check_category(&config, categories)?;
        if records
            .iter()
            .any(|r| r.config.id != id && r.config.url == config.url)
        {
            return Err(AppError::DuplicateFeedUrl(config.url));
        }
        check_fields(&config)?;

        let record = FeedRecord {
            config,
            registered_at: records[position].registered_at,
        };
        write_json_atomic(&self.record_path(id), &record)?;
        records[position] = record.clone();

        tracing::info!("Updated feed {}", id);
        Ok(record.config)
    }

    pub fn delete(&self, id: &str) -> Result<FeedConfig> {
        let mut records = self.lock();

        let position = records
            .iter()
            .position(|r| r.config.id == id)
            .ok_or_else(|| AppError::UnknownFeedId(id.to_string()))?;
        remove_file(&self.record_path(id))?;
        let record = records.remove(position);

        tracing::info!("Removed feed {}", id);
        Ok(record.config)
    }

    /// All feeds in registration order.
    pub fn list(&self) -> Vec<FeedConfig> {
        self.lock().iter().map(|r| r.config.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<FeedConfig> {
        self.lock()
            .iter()
            .find(|r| r.config.id == id)
            .map(|r| r.config.clone())
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", urlencoding::encode(id)))
    }

    fn lock(&self) -> MutexGuard<'_, Vec<FeedRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn check_category(config: &FeedConfig, categories: &CategoryTree) -> Result<()> {
    if !categories.exists(&config.category_id) {
        return Err(AppError::InvalidCategoryReference(config.category_id.clone()));
    }
    Ok(())
}

fn check_fields(config: &FeedConfig) -> Result<()> {
    config.cadence.validate()?;
    match url::Url::parse(&config.url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(AppError::InvalidFeedUrl(config.url.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Period, ROOT_CATEGORY_ID};

    struct Fixture {
        dir: tempfile::TempDir,
        categories: CategoryTree,
        registry: FeedRegistry,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let categories = CategoryTree::load(dir.path().join("categories.json")).unwrap();
        categories
            .add_child(Category::new("news", "News"), ROOT_CATEGORY_ID)
            .unwrap();
        let registry = FeedRegistry::load(dir.path().join("feeds")).unwrap();
        Fixture {
            dir,
            categories,
            registry,
        }
    }

    fn feed(id: &str, url: &str) -> FeedConfig {
        FeedConfig {
            id: id.to_string(),
            category_id: "news".to_string(),
            name: format!("Feed {}", id),
            url: url.to_string(),
            cadence: Period::minutes(30),
            icon_url: None,
            enabled: true,
        }
    }

    #[test]
    fn add_list_get_count() {
        let f = fixture();
        f.registry
            .add(feed("b", "https://b.example/rss"), &f.categories)
            .unwrap();
        f.registry
            .add(feed("a", "https://a.example/rss"), &f.categories)
            .unwrap();

        assert_eq!(f.registry.count(), 2);
        let ids: Vec<String> = f.registry.list().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(f.registry.get("a").unwrap().url, "https://a.example/rss");
        assert!(f.registry.get("c").is_none());
    }

    #[test]
    fn add_rejects_invalid_configs() {
        let f = fixture();
        f.registry
            .add(feed("a", "https://a.example/rss"), &f.categories)
            .unwrap();

        assert!(matches!(
            f.registry.add(feed("a", "https://other.example/rss"), &f.categories),
            Err(AppError::DuplicateFeedId(_))
        ));
        assert!(matches!(
            f.registry.add(feed("b", "https://a.example/rss"), &f.categories),
            Err(AppError::DuplicateFeedUrl(_))
        ));

        let mut orphan = feed("c", "https://c.example/rss");
        orphan.category_id = "sports".to_string();
        assert!(matches!(
            f.registry.add(orphan, &f.categories),
            Err(AppError::InvalidCategoryReference(_))
        ));

        let mut never = feed("d", "https://d.example/rss");
        never.cadence = Period::hours(0);
        assert!(matches!(
            f.registry.add(never, &f.categories),
            Err(AppError::InvalidCadence(_))
        ));

        assert!(matches!(
            f.registry.add(feed("e", "ftp://e.example/rss"), &f.categories),
            Err(AppError::InvalidFeedUrl(_))
        ));
        assert!(matches!(
            f.registry.add(feed("e", "not a url"), &f.categories),
            Err(AppError::InvalidFeedUrl(_))
        ));

        assert_eq!(f.registry.count(), 1);
    }

    #[test]
    fn empty_id_is_assigned() {
        let f = fixture();
        let stored = f
            .registry
            .add(feed("", "https://a.example/rss"), &f.categories)
            .unwrap();
        assert!(!stored.id.is_empty());
        assert_eq!(f.registry.get(&stored.id), Some(stored));
    }

    #[test]
    fn update_keeps_id_immutable() {
        let f = fixture();
        f.registry
            .add(feed("a", "https://a.example/rss"), &f.categories)
            .unwrap();
        f.registry
            .add(feed("b", "https://b.example/rss"), &f.categories)
            .unwrap();

        assert!(matches!(
            f.registry.update("a", feed("z", "https://a.example/rss"), &f.categories),
            Err(AppError::ImmutableFeedId { .. })
        ));
        assert!(matches!(
            f.registry.update("x", feed("x", "https://x.example/rss"), &f.categories),
            Err(AppError::UnknownFeedId(_))
        ));
        assert!(matches!(
            f.registry.update("a", feed("a", "https://b.example/rss"), &f.categories),
            Err(AppError::DuplicateFeedUrl(_))
        ));

        let mut renamed = feed("a", "https://a.example/rss");
        renamed.name = "Renamed".to_string();
        renamed.cadence = Period::days(1);
        f.registry.update("a", renamed, &f.categories).unwrap();

        let stored = f.registry.get("a").unwrap();
        assert_eq!(stored.name, "Renamed");
        assert_eq!(stored.cadence, Period::days(1));
        let ids: Vec<String> = f.registry.list().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn delete_removes_record() {
        let f = fixture();
        f.registry
            .add(feed("a", "https://a.example/rss"), &f.categories)
            .unwrap();
        f.registry.delete("a").unwrap();

        assert_eq!(f.registry.count(), 0);
        assert!(matches!(
            f.registry.delete("a"),
            Err(AppError::UnknownFeedId(_))
        ));
        let reloaded = FeedRegistry::load(f.dir.path().join("feeds")).unwrap();
        assert_eq!(reloaded.count(), 0);
    }

    #[test]
    fn reload_preserves_registration_order() {
        let f = fixture();
        for (id, url) in [
            ("zeta", "https://z.example/rss"),
            ("alpha", "https://a.example/rss"),
            ("with/slash", "https://s.example/rss"),
        ] {
            f.registry.add(feed(id, url), &f.categories).unwrap();
        }

        let reloaded = FeedRegistry::load(f.dir.path().join("feeds")).unwrap();
        assert_eq!(reloaded.list(), f.registry.list());
    }

    #[test]
    fn duplicate_persisted_ids_abort_load() {
        let f = fixture();
        f.registry
            .add(feed("a", "https://a.example/rss"), &f.categories)
            .unwrap();
        let dir = f.dir.path().join("feeds");
        std::fs::copy(dir.join("a.json"), dir.join("copy.json")).unwrap();

        assert!(matches!(
            FeedRegistry::load(&dir),
            Err(AppError::DuplicateFeedId(_))
        ));
    }

    #[test]
    fn duplicate_url_is_reported_before_field_errors() {
        let f = fixture();
        f.registry
            .add(feed("a", "https://a.example/rss"), &f.categories)
            .unwrap();

        let mut clash = feed("b", "https://a.example/rss");
        clash.cadence = Period::hours(0);
        assert!(matches!(
            f.registry.add(clash.clone(), &f.categories),
            Err(AppError::DuplicateFeedUrl(_))
        ));

        clash.category_id = "sports".to_string();
        assert!(matches!(
            f.registry.add(clash, &f.categories),
            Err(AppError::InvalidCategoryReference(_))
        ));
    }

    #[test]
    fn failed_write_leaves_registry_untouched() {
        let f = fixture();
        let dir = f.dir.path().join("feeds");
        // a directory squatting on the record path makes the rename fail
        std::fs::create_dir_all(dir.join("a.json")).unwrap();

        let err = f
            .registry
            .add(feed("a", "https://a.example/rss"), &f.categories)
            .unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
        assert_eq!(f.registry.count(), 0);
        assert!(f.registry.get("a").is_none());
        assert!(!dir.join("a.json.tmp").exists());

        // the same url is still free afterwards
        f.registry
            .add(feed("b", "https://a.example/rss"), &f.categories)
            .unwrap();
        assert_eq!(f.registry.count(), 1);
    }

    #[test]
    fn failed_update_and_delete_keep_previous_record() {
        let f = fixture();
        f.registry
            .add(feed("a", "https://a.example/rss"), &f.categories)
            .unwrap();
        let record = f.dir.path().join("feeds").join("a.json");
        std::fs::remove_file(&record).unwrap();
        std::fs::create_dir(&record).unwrap();

        let mut changed = feed("a", "https://changed.example/rss");
        changed.enabled = false;
        let err = f.registry.update("a", changed, &f.categories).unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
        let kept = f.registry.get("a").unwrap();
        assert_eq!(kept.url, "https://a.example/rss");
        assert!(kept.enabled);

        let err = f.registry.delete("a").unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
        assert_eq!(f.registry.count(), 1);
        assert_eq!(f.registry.list()[0].id, "a");
    }

    #[test]
    fn unreadable_record_is_skipped() {
        let f = fixture();
        f.registry
            .add(feed("a", "https://a.example/rss"), &f.categories)
            .unwrap();
        let dir = f.dir.path().join("feeds");
        std::fs::write(dir.join("broken.json"), "{").unwrap();

        let reloaded = FeedRegistry::load(&dir).unwrap();
        assert_eq!(reloaded.count(), 1);
    }
}
