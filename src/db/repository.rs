use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{ArchivedFeed, ArchivedItem, NewFeed, NewItem, Period};

use super::schema::SCHEMA;

const SQLITE_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

/// The item archive: feeds and the items collected from them.
///
/// Reads are best effort and come back empty when the database fails; writes
/// always report failure to the caller.
pub struct Repository {
    conn: Connection,
}

/// Column values for one item, with structured fields already serialized.
struct ItemRow {
    item_id: String,
    title: Option<String>,
    description: Option<String>,
    link: Option<String>,
    author: Option<String>,
    categories: Option<String>,
    comments: Option<String>,
    pub_date: Option<String>,
    enclosure: Option<String>,
    guid: Option<String>,
    source: Option<String>,
}

enum InsertOutcome {
    Inserted(usize),
    Duplicates(Vec<String>),
    UnknownFeed,
}

impl Repository {
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Feed operations

    /// Create the feed row items are filed under, or refresh its metadata.
    pub async fn add_feed(&self, feed: NewFeed, feed_id: &str) -> Result<bool> {
        let feed_id = feed_id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"INSERT INTO feeds (feed_id, title, description, link, language, updated_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                       ON CONFLICT(feed_id) DO UPDATE SET
                           title = excluded.title,
                           description = excluded.description,
                           link = excluded.link,
                           language = excluded.language,
                           updated_at = excluded.updated_at"#,
                    params![
                        feed_id,
                        feed.title,
                        feed.description,
                        feed.link,
                        feed.language,
                        feed.updated_at.map(|dt| dt.to_rfc3339()),
                    ],
                )?;
                Ok(changed)
            })
            .await?;
        Ok(changed > 0)
    }

    pub async fn get_feed(&self, feed_id: &str) -> Option<ArchivedFeed> {
        let feed_id = feed_id.to_string();
        let result = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT feed_id, title, description, link, language, updated_at, archived_at FROM feeds WHERE feed_id = ?1",
                )?;
                let feed = stmt.query_row(params![feed_id], feed_from_row).optional()?;
                Ok(feed)
            })
            .await;
        best_effort(result.map_err(AppError::from), "feed lookup")
    }

    /// Remove the feed row. Its items must be deleted first; the archive never
    /// cascades on its own.
    pub async fn delete_feed(&self, feed_id: &str) -> Result<bool> {
        let feed_id = feed_id.to_string();
        let removed = self
            .conn
            .call(move |conn| {
                let removed = conn.execute("DELETE FROM feeds WHERE feed_id = ?1", params![feed_id])?;
                Ok(removed)
            })
            .await?;
        Ok(removed > 0)
    }

    // Item operations

    pub async fn get_item_ids(&self, feed_id: &str) -> Vec<String> {
        let feed_id = feed_id.to_string();
        let result = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT item_id FROM items WHERE feed_id = ?1 ORDER BY rowid")?;
                let ids = stmt
                    .query_map(params![feed_id], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(ids)
            })
            .await;
        best_effort(result.map_err(AppError::from), "item id listing")
    }

    /// The subset of `item_ids` already archived under any feed.
    pub async fn find_archived_ids(&self, item_ids: Vec<String>) -> Result<HashSet<String>> {
        if item_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let found = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare("SELECT 1 FROM items WHERE item_id = ?1")?;
                let mut found = HashSet::new();
                for id in item_ids {
                    if stmt.exists(params![id])? {
                        found.insert(id);
                    }
                }
                Ok(found)
            })
            .await?;
        Ok(found)
    }

    pub async fn get_items(&self, feed_id: &str) -> Vec<ArchivedItem> {
        let feed_id = feed_id.to_string();
        let result = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT item_id, feed_id, title, description, link, author, categories,
                              comments, pub_date, enclosure, guid, source, inserted_at
                       FROM items
                       WHERE feed_id = ?1
                       ORDER BY pub_date DESC NULLS LAST, inserted_at DESC"#,
                )?;
                let items = stmt
                    .query_map(params![feed_id], item_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await;
        best_effort(result.map_err(AppError::from), "item listing")
    }

    pub async fn count_items(&self) -> usize {
        let result = self
            .conn
            .call(|conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
                Ok(count)
            })
            .await;
        best_effort(result.map_err(AppError::from), "item count").max(0) as usize
    }

    /// Archive `items` under `feed_id` as one batch. Fails with every colliding
    /// id if any item is already archived, under any feed, or repeated within
    /// the batch. Returns false when there is nothing to insert.
    pub async fn add_items(&self, items: Vec<NewItem>, feed_id: &str) -> Result<bool> {
        self.add_items_at(items, feed_id, Utc::now()).await
    }

    pub(crate) async fn add_items_at(
        &self,
        items: Vec<NewItem>,
        feed_id: &str,
        inserted_at: DateTime<Utc>,
    ) -> Result<bool> {
        if items.is_empty() {
            return Ok(false);
        }

        let rows = items
            .into_iter()
            .map(item_to_row)
            .collect::<Result<Vec<_>>>()?;
        let feed_id = feed_id.to_string();
        let feed_key = feed_id.clone();
        let inserted_at = inserted_at.format(SQLITE_DATETIME).to_string();

        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let feed_known: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM feeds WHERE feed_id = ?1)",
                    params![feed_key],
                    |row| row.get(0),
                )?;
                if !feed_known {
                    return Ok(InsertOutcome::UnknownFeed);
                }

                let mut duplicates: Vec<String> = Vec::new();
                {
                    let mut archived =
                        tx.prepare("SELECT EXISTS(SELECT 1 FROM items WHERE item_id = ?1)")?;
                    let mut seen: HashSet<&str> = HashSet::new();
                    for row in &rows {
                        let exists: bool =
                            archived.query_row(params![row.item_id], |r| r.get(0))?;
                        let repeated = !seen.insert(row.item_id.as_str());
                        if (exists || repeated) && !duplicates.contains(&row.item_id) {
                            duplicates.push(row.item_id.clone());
                        }
                    }
                }
                if !duplicates.is_empty() {
                    return Ok(InsertOutcome::Duplicates(duplicates));
                }

                {
                    let mut insert = tx.prepare(
                        r#"INSERT INTO items (item_id, feed_id, title, description, link, author,
                                              categories, comments, pub_date, enclosure, guid,
                                              source, inserted_at)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"#,
                    )?;
                    for row in &rows {
                        insert.execute(params![
                            row.item_id,
                            feed_key,
                            row.title,
                            row.description,
                            row.link,
                            row.author,
                            row.categories,
                            row.comments,
                            row.pub_date,
                            row.enclosure,
                            row.guid,
                            row.source,
                            inserted_at,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(InsertOutcome::Inserted(rows.len()))
            })
            .await?;

        match outcome {
            InsertOutcome::Inserted(count) => {
                tracing::info!("Archived {} items for feed {}", count, feed_id);
                Ok(true)
            }
            InsertOutcome::Duplicates(ids) => Err(AppError::DuplicateItemId(ids)),
            InsertOutcome::UnknownFeed => Err(AppError::UnknownArchivedFeed(feed_id)),
        }
    }

    /// Returns how many of `item_ids` were actually removed.
    pub async fn delete_items(&self, item_ids: Vec<String>) -> Result<usize> {
        if item_ids.is_empty() {
            return Ok(0);
        }
        let removed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut removed = 0;
                {
                    let mut delete = tx.prepare("DELETE FROM items WHERE item_id = ?1")?;
                    for id in &item_ids {
                        removed += delete.execute(params![id])?;
                    }
                }
                tx.commit()?;
                Ok(removed)
            })
            .await?;
        tracing::info!("Deleted {} archived items", removed);
        Ok(removed)
    }

    /// Remove every item archived longer ago than `retention`.
    pub async fn clean_items(&self, retention: Period) -> Result<usize> {
        retention.validate()?;
        let modifier = format!("-{} {}", retention.value, retention.unit.as_str());
        let removed = self
            .conn
            .call(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM items WHERE inserted_at < datetime('now', ?1)",
                    params![modifier],
                )?;
                Ok(removed)
            })
            .await?;
        tracing::info!("Expired {} items older than {}", removed, retention);
        Ok(removed)
    }
}

fn best_effort<T: Default>(result: Result<T>, what: &str) -> T {
    result.unwrap_or_else(|e| {
        tracing::warn!("Archive {} failed: {}", what, e);
        T::default()
    })
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: DeserializeOwned>(value: Option<String>) -> Option<T> {
    value.and_then(|s| serde_json::from_str(&s).ok())
}

fn item_to_row(item: NewItem) -> Result<ItemRow> {
    Ok(ItemRow {
        categories: if item.categories.is_empty() {
            None
        } else {
            Some(to_json(&item.categories)?)
        },
        enclosure: item.enclosure.as_ref().map(to_json).transpose()?,
        guid: item.guid.as_ref().map(to_json).transpose()?,
        source: item.source.as_ref().map(to_json).transpose()?,
        pub_date: item.pub_date.map(|dt| dt.to_rfc3339()),
        item_id: item.item_id,
        title: item.title,
        description: item.description,
        link: item.link,
        author: item.author,
        comments: item.comments,
    })
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, SQLITE_DATETIME) {
        return Some(naive.and_utc());
    }
    None
}

fn feed_from_row(row: &Row) -> rusqlite::Result<ArchivedFeed> {
    Ok(ArchivedFeed {
        feed_id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        link: row.get(3)?,
        language: row.get(4)?,
        updated_at: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| parse_datetime(&s)),
        archived_at: row
            .get::<_, String>(6)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
    })
}

fn item_from_row(row: &Row) -> rusqlite::Result<ArchivedItem> {
    Ok(ArchivedItem {
        item_id: row.get(0)?,
        feed_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        link: row.get(4)?,
        author: row.get(5)?,
        categories: from_json(row.get(6)?).unwrap_or_default(),
        comments: row.get(7)?,
        pub_date: row
            .get::<_, Option<String>>(8)?
            .and_then(|s| parse_datetime(&s)),
        enclosure: from_json(row.get(9)?),
        guid: from_json(row.get(10)?),
        source: from_json(row.get(11)?),
        inserted_at: row
            .get::<_, String>(12)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use chrono::Months;

    use super::*;
    use crate::models::{Enclosure, Guid, ItemCategory, ItemSource};

    async fn archive_with_feeds(ids: &[&str]) -> Repository {
        let repo = Repository::open_in_memory().await.unwrap();
        for id in ids {
            repo.add_feed(NewFeed::default(), id).await.unwrap();
        }
        repo
    }

    fn items(ids: &[&str]) -> Vec<NewItem> {
        ids.iter().map(|id| NewItem::new(*id)).collect()
    }

    #[tokio::test]
    async fn archived_ids_are_found_across_feeds() {
        let repo = archive_with_feeds(&["f1", "f2"]).await;
        repo.add_items(items(&["a", "b"]), "f1").await.unwrap();
        repo.add_items(items(&["c"]), "f2").await.unwrap();

        let found = repo
            .find_archived_ids(vec!["a".into(), "c".into(), "z".into()])
            .await
            .unwrap();
        assert_eq!(found, HashSet::from(["a".to_string(), "c".to_string()]));
        assert!(repo.find_archived_ids(Vec::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_and_list_items() {
        let repo = archive_with_feeds(&["f1"]).await;

        assert!(repo.add_items(items(&["a", "b"]), "f1").await.unwrap());
        assert_eq!(repo.get_item_ids("f1").await, vec!["a", "b"]);
        assert_eq!(repo.count_items().await, 2);
        assert!(repo.get_item_ids("unknown").await.is_empty());
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let repo = archive_with_feeds(&["f1"]).await;
        assert!(!repo.add_items(Vec::new(), "f1").await.unwrap());
        assert_eq!(repo.count_items().await, 0);
    }

    #[tokio::test]
    async fn items_need_an_archived_feed() {
        let repo = archive_with_feeds(&[]).await;
        assert!(matches!(
            repo.add_items(items(&["a"]), "missing").await,
            Err(AppError::UnknownArchivedFeed(_))
        ));
    }

    #[tokio::test]
    async fn duplicates_are_rejected_globally() {
        let repo = archive_with_feeds(&["f1", "f2"]).await;
        repo.add_items(items(&["a", "b"]), "f1").await.unwrap();

        match repo.add_items(items(&["b", "c", "a"]), "f2").await {
            Err(AppError::DuplicateItemId(ids)) => assert_eq!(ids, vec!["b", "a"]),
            other => panic!("expected duplicate error, got {:?}", other),
        }
        assert_eq!(repo.count_items().await, 2);
        assert!(repo.get_item_ids("f2").await.is_empty());
    }

    #[tokio::test]
    async fn repeated_ids_within_a_batch_are_rejected() {
        let repo = archive_with_feeds(&["f1"]).await;
        assert!(matches!(
            repo.add_items(items(&["a", "a"]), "f1").await,
            Err(AppError::DuplicateItemId(ids)) if ids == vec!["a".to_string()]
        ));
        assert_eq!(repo.count_items().await, 0);
    }

    #[tokio::test]
    async fn structured_fields_survive_storage() {
        let repo = archive_with_feeds(&["f1"]).await;
        let item = NewItem {
            item_id: "ep-1".to_string(),
            title: Some("Episode 1".to_string()),
            link: Some("https://example.com/ep-1".to_string()),
            categories: vec![ItemCategory {
                name: "audio".to_string(),
                domain: None,
            }],
            pub_date: Some(Utc::now() - chrono::Duration::hours(3)),
            enclosure: Some(Enclosure {
                url: "https://example.com/ep-1.mp3".to_string(),
                length: Some(1024),
                mime_type: Some("audio/mpeg".to_string()),
            }),
            guid: Some(Guid {
                value: "ep-1".to_string(),
                is_permalink: false,
            }),
            source: Some(ItemSource {
                url: "https://example.com/rss".to_string(),
                title: None,
            }),
            ..Default::default()
        };
        repo.add_items(vec![item.clone()], "f1").await.unwrap();

        let stored = repo.get_items("f1").await;
        assert_eq!(stored.len(), 1);
        let stored = &stored[0];
        assert_eq!(stored.feed_id, "f1");
        assert_eq!(stored.categories, item.categories);
        assert_eq!(stored.enclosure, item.enclosure);
        assert_eq!(stored.guid, item.guid);
        assert_eq!(stored.source, item.source);
        assert_eq!(stored.author, None);
        assert_eq!(
            stored.pub_date.map(|d| d.timestamp()),
            item.pub_date.map(|d| d.timestamp())
        );
    }

    #[tokio::test]
    async fn delete_items_counts_only_existing() {
        let repo = archive_with_feeds(&["f1"]).await;
        repo.add_items(items(&["a", "b", "c"]), "f1").await.unwrap();

        let removed = repo
            .delete_items(vec!["a".into(), "c".into(), "zzz".into()])
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(repo.get_item_ids("f1").await, vec!["b"]);
    }

    #[tokio::test]
    async fn clean_items_expires_only_old_items() {
        let repo = archive_with_feeds(&["f1"]).await;
        let two_months_ago = Utc::now().checked_sub_months(Months::new(2)).unwrap();
        repo.add_items_at(items(&["old-1", "old-2"]), "f1", two_months_ago)
            .await
            .unwrap();
        repo.add_items(items(&["fresh"]), "f1").await.unwrap();

        let removed = repo.clean_items(Period::months(1)).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(repo.get_item_ids("f1").await, vec!["fresh"]);
    }

    #[tokio::test]
    async fn feed_rows_are_not_cascaded() {
        let repo = archive_with_feeds(&["f1"]).await;
        repo.add_items(items(&["a"]), "f1").await.unwrap();

        assert!(repo.delete_feed("f1").await.is_err());
        assert!(repo.get_feed("f1").await.is_some());

        repo.delete_items(repo.get_item_ids("f1").await).await.unwrap();
        assert!(repo.delete_feed("f1").await.unwrap());
        assert!(repo.get_feed("f1").await.is_none());
        assert!(!repo.delete_feed("f1").await.unwrap());
    }

    #[tokio::test]
    async fn add_feed_refreshes_metadata() {
        let repo = archive_with_feeds(&[]).await;
        repo.add_feed(
            NewFeed {
                title: Some("Old".to_string()),
                ..Default::default()
            },
            "f1",
        )
        .await
        .unwrap();
        repo.add_feed(
            NewFeed {
                title: Some("New".to_string()),
                language: Some("en".to_string()),
                ..Default::default()
            },
            "f1",
        )
        .await
        .unwrap();

        let feed = repo.get_feed("f1").await.unwrap();
        assert_eq!(feed.title.as_deref(), Some("New"));
        assert_eq!(feed.language.as_deref(), Some("en"));
    }
}
