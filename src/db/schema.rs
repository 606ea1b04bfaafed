pub const SCHEMA: &str = r#"
-- archived feeds, one row per collected feed config
CREATE TABLE IF NOT EXISTS feeds (
    feed_id TEXT PRIMARY KEY,
    title TEXT,
    description TEXT,
    link TEXT,
    language TEXT,
    updated_at TEXT,
    archived_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- archived items; item ids are unique across the whole archive
CREATE TABLE IF NOT EXISTS items (
    item_id TEXT PRIMARY KEY,
    feed_id TEXT NOT NULL REFERENCES feeds(feed_id),
    title TEXT,
    description TEXT,
    link TEXT,
    author TEXT,
    categories TEXT,
    comments TEXT,
    pub_date TEXT,
    enclosure TEXT,
    guid TEXT,
    source TEXT,
    inserted_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_items_feed_id ON items(feed_id);
CREATE INDEX IF NOT EXISTS idx_items_inserted_at ON items(inserted_at);
"#;
