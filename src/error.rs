use thiserror::Error;

/// Broad classification of every failure the daemon can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DuplicateId,
    UnknownId,
    ImmutableField,
    InvalidValue,
    StorageFailure,
    Collection,
}

#[derive(Debug, Error)]
pub enum AppError {
    // Category tree
    #[error("Category id already in use: {0}")]
    DuplicateCategoryId(String),

    #[error("Category does not exist: {0}")]
    NotExistCategory(String),

    #[error("Invalid category: {0}")]
    InvalidCategory(String),

    // Feed registry
    #[error("Feed id already registered: {0}")]
    DuplicateFeedId(String),

    #[error("Feed url already registered: {0}")]
    DuplicateFeedUrl(String),

    #[error("Unknown feed id: {0}")]
    UnknownFeedId(String),

    #[error("Feed id {current} cannot be changed to {requested}")]
    ImmutableFeedId { current: String, requested: String },

    #[error("Feed references missing category: {0}")]
    InvalidCategoryReference(String),

    #[error("Invalid cadence: {0}")]
    InvalidCadence(String),

    #[error("Invalid feed url: {0}")]
    InvalidFeedUrl(String),

    // Scheduler
    #[error("A job is already scheduled for feed {0}")]
    DuplicateJobId(String),

    #[error("No job scheduled for feed {0}")]
    UnknownJobId(String),

    // Archive
    #[error("Items already archived: {}", .0.join(", "))]
    DuplicateItemId(Vec<String>),

    #[error("Feed has not been archived: {0}")]
    UnknownArchivedFeed(String),

    // Storage and plumbing
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    // Collection
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    FeedParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("OPML error: {0}")]
    Opml(#[from] opml::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::DuplicateCategoryId(_)
            | AppError::DuplicateFeedId(_)
            | AppError::DuplicateFeedUrl(_)
            | AppError::DuplicateJobId(_)
            | AppError::DuplicateItemId(_) => ErrorKind::DuplicateId,

            AppError::NotExistCategory(_)
            | AppError::UnknownFeedId(_)
            | AppError::InvalidCategoryReference(_)
            | AppError::UnknownJobId(_)
            | AppError::UnknownArchivedFeed(_) => ErrorKind::UnknownId,

            AppError::ImmutableFeedId { .. } => ErrorKind::ImmutableField,

            AppError::InvalidCategory(_)
            | AppError::InvalidCadence(_)
            | AppError::InvalidFeedUrl(_)
            | AppError::Config(_) => ErrorKind::InvalidValue,

            AppError::Io(_)
            | AppError::Database(_)
            | AppError::Sqlite(_)
            | AppError::Json(_)
            | AppError::Toml(_) => ErrorKind::StorageFailure,

            AppError::Http(_) | AppError::FeedParse(_) | AppError::Opml(_) | AppError::Other(_) => {
                ErrorKind::Collection
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
