mod fetcher;
mod opml_import;

pub use fetcher::FeedFetcher;
pub use opml_import::{parse_opml_file, parse_opml_str, ImportedCategory, ImportedFeed, OpmlImport};
