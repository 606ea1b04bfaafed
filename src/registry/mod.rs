//! Administrative state kept as plain JSON records on disk: the category
//! tree and the feed configurations.

mod category_tree;
mod feeds;
mod files;

pub use category_tree::CategoryTree;
pub use feeds::FeedRegistry;
