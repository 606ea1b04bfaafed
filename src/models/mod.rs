mod category;
mod feed_config;
mod item;

pub use category::{Category, CategoryUpdate, ROOT_CATEGORY_ID};
pub use feed_config::{FeedConfig, Period, TimeUnit};
pub use item::{ArchivedFeed, ArchivedItem, Enclosure, Guid, ItemCategory, ItemSource, NewFeed, NewItem};
