//! Feed scheduling and archive daemon.
//!
//! Feeds are registered under a category tree, fetched on their own cadence
//! and every newly seen item is archived in SQLite until retention expires it.

pub mod app;
pub mod collect;
pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod models;
pub mod registry;
pub mod schedule;

pub use app::{App, ImportSummary};
pub use config::Config;
pub use error::{AppError, ErrorKind, Result};
