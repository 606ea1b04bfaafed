use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::models::Period;

const APP_DIR: &str = "feedkeeper";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Holds the feed records, the category tree and the archive database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_minutes: u32,

    #[serde(default = "default_refresh_concurrency")]
    pub refresh_concurrency: usize,

    /// Archived items older than this are expired. `None` keeps everything.
    #[serde(default = "default_retention")]
    pub retention: Option<Period>,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn default_user_agent() -> String {
    format!("{}/{}", APP_DIR, env!("CARGO_PKG_VERSION"))
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_retention() -> Option<Period> {
    Some(Period::months(1))
}

fn default_cleanup_interval() -> u32 {
    60
}

fn default_refresh_concurrency() -> usize {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            user_agent: default_user_agent(),
            fetch_timeout_secs: default_fetch_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            retention: default_retention(),
            cleanup_interval_minutes: default_cleanup_interval(),
            refresh_concurrency: default_refresh_concurrency(),
        }
    }
}

impl Config {
    /// Load the config from the default location, writing defaults on first run.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            let config = Config::default();
            config.save_to(config_path)?;
            config
        };
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(retention) = &self.retention {
            retention
                .validate()
                .map_err(|e| AppError::Config(format!("retention: {}", e)))?;
        }
        if self.cleanup_interval_minutes == 0 {
            return Err(AppError::Config(
                "cleanup_interval_minutes must be positive".to_string(),
            ));
        }
        if self.refresh_concurrency == 0 {
            return Err(AppError::Config(
                "refresh_concurrency must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Configuration rooted at `data_dir`, everything else defaulted.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn feeds_dir(&self) -> PathBuf {
        self.data_dir.join("feeds")
    }

    pub fn category_tree_path(&self) -> PathBuf {
        self.data_dir.join("categories.json")
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("archive.db")
    }
}
