//! Store configuration, persisted as JSON next to the database.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::DEFAULT_PROGRESS_OPS;
use crate::errors::{DbError, Result};

const DEFAULT_CONFIG_NAME: &str = "cluster-db.json";
const DEFAULT_DB_NAME: &str = "cluster.db";

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    #[default]
    Wal,
    Delete,
    Memory,
}

impl JournalMode {
    pub fn pragma(self) -> &'static str {
        match self {
            JournalMode::Wal => "WAL",
            JournalMode::Delete => "DELETE",
            JournalMode::Memory => "MEMORY",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Database file; relative paths resolve against the config directory.
    /// `None` keeps the store in memory.
    pub path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
    pub journal_mode: JournalMode,
    pub foreign_keys: bool,
    /// Log and skip statements that fail to prepare instead of aborting.
    pub skip_prepare_errors: bool,
    /// SQLite VM instructions between cancellation checks.
    pub progress_ops: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from(DEFAULT_DB_NAME)),
            busy_timeout_ms: 5_000,
            journal_mode: JournalMode::Wal,
            foreign_keys: true,
            skip_prepare_errors: false,
            progress_ops: DEFAULT_PROGRESS_OPS,
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            journal_mode: JournalMode::Memory,
            ..Self::default()
        }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Read `cluster-db.json` from `base_dir`, writing the defaults there
    /// first if it does not exist. Relative database paths are resolved
    /// against `base_dir`.
    pub fn load_or_init(base_dir: &Path) -> Result<Self> {
        fs::create_dir_all(base_dir)?;
        let config_path = base_dir.join(DEFAULT_CONFIG_NAME);
        let mut config = if config_path.exists() {
            let raw = fs::read_to_string(&config_path)?;
            serde_json::from_str::<StoreConfig>(&raw)?
        } else {
            let default = StoreConfig::default();
            fs::write(&config_path, serde_json::to_string_pretty(&default)?)?;
            default
        };
        if let Some(path) = config.path.as_mut() {
            if path.is_relative() {
                *path = base_dir.join(&*path);
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.progress_ops < 1 {
            return Err(DbError::Config(format!(
                "progress_ops must be positive, got {}",
                self.progress_ops
            )));
        }
        if self.path.is_none() && self.journal_mode == JournalMode::Wal {
            return Err(DbError::Config(
                "WAL journal mode needs a database file".to_string(),
            ));
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
