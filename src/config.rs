//! Store configuration.
//!
//! Every field has a default, so a configuration file only needs to name what
//! it changes:
//!
//! ```json
//! { "path": "/var/lib/revstore/tables.sqlite", "busy_timeout_ms": 10000 }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default time a statement waits on a locked database file.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Default bound of the engine's request channel.
const DEFAULT_CHANNEL_SIZE: usize = 1024;

/// Configuration for [`crate::TableStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file. `None` keeps everything in memory for the lifetime of
    /// the store.
    pub path: Option<PathBuf>,

    /// How long SQLite retries when another connection holds the lock.
    pub busy_timeout_ms: u64,

    /// Maximum number of queued engine requests before callers wait.
    pub channel_size: usize,

    /// Use write-ahead logging. Ignored for in-memory stores.
    pub wal: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            channel_size: DEFAULT_CHANNEL_SIZE,
            wal: true,
        }
    }
}

impl StoreConfig {
    /// An in-memory store with default settings.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A file-backed store with default settings.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Loads a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_size == 0 {
            return Err(Error::invalid("channel_size must be at least 1"));
        }
        Ok(())
    }
}
