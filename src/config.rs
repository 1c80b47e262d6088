//! Store configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Options for opening a [`FileStore`](crate::store::FileStore)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Create the store directory if it does not exist
    pub create_if_missing: bool,
    /// fsync after every write batch (flush and close always fsync)
    pub sync_writes: bool,
    /// zstd level for large values; `None` disables compression
    pub compression_level: Option<i32>,
    /// Values shorter than this are never compressed
    pub compression_threshold: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            create_if_missing: true,
            sync_writes: false,
            compression_level: None,
            compression_threshold: 256,
        }
    }
}

impl StoreConfig {
    /// Load a config from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StoreConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the store cannot honor
    pub fn validate(&self) -> Result<()> {
        if let Some(level) = self.compression_level {
            if !(1..=22).contains(&level) {
                return Err(Error::Config(format!(
                    "compression level {} outside 1..=22",
                    level
                )));
            }
        }
        Ok(())
    }

    /// Open-only config: fail if the store does not exist
    pub fn existing() -> Self {
        StoreConfig {
            create_if_missing: false,
            ..Default::default()
        }
    }

    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    pub fn with_compression(mut self, level: i32) -> Self {
        self.compression_level = Some(level);
        self
    }

    /// Whether a value of this length should be compressed
    pub(crate) fn should_compress(&self, len: usize) -> Option<i32> {
        self.compression_level
            .filter(|_| len >= self.compression_threshold)
    }
}
