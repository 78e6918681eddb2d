//! Storage configuration for Trellis indexes.

use crate::error::{Result, TrellisError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration shared by every index opened through it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for block files.
    pub data_dir: PathBuf,
    /// Keep blocks in memory instead of files under `data_dir`.
    pub in_memory: bool,
    /// Decoded-page cache size, per page manager, in pages.
    pub cache_pages: usize,
    /// Enable fsync on sync for durability.
    pub fsync_enabled: bool,
    /// Wrap block managers in a tracker that enforces read/update brackets.
    pub track_brackets: bool,
    /// Run the full structural check after every tree mutation.
    pub check_structure: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            in_memory: false,
            cache_pages: 1024,
            fsync_enabled: true,
            track_brackets: false,
            check_structure: false,
        }
    }
}

impl StorageConfig {
    /// Configuration for a throwaway in-memory index.
    pub fn in_memory() -> Self {
        Self {
            in_memory: true,
            fsync_enabled: false,
            ..Default::default()
        }
    }

    /// Configuration rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Path of the block file `<data_dir>/<name>.<ext>`.
    pub fn block_file_path(&self, name: &str, ext: &str) -> PathBuf {
        self.data_dir.join(format!("{name}.{ext}"))
    }

    /// Checks that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.cache_pages == 0 {
            return Err(TrellisError::ConfigError(
                "cache_pages must be positive".to_string(),
            ));
        }
        if !self.in_memory && self.data_dir.as_os_str().is_empty() {
            return Err(TrellisError::ConfigError(
                "data_dir must be set for file storage".to_string(),
            ));
        }
        Ok(())
    }
}
