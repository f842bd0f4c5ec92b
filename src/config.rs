//! ARRAYMETA - Store Configuration
//! Defines tunable parameters for the metadata store.

use std::path::{Path, PathBuf};

use crate::error::{ArrayMetaError, Result};

/// Configuration for the array metadata store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory that relative array URIs are resolved against.
    pub data_dir: PathBuf,

    /// Whether to fsync fragment files and their directory after each write.
    pub sync_writes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            sync_writes: true,
        }
    }
}

impl Config {
    /// Create a new Config with a custom data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Enable or disable fsync on fragment writes.
    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Resolve an array URI. Absolute paths are used as-is.
    pub fn array_path(&self, uri: impl AsRef<Path>) -> PathBuf {
        self.data_dir.join(uri)
    }

    /// Ensure the data directory exists.
    pub fn ensure_dirs(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ArrayMetaError::Config("data_dir must not be empty".into()));
        }
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}
