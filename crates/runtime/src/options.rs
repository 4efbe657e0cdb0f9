use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Knobs for a [`crate::CacheSession`]. Every field has a default, so a
/// JSON file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    pub enabled: bool,
    pub cache_file: Option<PathBuf>,
    /// Hand out deep copies of cached artifacts. `false` shares immutable
    /// instruction structure with the cache.
    pub isolate: bool,
    /// Trust that a fingerprint always means the same shape and config.
    pub skip_validation: bool,
    /// Misses tolerated after the first batch before caching is switched off
    /// for the rest of the session.
    pub allowed_misses: Option<u64>,
    /// Remove an existing cache file when the session opens.
    pub clear_cache_file: bool,
    /// Backend worker threads; `None` lets rayon pick.
    pub workers: Option<usize>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_file: None,
            isolate: true,
            skip_validation: false,
            allowed_misses: None,
            clear_cache_file: false,
            workers: None,
        }
    }
}

impl CacheOptions {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_cache_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_file = Some(path.into());
        self
    }

    pub fn from_json_str(blob: &str) -> Result<Self> {
        serde_json::from_str(blob).context("invalid cache options")
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let blob = fs::read_to_string(path)
            .with_context(|| format!("failed to read cache options {}", path.display()))?;
        Self::from_json_str(&blob)
    }
}
