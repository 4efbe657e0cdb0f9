//! Error kinds raised by the cache.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// A cached entry no longer matches the job or configuration it was
    /// looked up for.
    #[error("structural mismatch for {fingerprint}: {detail}")]
    StructuralMismatch { fingerprint: String, detail: String },

    /// A parameter could not be traced to any embedded value and its new
    /// value differs from the one the template was compiled with.
    #[error("parameter #{index} of job {job} is untraceable in the cached template")]
    UntraceableParameter { job: String, index: usize },

    /// The cache file was written by an incompatible format or version.
    #[error("cache file {path} has format {found}, expected {expected}")]
    Format {
        path: PathBuf,
        found: String,
        expected: String,
    },

    /// One entry cannot be encoded losslessly; the rest of the store still
    /// persists.
    #[error("entry {fingerprint} cannot be serialized: {detail}")]
    Serialization { fingerprint: String, detail: String },

    /// The cache file has the right version but its contents are unreadable
    /// or inconsistent.
    #[error("cache file {path} is corrupt: {detail}")]
    Decode { path: PathBuf, detail: String },

    #[error("cache file I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn decode(path: impl Into<PathBuf>, detail: impl ToString) -> Self {
        CacheError::Decode {
            path: path.into(),
            detail: detail.to_string(),
        }
    }

    /// True for the failures that mean "this file is not a readable cache"
    /// rather than "the disk failed".
    pub fn is_format_error(&self) -> bool {
        matches!(self, CacheError::Format { .. } | CacheError::Decode { .. })
    }
}
