//! Error types for cache lookup and generation.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while resolving or producing a cache entry.
///
/// None of these are fatal: a lookup that fails degrades to showing the
/// original source, and a failed generation simply leaves the cache miss in
/// place for the next lookup to retry.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The source does not exist or is not a regular file.
    #[error("Failed to stat {path}")]
    Stat { path: PathBuf },

    /// The source exists but could not be decoded as an image.
    #[error("Failed to read image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to create cache directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to save to {path}: {reason}")]
    Save { path: PathBuf, reason: String },

    /// The resolved cache location is not a local file.
    #[error("Cache path {0} is not a local file")]
    InvalidTarget(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;
