//! Error types for template loading and the video cache.

use thiserror::Error;

/// Failure while building a template set from the remote source or bundled assets.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("remote source unavailable: {0}")]
    Network(String),

    #[error("manifest is empty")]
    EmptyManifest,

    #[error("malformed manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("asset io failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("image for {0} has no pixels")]
    EmptyImage(String),

    #[error("no templates could be built from {source_name}")]
    NoTemplates { source_name: String },

    #[error("fingerprint task failed: {0}")]
    Task(String),
}

impl From<reqwest::Error> for LoadError {
    fn from(err: reqwest::Error) -> Self {
        LoadError::Network(err.to_string())
    }
}

/// Failure inside the video cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache database failed: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("lip coordinates could not be encoded: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("checksum mismatch for {poster_id}: expected {expected}, found {actual}")]
    Integrity {
        poster_id: String,
        expected: String,
        actual: String,
    },
}

/// Failure reading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file malformed: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Failure assembling the client from its configuration.
#[derive(Debug, Error)]
pub enum RecallError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
