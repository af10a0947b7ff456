//! Error types for the proxy-finder crate.
//!
//! Per-candidate probe failures are never errors; they are recorded as
//! verdicts and counted. Only caller misconfiguration, a complete absence
//! of sources, or an empty pool surface here.

use thiserror::Error;

/// Convenience result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The caller supplied an unusable configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No candidate sources were registered at all.
    #[error("no candidate sources configured")]
    NoSources,

    /// No data at all: every consulted source failed at the transport
    /// level and the pool is empty.
    #[error("source {name} unavailable: {reason}")]
    SourceUnavailable { name: String, reason: String },

    /// The rotator has nothing to serve.
    #[error("no proxies available in pool")]
    PoolEmpty,
}

/// Transport-level failure while fetching from a candidate source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure while reading or writing the persisted proxy cache.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
