//! Error types for fieldsync-core

use thiserror::Error;

/// Result type alias using fieldsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fieldsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// No network at a decision point
    #[error("Network connectivity unavailable")]
    ConnectivityUnavailable,

    /// Remote call failed (validation, auth, quota, server error)
    #[error("Remote rejected request: {0}")]
    RemoteRejected(String),

    /// Durable store failure that is not a raw SQLite error
    #[error("Local storage error: {0}")]
    LocalStorage(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Media upload failed
    #[error("Media upload failed: {0}")]
    MediaUpload(String),

    /// No authenticated owner could be resolved
    #[error("No authenticated owner")]
    NotAuthenticated,

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this failure came from talking to the remote side.
    ///
    /// Remote failures on the direct write path fall back to the queued path;
    /// local failures are surfaced to the caller.
    pub const fn is_remote_failure(&self) -> bool {
        matches!(
            self,
            Self::ConnectivityUnavailable | Self::RemoteRejected(_) | Self::MediaUpload(_)
        )
    }
}
