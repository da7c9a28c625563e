use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] fieldsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("No report title provided")]
    EmptyTitle,
    #[error("Record ID cannot be empty")]
    EmptyRecordId,
    #[error("Record not found: {0}")]
    RecordNotFound(String),
    #[error("Unsupported media file: {0}")]
    UnsupportedMedia(String),
    #[error("No owner configured. Pass --owner or set FIELDSYNC_OWNER_ID.")]
    OwnerRequired,
    #[error("The records API is unreachable; pending records stay queued locally.")]
    Offline,
}

impl From<fieldsync_core::config::ConfigError> for CliError {
    fn from(error: fieldsync_core::config::ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}
