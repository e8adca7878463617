//! Error types for Park Flux

use thiserror::Error;

/// Result alias used across the crate
pub type ParkResult<T> = Result<T, ParkError>;

/// Errors surfaced by the parking engine
#[derive(Debug, Error)]
pub enum ParkError {
    #[error("Invalid parking session: {0}")]
    Validation(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Assistant error: {0}")]
    Assistant(String),

    #[error("Maintenance job already running: {0}")]
    MaintenanceInProgress(&'static str),
}

/// Errors raised by a storage adapter
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O failure for key {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
}
