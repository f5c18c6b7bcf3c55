//! Error types for the Ark backup controller

use thiserror::Error;

/// Result type alias using the controller's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Controller error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Queue key that is not of the form `namespace/name`
    #[error("Invalid backup key: {0}")]
    InvalidKey(String),

    /// Backup not found in the resource store
    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    /// Stored object changed underneath a status update
    #[error("Conflict updating backup {0}")]
    Conflict(String),

    /// Item action plugin error
    #[error("Plugin error: {0}")]
    Plugin(String),

    /// Backup data production error
    #[error("Backup error: {0}")]
    Backupper(String),

    /// Upload error
    #[error("Upload error: {0}")]
    Upload(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a plugin error
    pub fn plugin(msg: impl Into<String>) -> Self {
        Error::Plugin(msg.into())
    }

    /// Create a backup production error
    pub fn backupper(msg: impl Into<String>) -> Self {
        Error::Backupper(msg.into())
    }

    /// Create an upload error
    pub fn upload(msg: impl Into<String>) -> Self {
        Error::Upload(msg.into())
    }

    /// Whether requeueing the same key could ever succeed.
    ///
    /// A malformed key never becomes valid, so it is dropped instead of retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::InvalidKey(_))
    }
}
