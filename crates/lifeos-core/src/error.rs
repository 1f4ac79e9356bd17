//! Error types for lifeos-core

use thiserror::Error;

use crate::config::ConfigError;
use crate::sync::TransportError;

/// Result type alias using lifeos-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in lifeos-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport error while talking to the API
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Invalid client configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Entity is missing `id`/`updated_at` or is not an object
    #[error("Invalid entity: {0}")]
    InvalidEntity(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Realtime channel requires an authenticated session
    #[error("Realtime channel requires an auth token")]
    MissingSession,
}

impl Error {
    /// Returns true when the error came from a transport-level connectivity failure.
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::Transport(error) if error.is_connectivity())
    }
}
