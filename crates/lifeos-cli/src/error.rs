use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] lifeos_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Endpoint cannot be empty")]
    EmptyEndpoint,
    #[error("Invalid JSON payload: {0}")]
    InvalidPayload(String),
    #[error("Invalid entity file {path}: {message}")]
    InvalidEntityFile { path: String, message: String },
    #[error("Queue item not found for id/prefix: {0}")]
    QueueItemNotFound(String),
    #[error("{0}")]
    AmbiguousQueueId(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "API is not configured. Set LIFEOS_API_URL (and LIFEOS_AUTH_TOKEN for the realtime stream)."
    )]
    ApiNotConfigured,
}

impl From<lifeos_core::config::ConfigError> for CliError {
    fn from(error: lifeos_core::config::ConfigError) -> Self {
        match error {
            lifeos_core::config::ConfigError::MissingVar("LIFEOS_API_URL") => Self::ApiNotConfigured,
            other => Self::Config(other.to_string()),
        }
    }
}

impl From<lifeos_core::TransportError> for CliError {
    fn from(error: lifeos_core::TransportError) -> Self {
        Self::Core(error.into())
    }
}
