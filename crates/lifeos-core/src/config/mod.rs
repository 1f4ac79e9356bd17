//! Client configuration for the sync engine.
//!
//! `SyncClientConfig` is shared by the queue, the sync manager and the
//! realtime channel. It is usually read from `LIFEOS_*` environment
//! variables; callers can still build it by hand for tests.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::util::{is_http_url, join_url, normalize_text_option};

pub const DEFAULT_STREAM_PATH: &str = "/api/realtime/stream";
pub const DEFAULT_STORAGE_KEY: &str = "offline-sync-queue";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_DRAIN_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 3;
pub const DEFAULT_QUEUE_CAPACITY: usize = 500;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct SyncClientConfig {
    /// API origin, without trailing slash (e.g. `https://api.example.com`)
    pub api_base_url: String,
    /// Path of the server-sent events stream
    pub stream_path: String,
    /// Bearer token of the current user session
    pub auth_token: Option<String>,
    /// Per-request timeout for live calls and queue replay
    pub request_timeout: Duration,
    /// Interval between periodic drain attempts while online
    pub drain_interval: Duration,
    /// Delay before the realtime channel reconnects after a transport error
    pub reconnect_delay: Duration,
    /// Optional interval for a full cache reconciliation pass
    pub reconcile_interval: Option<Duration>,
    /// Maximum number of queued mutations kept locally
    pub queue_capacity: usize,
    /// Storage key holding the serialized queue
    pub storage_key: String,
}

impl fmt::Debug for SyncClientConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SyncClientConfig")
            .field("api_base_url", &self.api_base_url)
            .field("stream_path", &self.stream_path)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("request_timeout", &self.request_timeout)
            .field("drain_interval", &self.drain_interval)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("reconcile_interval", &self.reconcile_interval)
            .field("queue_capacity", &self.queue_capacity)
            .field("storage_key", &self.storage_key)
            .finish()
    }
}

impl SyncClientConfig {
    /// Build a config for `api_base_url` with default tuning values.
    pub fn new(api_base_url: impl Into<String>) -> Result<Self, ConfigError> {
        let api_base_url = normalize_base_url(api_base_url.into(), "api_base_url")?;
        Ok(Self {
            api_base_url,
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            auth_token: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            drain_interval: Duration::from_secs(DEFAULT_DRAIN_INTERVAL_SECS),
            reconnect_delay: Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS),
            reconcile_interval: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
        })
    }

    /// Attach the session bearer token.
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = normalize_text_option(Some(token.into()));
        self
    }

    /// Load configuration from `LIFEOS_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_base_url = normalize_text_option(lookup("LIFEOS_API_URL"))
            .ok_or(ConfigError::MissingVar("LIFEOS_API_URL"))?;
        let mut config = Self::new(api_base_url)?;

        config.auth_token = normalize_text_option(lookup("LIFEOS_AUTH_TOKEN"));

        if let Some(path) = normalize_text_option(lookup("LIFEOS_STREAM_PATH")) {
            config.stream_path = normalize_path(&path);
        }
        if let Some(secs) = parse_positive(&lookup, "LIFEOS_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_positive(&lookup, "LIFEOS_DRAIN_INTERVAL_SECS")? {
            config.drain_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_positive(&lookup, "LIFEOS_RECONNECT_DELAY_SECS")? {
            config.reconnect_delay = Duration::from_secs(secs);
        }
        config.reconcile_interval =
            parse_positive(&lookup, "LIFEOS_RECONCILE_INTERVAL_SECS")?.map(Duration::from_secs);
        if let Some(capacity) = parse_positive(&lookup, "LIFEOS_QUEUE_CAPACITY")? {
            config.queue_capacity = usize::try_from(capacity).map_err(|_| {
                ConfigError::Invalid("LIFEOS_QUEUE_CAPACITY is too large".to_string())
            })?;
        }

        Ok(config)
    }

    /// Full URL of the realtime stream.
    pub fn stream_url(&self) -> String {
        join_url(&self.api_base_url, &self.stream_path)
    }

    /// Full URL for an API endpoint path.
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        join_url(&self.api_base_url, endpoint)
    }
}

fn normalize_base_url(raw: String, field: &str) -> Result<String, ConfigError> {
    let value = normalize_text_option(Some(raw))
        .ok_or_else(|| ConfigError::Invalid(format!("{field} must not be empty")))?;
    if is_http_url(&value) {
        Ok(value.trim_end_matches('/').to_string())
    } else {
        Err(ConfigError::Invalid(format!(
            "{field} must include http:// or https://"
        )))
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn parse_positive(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = normalize_text_option(lookup(name)) else {
        return Ok(None);
    };
    let value = raw
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(format!("{name} must be a positive integer")))?;
    if value == 0 {
        return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
    }
    Ok(Some(value))
}
