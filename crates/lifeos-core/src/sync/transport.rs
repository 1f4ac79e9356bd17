//! HTTP transport used for live mutations and queue replay.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::SyncClientConfig;
use crate::models::{HttpMethod, MutationRequest};
use crate::util::compact_text;

/// Transport failures, split by whether the server ever answered.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection could not be established or was dropped
    #[error("Connection failed: {0}")]
    Connectivity(String),
    /// No response within the configured timeout
    #[error("Request timed out: {0}")]
    Timeout(String),
    /// The server answered with a non-success status
    #[error("API error: {message} ({status})")]
    Status { status: u16, message: String },
    /// Response body could not be read
    #[error("Invalid response body: {0}")]
    Decode(String),
    /// Request could not be built (bad URL, bad header)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// The request never reached the server or its answer never arrived.
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::Timeout(_))
    }

    /// Whether replaying the same request later may succeed.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Connectivity(_) | Self::Timeout(_) | Self::Decode(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::InvalidRequest(_) => false,
        }
    }

    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error.to_string())
        } else if error.is_builder() {
            Self::InvalidRequest(error.to_string())
        } else if error.is_decode() || error.is_body() {
            Self::Decode(error.to_string())
        } else if let Some(status) = error.status() {
            Self::Status {
                status: status.as_u16(),
                message: error.to_string(),
            }
        } else {
            Self::Connectivity(error.to_string())
        }
    }
}

/// Something that can deliver a mutation to the API.
#[trait_variant::make(Send)]
pub trait Transport: Send + Sync {
    /// Send `request` and return the decoded response body.
    async fn send(&self, request: &MutationRequest) -> Result<Value, TransportError>;
}

impl<T: Transport> Transport for Arc<T> {
    async fn send(&self, request: &MutationRequest) -> Result<Value, TransportError> {
        (**self).send(request).await
    }
}

/// reqwest-backed transport talking JSON to the API
#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    pub fn new(config: &SyncClientConfig) -> Result<Self, TransportError> {
        Self::with_timeout(config, config.request_timeout)
    }

    pub fn with_timeout(
        config: &SyncClientConfig,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: config.api_base_url.clone(),
            auth_token: config.auth_token.clone(),
            client,
        })
    }

    /// Cheap reachability check: any HTTP answer from the API origin counts as online.
    pub async fn probe(&self) -> bool {
        match self.client.head(&self.base_url).send().await {
            Ok(_) => true,
            Err(error) => {
                tracing::debug!("Connectivity probe failed: {}", error);
                false
            }
        }
    }

    fn request_builder(&self, request: &MutationRequest) -> reqwest::RequestBuilder {
        let url = crate::util::join_url(&self.base_url, &request.endpoint);
        let builder = match request.method {
            HttpMethod::Post => self.client.post(url),
            HttpMethod::Put => self.client.put(url),
            HttpMethod::Patch => self.client.patch(url),
            HttpMethod::Delete => self.client.delete(url),
        };
        let builder = builder.header(reqwest::header::ACCEPT, "application/json");
        let builder = match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        };
        if request.method.has_body() {
            builder.json(&request.payload)
        } else {
            builder
        }
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: &MutationRequest) -> Result<Value, TransportError> {
        tracing::debug!("{} {}", request.method, request.endpoint);
        let response = self.request_builder(request).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: parse_api_error(status, &body),
            });
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return message.trim().to_string();
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .map_or_else(|| format!("HTTP {}", status.as_u16()), str::to_string)
    } else {
        trimmed
    }
}
