//! Queued mutation model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Error;

/// HTTP verbs a queued mutation can be replayed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Whether the replayed request carries a JSON body.
    pub const fn has_body(self) -> bool {
        !matches!(self, Self::Delete)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!(
                "unsupported mutation method: {other}"
            ))),
        }
    }
}

/// A write operation addressed to the API: endpoint, verb and JSON payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRequest {
    /// API path, e.g. `/api/tasks/42`
    pub endpoint: String,
    pub method: HttpMethod,
    /// JSON body; `null` when the call has none
    #[serde(default)]
    pub payload: Value,
}

impl MutationRequest {
    pub fn new(endpoint: impl Into<String>, method: HttpMethod, payload: Value) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            payload,
        }
    }

    /// The payload's `id`, when it carries a string or numeric one.
    pub fn entity_id(&self) -> Option<String> {
        self.payload.get("id").and_then(|id| match id {
            Value::String(value) => Some(value.clone()),
            Value::Number(value) => Some(value.to_string()),
            _ => None,
        })
    }

    /// Whether both requests address the same record.
    ///
    /// Endpoints must match. When both payloads carry an `id` those must match
    /// too; otherwise the endpoint path alone identifies the record, since a
    /// `DELETE` or partial `PATCH` usually has no `id` in its body.
    pub fn targets_same_record(&self, other: &Self) -> bool {
        if self.endpoint != other.endpoint {
            return false;
        }
        match (self.entity_id(), other.entity_id()) {
            (Some(left), Some(right)) => left == right,
            _ => true,
        }
    }
}

/// A mutation waiting in the offline queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMutation {
    /// Queue item identifier
    pub id: String,
    #[serde(flatten)]
    pub request: MutationRequest,
    /// Enqueue timestamp (Unix ms)
    pub timestamp: i64,
    /// Failed replay attempts so far
    #[serde(default)]
    pub retry_count: u32,
}

impl QueuedMutation {
    pub fn new(request: MutationRequest) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            request,
            timestamp: chrono::Utc::now().timestamp_millis(),
            retry_count: 0,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.request.endpoint
    }

    pub const fn method(&self) -> HttpMethod {
        self.request.method
    }
}
