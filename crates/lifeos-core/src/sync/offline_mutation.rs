//! Mutation wrapper that queues writes instead of failing when offline.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use crate::cache::{invalidation_keys_for_endpoint, QueryCache, QueryKey};
use crate::db::KeyValueStore;
use crate::error::{Error, Result};
use crate::models::{HttpMethod, MutationRequest, QueuedMutation};
use crate::sync::connectivity::Connectivity;
use crate::sync::queue::SyncQueue;
use crate::sync::transport::{Transport, TransportError};

/// Result of an offline-aware mutation
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome<T> {
    /// The server accepted the write
    Completed(T),
    /// The write was queued for later replay
    Queued(QueuedMutation),
}

impl<T> MutationOutcome<T> {
    pub const fn is_offline(&self) -> bool {
        matches!(self, Self::Queued(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(data) => Some(data),
            Self::Queued(_) => None,
        }
    }
}

impl<T: Serialize> MutationOutcome<T> {
    /// JSON shape handed back to callers: the server data, or `{"offline": true}`.
    pub fn to_json(&self) -> Result<Value> {
        match self {
            Self::Completed(data) => Ok(serde_json::to_value(data)?),
            Self::Queued(_) => Ok(json!({ "offline": true })),
        }
    }
}

/// A write bound to one endpoint and method.
///
/// Online, `execute` runs the caller's request and refreshes the affected
/// cache keys. Offline, or when the request fails for connectivity reasons,
/// the variables are queued and `Queued` is returned. Application errors
/// (validation, not found) are returned as-is and never queued.
pub struct OfflineMutation<S: KeyValueStore> {
    queue: Arc<SyncQueue<S>>,
    connectivity: Connectivity,
    endpoint: String,
    method: HttpMethod,
    invalidates: Vec<QueryKey>,
}

impl<S: KeyValueStore> OfflineMutation<S> {
    pub fn new(
        queue: Arc<SyncQueue<S>>,
        connectivity: Connectivity,
        endpoint: impl Into<String>,
        method: HttpMethod,
    ) -> Self {
        let endpoint = endpoint.into();
        let invalidates = invalidation_keys_for_endpoint(&endpoint);
        Self {
            queue,
            connectivity,
            endpoint,
            method,
            invalidates,
        }
    }

    /// Override the cache keys refreshed after a live success.
    #[must_use]
    pub fn invalidates(mut self, keys: impl IntoIterator<Item = QueryKey>) -> Self {
        self.invalidates = keys.into_iter().collect();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub const fn method(&self) -> HttpMethod {
        self.method
    }

    pub async fn execute<V, T, F, Fut>(&self, variables: V, mutation_fn: F) -> Result<MutationOutcome<T>>
    where
        V: Serialize,
        F: FnOnce(V) -> Fut,
        Fut: Future<Output = std::result::Result<T, TransportError>>,
    {
        let payload = serde_json::to_value(&variables)?;

        if !self.connectivity.is_online() {
            tracing::info!("Offline: queueing {} {}", self.method, self.endpoint);
            return self.enqueue(payload).await;
        }

        match mutation_fn(variables).await {
            Ok(data) => {
                if let Some(cache) = self.queue.cache() {
                    refresh(cache, &self.invalidates);
                }
                Ok(MutationOutcome::Completed(data))
            }
            Err(error) if error.is_connectivity() => {
                tracing::warn!(
                    "{} {} could not reach the server ({}); queueing",
                    self.method,
                    self.endpoint,
                    error
                );
                self.enqueue(payload).await
            }
            Err(error) => Err(Error::Transport(error)),
        }
    }

    /// Execute by sending the payload through `transport` as-is.
    pub async fn send_via<T: Transport>(
        &self,
        transport: &T,
        payload: Value,
    ) -> Result<MutationOutcome<Value>> {
        let endpoint = self.endpoint.clone();
        let method = self.method;
        self.execute(payload, |payload| async move {
            transport
                .send(&MutationRequest::new(endpoint, method, payload))
                .await
        })
        .await
    }

    async fn enqueue<T>(&self, payload: Value) -> Result<MutationOutcome<T>> {
        let request = MutationRequest::new(self.endpoint.clone(), self.method, payload);
        let queued = self.queue.add_to_queue(request).await?;
        Ok(MutationOutcome::Queued(queued))
    }
}

fn refresh(cache: &QueryCache, keys: &[QueryKey]) {
    cache.invalidate_many(keys);
}
