//! Persisted queue of mutations waiting for the server.
//!
//! The queue is the single source of truth for work the server has not yet
//! acknowledged. Every change is written through to the [`KeyValueStore`]
//! before the call returns, so a crash never loses an accepted mutation.
//!
//! Replay is strictly FIFO. Only one drain runs at a time; overlapping
//! triggers get [`DrainReport::skipped`] back instead of double-sending.
//! Mutations may be added while a drain runs: the item being sent is never
//! coalesced into, and every other item is replayed as currently stored.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::Mutex;

use crate::cache::{invalidation_keys_for_endpoint, QueryCache, QueryKey};
use crate::config::SyncClientConfig;
use crate::db::KeyValueStore;
use crate::error::Result;
use crate::models::{HttpMethod, MutationRequest, QueuedMutation};
use crate::sync::transport::{Transport, TransportError};

/// What a drain does after a replay fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainPolicy {
    /// Keep the failed item and try the rest
    #[default]
    ContinueOnError,
    /// Keep the failed item and stop; later items wait for the next drain
    StopOnError,
}

/// A replay that did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedReplay {
    pub id: String,
    pub endpoint: String,
    pub method: HttpMethod,
    pub error: TransportError,
}

/// Outcome of one `process_queue` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Ids replayed successfully and removed
    pub synced: Vec<String>,
    /// Retryable failures left in the queue
    pub failed: Vec<FailedReplay>,
    /// Permanent rejections dropped from the queue
    pub rejected: Vec<FailedReplay>,
    /// Items still queued when the drain finished
    pub remaining: usize,
    /// Another drain was already running; nothing was attempted
    pub skipped: bool,
}

impl DrainReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn attempted(&self) -> usize {
        self.synced.len() + self.failed.len() + self.rejected.len()
    }
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<QueuedMutation>,
    /// Item whose replay is awaiting the server
    in_flight: Option<String>,
}

/// Ordered, persisted store of pending mutations
pub struct SyncQueue<S: KeyValueStore> {
    store: S,
    storage_key: String,
    capacity: usize,
    state: Mutex<QueueState>,
    draining: AtomicBool,
    cache: Option<QueryCache>,
}

impl<S: KeyValueStore> SyncQueue<S> {
    /// Load the queue persisted under `storage_key`.
    ///
    /// A missing key yields an empty queue. Unreadable contents are logged and
    /// discarded rather than failing start-up.
    pub async fn init(store: S, storage_key: impl Into<String>, capacity: usize) -> Result<Self> {
        let storage_key = storage_key.into();
        let items = match store.get_item(&storage_key).await? {
            Some(raw) => match serde_json::from_str::<VecDeque<QueuedMutation>>(&raw) {
                Ok(items) => items,
                Err(error) => {
                    tracing::warn!(
                        "Discarding unreadable offline queue under '{}': {}",
                        storage_key,
                        error
                    );
                    VecDeque::new()
                }
            },
            None => VecDeque::new(),
        };

        if !items.is_empty() {
            tracing::info!("Loaded {} pending mutations", items.len());
        }

        Ok(Self {
            store,
            storage_key,
            capacity: capacity.max(1),
            state: Mutex::new(QueueState {
                items,
                in_flight: None,
            }),
            draining: AtomicBool::new(false),
            cache: None,
        })
    }

    /// Load the queue using the storage key and capacity from `config`.
    pub async fn from_config(store: S, config: &SyncClientConfig) -> Result<Self> {
        Self::init(store, config.storage_key.clone(), config.queue_capacity).await
    }

    /// Invalidate `cache` after successful replays.
    #[must_use]
    pub fn with_cache(mut self, cache: QueryCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub const fn cache(&self) -> Option<&QueryCache> {
        self.cache.as_ref()
    }

    /// Append a mutation, coalescing it with superseded entries for the same record.
    pub async fn add_to_queue(&self, request: MutationRequest) -> Result<QueuedMutation> {
        let mut state = self.state.lock().await;
        let QueueState { items, in_flight } = &mut *state;

        let queued = if let Some(updated) = coalesce(items, in_flight.as_deref(), &request) {
            tracing::debug!(
                "Coalesced {} {} into queued item {}",
                request.method,
                request.endpoint,
                updated.id
            );
            updated
        } else {
            while items.len() >= self.capacity {
                if let Some(evicted) = items.pop_front() {
                    tracing::warn!(
                        "Offline queue full ({}); dropping oldest mutation {} {} {}",
                        self.capacity,
                        evicted.id,
                        evicted.method(),
                        evicted.endpoint()
                    );
                }
            }
            let item = QueuedMutation::new(request);
            items.push_back(item.clone());
            item
        };

        self.persist(items).await?;
        tracing::debug!("Queued mutation {} ({} pending)", queued.id, items.len());
        Ok(queued)
    }

    /// Remove an item by id. Returns whether it was present.
    pub async fn remove_from_queue(&self, id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let before = state.items.len();
        state.items.retain(|item| item.id != id);
        if state.items.len() == before {
            return Ok(false);
        }
        self.persist(&state.items).await?;
        Ok(true)
    }

    pub async fn clear_queue(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.items.clear();
        self.persist(&state.items).await
    }

    pub async fn snapshot(&self) -> Vec<QueuedMutation> {
        self.state.lock().await.items.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.items.is_empty()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Replay queued mutations in enqueue order.
    ///
    /// Successful items are removed. Retryable failures stay queued with an
    /// incremented retry count. Permanent rejections (4xx other than 408/429)
    /// are dropped and reported.
    pub async fn process_queue<T: Transport>(
        &self,
        transport: &T,
        policy: DrainPolicy,
    ) -> Result<DrainReport> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Drain already in progress; skipping");
            return Ok(DrainReport::skipped());
        }
        let _guard = DrainGuard(&self.draining);

        let pending: Vec<String> = {
            let mut state = self.state.lock().await;
            state.in_flight = None;
            state.items.iter().map(|item| item.id.clone()).collect()
        };
        let mut report = DrainReport::default();
        if pending.is_empty() {
            return Ok(report);
        }

        tracing::info!("Replaying {} queued mutations", pending.len());
        let mut refreshed: Vec<QueryKey> = Vec::new();

        for id in pending {
            // Superseded since the drain started
            let Some(item) = self.begin_replay(&id).await else {
                continue;
            };
            let result = transport.send(&item.request).await;
            match result {
                Ok(_) => {
                    self.finish_replay(&item.id, ReplayOutcome::Remove).await?;
                    tracing::debug!("Synced item {} ({} {})", item.id, item.method(), item.endpoint());
                    refreshed.extend(invalidation_keys_for_endpoint(item.endpoint()));
                    report.synced.push(item.id);
                }
                Err(error) if !error.is_retryable() => {
                    tracing::warn!(
                        "Dropping item {} rejected by server: {}",
                        item.id,
                        error
                    );
                    self.finish_replay(&item.id, ReplayOutcome::Remove).await?;
                    report.rejected.push(failed_replay(item, error));
                }
                Err(error) => {
                    tracing::warn!("Failed to sync item {}: {}", item.id, error);
                    self.finish_replay(&item.id, ReplayOutcome::Retry).await?;
                    report.failed.push(failed_replay(item, error));
                    if policy == DrainPolicy::StopOnError {
                        break;
                    }
                }
            }
        }

        if let Some(cache) = &self.cache {
            let mut seen = HashSet::new();
            refreshed.retain(|key| seen.insert(key.clone()));
            cache.invalidate_many(&refreshed);
        }

        report.remaining = self.len().await;
        tracing::info!(
            "Drain finished: {} synced, {} failed, {} rejected, {} remaining",
            report.synced.len(),
            report.failed.len(),
            report.rejected.len(),
            report.remaining
        );
        Ok(report)
    }

    /// Flush the current state before shutdown.
    pub async fn teardown(&self) -> Result<()> {
        let state = self.state.lock().await;
        self.persist(&state.items).await?;
        tracing::debug!(
            "Offline queue persisted on teardown ({} pending)",
            state.items.len()
        );
        Ok(())
    }

    /// Mark `id` as in flight and return its current contents.
    async fn begin_replay(&self, id: &str) -> Option<QueuedMutation> {
        let mut state = self.state.lock().await;
        let item = state.items.iter().find(|item| item.id == id).cloned()?;
        state.in_flight = Some(item.id.clone());
        Some(item)
    }

    async fn finish_replay(&self, id: &str, outcome: ReplayOutcome) -> Result<()> {
        let mut state = self.state.lock().await;
        state.in_flight = None;
        match outcome {
            ReplayOutcome::Remove => state.items.retain(|item| item.id != id),
            ReplayOutcome::Retry => {
                if let Some(item) = state.items.iter_mut().find(|item| item.id == id) {
                    item.retry_count = item.retry_count.saturating_add(1);
                }
            }
        }
        self.persist(&state.items).await
    }

    async fn persist(&self, items: &VecDeque<QueuedMutation>) -> Result<()> {
        let serialized = serde_json::to_string(items)?;
        self.store.set_item(&self.storage_key, &serialized).await
    }
}

enum ReplayOutcome {
    Remove,
    Retry,
}

fn failed_replay(item: QueuedMutation, error: TransportError) -> FailedReplay {
    FailedReplay {
        method: item.method(),
        endpoint: item.request.endpoint,
        id: item.id,
        error,
    }
}

/// Fold `request` into the queue when it supersedes queued writes for the same record.
///
/// Returns the updated queued item when `request` was merged in place; `None`
/// means the caller must append it. The in-flight item is left alone: the
/// server may already hold its payload.
fn coalesce(
    items: &mut VecDeque<QueuedMutation>,
    in_flight: Option<&str>,
    request: &MutationRequest,
) -> Option<QueuedMutation> {
    let is_pending_write = |item: &QueuedMutation| {
        matches!(item.method(), HttpMethod::Put | HttpMethod::Patch)
            && item.request.targets_same_record(request)
    };
    let is_in_flight = |item: &QueuedMutation| in_flight == Some(item.id.as_str());

    match request.method {
        HttpMethod::Post => None,
        HttpMethod::Put | HttpMethod::Delete => {
            items.retain(|item| is_in_flight(item) || !is_pending_write(item));
            None
        }
        HttpMethod::Patch => {
            let existing = items.iter_mut().rev().find(|item| is_pending_write(item))?;
            if is_in_flight(existing) {
                return None;
            }
            merge_payload(&mut existing.request.payload, &request.payload);
            existing.retry_count = 0;
            Some(existing.clone())
        }
    }
}

fn merge_payload(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (field, value) in patch {
                target.insert(field.clone(), value.clone());
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryKeyValueStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    const KEY: &str = "offline-sync-queue";

    /// Records every call; endpoints listed in `failures` return that error.
    #[derive(Default)]
    struct RecordingTransport {
        calls: StdMutex<Vec<(HttpMethod, String, Value)>>,
        failures: HashMap<String, TransportError>,
    }

    impl RecordingTransport {
        fn failing(endpoint: &str, error: TransportError) -> Self {
            let mut failures = HashMap::new();
            failures.insert(endpoint.to_string(), error);
            Self {
                failures,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<(HttpMethod, String, Value)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Transport for RecordingTransport {
        async fn send(&self, request: &MutationRequest) -> std::result::Result<Value, TransportError> {
            self.calls.lock().unwrap().push((
                request.method,
                request.endpoint.clone(),
                request.payload.clone(),
            ));
            match self.failures.get(&request.endpoint) {
                Some(error) => Err(error.clone()),
                None => Ok(json!({ "success": true })),
            }
        }
    }

    /// Holds the first send until `release` is notified.
    #[derive(Default)]
    struct GatedTransport {
        sent: StdMutex<Vec<Value>>,
        started: Notify,
        release: Notify,
    }

    impl GatedTransport {
        fn sent(&self) -> Vec<Value> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Transport for GatedTransport {
        async fn send(&self, request: &MutationRequest) -> std::result::Result<Value, TransportError> {
            let first = {
                let mut sent = self.sent.lock().unwrap();
                sent.push(request.payload.clone());
                sent.len() == 1
            };
            if first {
                self.started.notify_one();
                self.release.notified().await;
            }
            Ok(Value::Null)
        }
    }

    fn network_error() -> TransportError {
        TransportError::Connectivity("Network error".to_string())
    }

    async fn queue_with(store: MemoryKeyValueStore) -> SyncQueue<MemoryKeyValueStore> {
        SyncQueue::init(store, KEY, 100).await.unwrap()
    }

    fn request(endpoint: &str, method: HttpMethod, payload: Value) -> MutationRequest {
        MutationRequest::new(endpoint, method, payload)
    }

    async fn persisted(store: &MemoryKeyValueStore) -> Vec<QueuedMutation> {
        let raw = store.get_item(KEY).await.unwrap().unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[tokio::test]
    async fn add_assigns_id_timestamp_and_persists() {
        let store = MemoryKeyValueStore::new();
        let queue = queue_with(store.clone()).await;

        let item = queue
            .add_to_queue(request("/api/test", HttpMethod::Post, json!({ "data": "test" })))
            .await
            .unwrap();

        assert!(!item.id.is_empty());
        assert!(item.timestamp > 0);
        assert_eq!(item.retry_count, 0);
        assert_eq!(persisted(&store).await, vec![item]);
    }

    #[tokio::test]
    async fn add_appends_in_order_with_unique_ids() {
        let queue = queue_with(MemoryKeyValueStore::new()).await;
        queue
            .add_to_queue(request("/api/first", HttpMethod::Post, json!({})))
            .await
            .unwrap();
        queue
            .add_to_queue(request("/api/first", HttpMethod::Post, json!({})))
            .await
            .unwrap();

        let items = queue.snapshot().await;
        assert_eq!(items.len(), 2);
        assert_ne!(items[0].id, items[1].id);
    }

    #[tokio::test]
    async fn init_restores_persisted_queue() {
        let store = MemoryKeyValueStore::new();
        {
            let queue = queue_with(store.clone()).await;
            queue
                .add_to_queue(request("/api/tasks", HttpMethod::Post, json!({ "title": "A" })))
                .await
                .unwrap();
            queue.teardown().await.unwrap();
        }

        let restored = queue_with(store).await;
        let items = restored.snapshot().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].endpoint(), "/api/tasks");
    }

    #[tokio::test]
    async fn init_discards_corrupt_state() {
        let store = MemoryKeyValueStore::new();
        store.set_item(KEY, "{not json").await.unwrap();

        let queue = queue_with(store).await;
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let queue = queue_with(MemoryKeyValueStore::new()).await;
        let first = queue
            .add_to_queue(request("/api/test1", HttpMethod::Post, json!({ "id": 1 })))
            .await
            .unwrap();
        queue
            .add_to_queue(request("/api/test2", HttpMethod::Post, json!({ "id": 2 })))
            .await
            .unwrap();

        assert!(queue.remove_from_queue(&first.id).await.unwrap());
        assert!(!queue.remove_from_queue("non-existent-id").await.unwrap());
        let items = queue.snapshot().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].request.payload, json!({ "id": 2 }));

        queue.clear_queue().await.unwrap();
        assert!(queue.is_empty().await);
        queue.clear_queue().await.unwrap();
    }

    #[tokio::test]
    async fn put_replaces_queued_write_for_same_record() {
        let queue = queue_with(MemoryKeyValueStore::new()).await;
        queue
            .add_to_queue(request("/api/tasks/1", HttpMethod::Patch, json!({ "status": "doing" })))
            .await
            .unwrap();
        queue
            .add_to_queue(request("/api/tasks/2", HttpMethod::Put, json!({ "title": "Other" })))
            .await
            .unwrap();
        queue
            .add_to_queue(request("/api/tasks/1", HttpMethod::Put, json!({ "title": "Final" })))
            .await
            .unwrap();

        let items = queue.snapshot().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].endpoint(), "/api/tasks/2");
        assert_eq!(items[1].request.payload, json!({ "title": "Final" }));
    }

    #[tokio::test]
    async fn patch_merges_into_queued_write_in_place() {
        let queue = queue_with(MemoryKeyValueStore::new()).await;
        let original = queue
            .add_to_queue(request(
                "/api/tasks/1",
                HttpMethod::Put,
                json!({ "title": "Draft", "status": "todo" }),
            ))
            .await
            .unwrap();
        queue
            .add_to_queue(request("/api/habits", HttpMethod::Post, json!({ "name": "Run" })))
            .await
            .unwrap();

        let merged = queue
            .add_to_queue(request("/api/tasks/1", HttpMethod::Patch, json!({ "status": "done" })))
            .await
            .unwrap();

        assert_eq!(merged.id, original.id);
        let items = queue.snapshot().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].method(), HttpMethod::Put);
        assert_eq!(
            items[0].request.payload,
            json!({ "title": "Draft", "status": "done" })
        );
    }

    #[tokio::test]
    async fn delete_drops_pending_writes_and_posts_are_never_coalesced() {
        let queue = queue_with(MemoryKeyValueStore::new()).await;
        queue
            .add_to_queue(request("/api/tasks", HttpMethod::Post, json!({ "title": "A" })))
            .await
            .unwrap();
        queue
            .add_to_queue(request("/api/tasks", HttpMethod::Post, json!({ "title": "A" })))
            .await
            .unwrap();
        queue
            .add_to_queue(request("/api/tasks/9", HttpMethod::Put, json!({ "title": "B" })))
            .await
            .unwrap();
        queue
            .add_to_queue(request("/api/tasks/9", HttpMethod::Delete, Value::Null))
            .await
            .unwrap();

        let methods: Vec<HttpMethod> = queue
            .snapshot()
            .await
            .iter()
            .map(QueuedMutation::method)
            .collect();
        assert_eq!(
            methods,
            vec![HttpMethod::Post, HttpMethod::Post, HttpMethod::Delete]
        );
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let queue = SyncQueue::init(MemoryKeyValueStore::new(), KEY, 2)
            .await
            .unwrap();
        for index in 0..3 {
            queue
                .add_to_queue(request("/api/logs", HttpMethod::Post, json!({ "n": index })))
                .await
                .unwrap();
        }

        let payloads: Vec<Value> = queue
            .snapshot()
            .await
            .into_iter()
            .map(|item| item.request.payload)
            .collect();
        assert_eq!(payloads, vec![json!({ "n": 1 }), json!({ "n": 2 })]);
    }

    #[tokio::test]
    async fn process_empty_queue_sends_nothing() {
        let queue = queue_with(MemoryKeyValueStore::new()).await;
        let transport = RecordingTransport::default();

        let report = queue
            .process_queue(&transport, DrainPolicy::default())
            .await
            .unwrap();

        assert_eq!(report, DrainReport::default());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn process_replays_in_order_and_empties_store() {
        let store = MemoryKeyValueStore::new();
        let queue = queue_with(store.clone()).await;
        queue
            .add_to_queue(request("/api/first", HttpMethod::Post, json!({ "name": "test" })))
            .await
            .unwrap();
        queue
            .add_to_queue(request("/api/second", HttpMethod::Put, json!({ "name": "updated" })))
            .await
            .unwrap();
        queue
            .add_to_queue(request("/api/third", HttpMethod::Delete, Value::Null))
            .await
            .unwrap();
        let transport = RecordingTransport::default();

        let report = queue
            .process_queue(&transport, DrainPolicy::default())
            .await
            .unwrap();

        let calls = transport.calls();
        assert_eq!(
            calls
                .iter()
                .map(|(method, endpoint, _)| (*method, endpoint.as_str()))
                .collect::<Vec<_>>(),
            vec![
                (HttpMethod::Post, "/api/first"),
                (HttpMethod::Put, "/api/second"),
                (HttpMethod::Delete, "/api/third"),
            ]
        );
        assert_eq!(calls[0].2, json!({ "name": "test" }));
        assert_eq!(report.synced.len(), 3);
        assert_eq!(report.remaining, 0);
        assert!(persisted(&store).await.is_empty());
    }

    #[tokio::test]
    async fn failed_items_stay_queued_and_processing_continues() {
        let store = MemoryKeyValueStore::new();
        let queue = queue_with(store.clone()).await;
        queue
            .add_to_queue(request("/api/first", HttpMethod::Post, json!({})))
            .await
            .unwrap();
        queue
            .add_to_queue(request("/api/second", HttpMethod::Put, json!({})))
            .await
            .unwrap();
        queue
            .add_to_queue(request("/api/third", HttpMethod::Delete, Value::Null))
            .await
            .unwrap();
        let transport = RecordingTransport::failing("/api/second", network_error());

        let report = queue
            .process_queue(&transport, DrainPolicy::ContinueOnError)
            .await
            .unwrap();

        assert_eq!(transport.calls().len(), 3);
        assert_eq!(report.synced.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].endpoint, "/api/second");
        let remaining = persisted(&store).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].endpoint(), "/api/second");
        assert_eq!(remaining[0].retry_count, 1);
    }

    #[tokio::test]
    async fn stop_on_error_leaves_later_items_untouched() {
        let queue = queue_with(MemoryKeyValueStore::new()).await;
        queue
            .add_to_queue(request("/api/fail", HttpMethod::Post, json!({})))
            .await
            .unwrap();
        queue
            .add_to_queue(request("/api/later", HttpMethod::Post, json!({})))
            .await
            .unwrap();
        let transport = RecordingTransport::failing("/api/fail", network_error());

        let report = queue
            .process_queue(&transport, DrainPolicy::StopOnError)
            .await
            .unwrap();

        assert_eq!(transport.calls().len(), 1);
        assert_eq!(report.attempted(), 1);
        assert_eq!(report.remaining, 2);
    }

    #[tokio::test]
    async fn permanent_rejections_are_dropped() {
        let queue = queue_with(MemoryKeyValueStore::new()).await;
        queue
            .add_to_queue(request("/api/tasks", HttpMethod::Post, json!({ "title": "" })))
            .await
            .unwrap();
        let transport = RecordingTransport::failing(
            "/api/tasks",
            TransportError::Status {
                status: 400,
                message: "Validation Failed".to_string(),
            },
        );

        let report = queue
            .process_queue(&transport, DrainPolicy::default())
            .await
            .unwrap();

        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].error.status(), Some(400));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn successful_replay_invalidates_cache() {
        let cache = QueryCache::new();
        cache.set(QueryKey::from(["tasks"]), json!([]));
        cache.set(QueryKey::from(["habits"]), json!([]));
        let queue = queue_with(MemoryKeyValueStore::new())
            .await
            .with_cache(cache.clone());
        queue
            .add_to_queue(request("/api/tasks/3", HttpMethod::Put, json!({ "title": "x" })))
            .await
            .unwrap();

        queue
            .process_queue(&RecordingTransport::default(), DrainPolicy::default())
            .await
            .unwrap();

        assert!(cache.is_stale(&QueryKey::from(["tasks"])));
        assert!(!cache.is_stale(&QueryKey::from(["habits"])));
    }

    #[tokio::test]
    async fn overlapping_drain_is_skipped() {
        let queue = queue_with(MemoryKeyValueStore::new()).await;
        queue
            .add_to_queue(request("/api/tasks", HttpMethod::Post, json!({})))
            .await
            .unwrap();

        queue.draining.store(true, Ordering::Release);
        let transport = RecordingTransport::default();
        let report = queue
            .process_queue(&transport, DrainPolicy::default())
            .await
            .unwrap();
        assert!(report.skipped);
        assert!(transport.calls().is_empty());

        queue.draining.store(false, Ordering::Release);
        let report = queue
            .process_queue(&transport, DrainPolicy::default())
            .await
            .unwrap();
        assert_eq!(report.synced.len(), 1);
        assert!(!queue.is_draining());
    }

    #[tokio::test]
    async fn delete_drops_write_whose_payload_carries_an_id() {
        let queue = queue_with(MemoryKeyValueStore::new()).await;
        queue
            .add_to_queue(request(
                "/api/tasks/1",
                HttpMethod::Put,
                json!({ "id": "1", "title": "A" }),
            ))
            .await
            .unwrap();
        queue
            .add_to_queue(request("/api/tasks/2", HttpMethod::Put, json!({ "id": "2" })))
            .await
            .unwrap();
        queue
            .add_to_queue(request("/api/tasks/1", HttpMethod::Delete, Value::Null))
            .await
            .unwrap();

        let items = queue.snapshot().await;
        let summary: Vec<(HttpMethod, &str)> = items
            .iter()
            .map(|item| (item.method(), item.endpoint()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (HttpMethod::Put, "/api/tasks/2"),
                (HttpMethod::Delete, "/api/tasks/1"),
            ]
        );
    }

    #[tokio::test]
    async fn patch_without_id_merges_into_put_with_id() {
        let queue = queue_with(MemoryKeyValueStore::new()).await;
        queue
            .add_to_queue(request(
                "/api/tasks/1",
                HttpMethod::Put,
                json!({ "id": "1", "title": "A" }),
            ))
            .await
            .unwrap();
        queue
            .add_to_queue(request("/api/tasks/1", HttpMethod::Patch, json!({ "status": "done" })))
            .await
            .unwrap();

        let items = queue.snapshot().await;
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].request.payload,
            json!({ "id": "1", "title": "A", "status": "done" })
        );
    }

    #[tokio::test]
    async fn patch_added_while_its_target_is_sending_is_kept() {
        let store = MemoryKeyValueStore::new();
        let queue = queue_with(store.clone()).await;
        queue
            .add_to_queue(request("/api/tasks/1", HttpMethod::Put, json!({ "title": "A" })))
            .await
            .unwrap();
        let transport = GatedTransport::default();

        let drain = queue.process_queue(&transport, DrainPolicy::default());
        let edit = async {
            transport.started.notified().await;
            assert!(queue.is_draining());
            queue
                .add_to_queue(request("/api/tasks/1", HttpMethod::Patch, json!({ "status": "done" })))
                .await
                .unwrap();
            transport.release.notify_one();
        };
        let (report, ()) = tokio::join!(drain, edit);

        let report = report.unwrap();
        assert_eq!(report.synced.len(), 1);
        assert_eq!(report.remaining, 1);
        assert_eq!(transport.sent(), vec![json!({ "title": "A" })]);

        let pending = persisted(&store).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].method(), HttpMethod::Patch);
        assert_eq!(pending[0].request.payload, json!({ "status": "done" }));

        queue
            .process_queue(&transport, DrainPolicy::default())
            .await
            .unwrap();
        assert_eq!(
            transport.sent(),
            vec![json!({ "title": "A" }), json!({ "status": "done" })]
        );
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn drain_sends_items_as_updated_during_the_drain() {
        let queue = queue_with(MemoryKeyValueStore::new()).await;
        queue
            .add_to_queue(request("/api/tasks/1", HttpMethod::Put, json!({ "title": "A" })))
            .await
            .unwrap();
        queue
            .add_to_queue(request("/api/tasks/2", HttpMethod::Put, json!({ "title": "B" })))
            .await
            .unwrap();
        queue
            .add_to_queue(request("/api/tasks/3", HttpMethod::Put, json!({ "title": "C" })))
            .await
            .unwrap();
        let transport = GatedTransport::default();

        let drain = queue.process_queue(&transport, DrainPolicy::default());
        let edit = async {
            transport.started.notified().await;
            queue
                .add_to_queue(request("/api/tasks/2", HttpMethod::Patch, json!({ "done": true })))
                .await
                .unwrap();
            queue
                .add_to_queue(request("/api/tasks/3", HttpMethod::Delete, Value::Null))
                .await
                .unwrap();
            transport.release.notify_one();
        };
        let (report, ()) = tokio::join!(drain, edit);

        let report = report.unwrap();
        assert_eq!(report.synced.len(), 2);
        assert_eq!(
            transport.sent(),
            vec![json!({ "title": "A" }), json!({ "title": "B", "done": true })]
        );
        let items = queue.snapshot().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].method(), HttpMethod::Delete);
        assert_eq!(items[0].endpoint(), "/api/tasks/3");
    }
}
