//! Client-side query cache and invalidation.
//!
//! Cached reads are keyed by a [`QueryKey`], an ordered list of segments such
//! as `["habits", "logs"]`. Invalidating a key marks every entry it prefixes
//! as stale and broadcasts the key so readers know to re-fetch.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

const INVALIDATION_CHANNEL_CAPACITY: usize = 256;

/// Ordered cache key segments
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Whether `self` is a prefix of (or equal to) `other`.
    pub fn matches(&self, other: &Self) -> bool {
        other.0.starts_with(&self.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

impl<const N: usize> From<[&str; N]> for QueryKey {
    fn from(segments: [&str; N]) -> Self {
        Self::new(segments)
    }
}

/// A cached value and whether it must be re-fetched before use
#[derive(Debug, Clone, PartialEq)]
pub struct CachedQuery {
    pub value: Value,
    /// Unix ms when the value was stored
    pub fetched_at: i64,
    pub is_stale: bool,
}

/// Shared cache of query results
#[derive(Clone)]
pub struct QueryCache {
    entries: Arc<RwLock<HashMap<QueryKey, CachedQuery>>>,
    invalidations: broadcast::Sender<QueryKey>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        let (invalidations, _) = broadcast::channel(INVALIDATION_CHANNEL_CAPACITY);
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            invalidations,
        }
    }

    /// Store a fresh value for `key`.
    pub fn set(&self, key: QueryKey, value: Value) {
        let entry = CachedQuery {
            value,
            fetched_at: crate::util::unix_millis_now(),
            is_stale: false,
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, entry);
    }

    pub fn get(&self, key: &QueryKey) -> Option<CachedQuery> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// True when `key` is missing or has been invalidated.
    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.get(key).map_or(true, |entry| entry.is_stale)
    }

    /// Mark every entry prefixed by `key` stale and notify subscribers.
    ///
    /// Returns how many cached entries were affected.
    pub fn invalidate(&self, key: &QueryKey) -> usize {
        let marked = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            let mut marked = 0;
            for (entry_key, entry) in entries.iter_mut() {
                if key.matches(entry_key) {
                    entry.is_stale = true;
                    marked += 1;
                }
            }
            marked
        };

        tracing::debug!("Invalidated {} cached queries for {}", marked, key);
        // No subscribers is fine; the stale flag is enough for later reads.
        let _ = self.invalidations.send(key.clone());
        marked
    }

    /// Invalidate each key in turn.
    pub fn invalidate_many<'a>(&self, keys: impl IntoIterator<Item = &'a QueryKey>) -> usize {
        keys.into_iter().map(|key| self.invalidate(key)).sum()
    }

    /// Mark the whole cache stale.
    pub fn invalidate_all(&self) -> usize {
        self.invalidate(&QueryKey::new(Vec::<String>::new()))
    }

    /// Receive every invalidated key from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<QueryKey> {
        self.invalidations.subscribe()
    }
}

/// Cache keys refreshed after a successful write to `endpoint`.
///
/// `/api/tasks/12` maps to `["tasks"]`; finance writes also refresh the
/// summary; unknown resources map to their own first path segment.
pub fn invalidation_keys_for_endpoint(endpoint: &str) -> Vec<QueryKey> {
    let path = endpoint.split(['?', '#']).next().unwrap_or_default();
    let mut segments = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .skip_while(|segment| *segment == "api");

    let Some(resource) = segments.next() else {
        return Vec::new();
    };

    match resource {
        "finances" | "finance" | "transactions" => vec![
            QueryKey::from(["transactions"]),
            QueryKey::from(["finance-summary"]),
            QueryKey::from(["finance"]),
        ],
        "journal" | "journal-entries" | "journal_entries" => vec![QueryKey::from(["journal"])],
        "ai" | "ai-logs" | "ai_logs" => vec![QueryKey::from(["ai-logs"])],
        "habit-logs" | "habit_logs" => vec![QueryKey::from(["habits"])],
        "task-habit-links" | "task_habit_links" => {
            vec![QueryKey::from(["tasks"]), QueryKey::from(["habits"])]
        }
        other => vec![QueryKey::new([other])],
    }
}
