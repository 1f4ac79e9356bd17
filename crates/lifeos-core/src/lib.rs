//! lifeos-core - Offline sync engine for the LifeOS API
//!
//! This crate holds the persisted mutation queue, the conflict resolver, the
//! offline-aware mutation wrapper, the background drain loop and the realtime
//! invalidation channel used by every LifeOS client.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod realtime;
pub mod state;
pub mod sync;
pub mod util;

pub use cache::{QueryCache, QueryKey};
pub use config::SyncClientConfig;
pub use error::{Error, Result};
pub use models::{HttpMethod, MutationRequest, QueuedMutation, SyncableEntity};
pub use realtime::{ChannelState, RealtimeChannel, RealtimeHandle, RealtimeTopic};
pub use state::SyncState;
pub use sync::{
    Connectivity, DrainPolicy, DrainReport, HttpTransport, MutationOutcome, OfflineMutation,
    OfflineSyncManager, SyncQueue, Transport, TransportError,
};
