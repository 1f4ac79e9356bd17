//! Offline sync: the persisted mutation queue, its transport, conflict
//! resolution and the background drain loop.

mod conflict;
mod connectivity;
mod manager;
mod offline_mutation;
mod queue;
mod transport;

pub use conflict::{
    has_conflict, resolve_with_lww, resolve_with_merge, ConflictStrategy, Resolution,
};
pub use connectivity::Connectivity;
pub use manager::{OfflineSyncManager, SyncManagerHandle, SyncNotification};
pub use offline_mutation::{MutationOutcome, OfflineMutation};
pub use queue::{DrainPolicy, DrainReport, FailedReplay, SyncQueue};
pub use transport::{HttpTransport, Transport, TransportError};
