//! Data models for the sync engine

mod entity;
mod mutation;

pub use entity::{parse_timestamp_millis, SyncableEntity};
pub use mutation::{HttpMethod, MutationRequest, QueuedMutation};
