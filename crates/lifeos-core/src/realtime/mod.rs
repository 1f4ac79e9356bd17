//! Realtime invalidation over server-sent events.

mod channel;
mod sse;
mod topic;

pub use channel::{ChannelState, RealtimeChannel, RealtimeHandle};
pub use sse::{SseEvent, SseParser};
pub use topic::RealtimeTopic;
