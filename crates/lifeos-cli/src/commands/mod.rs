pub mod common;
pub mod completions;
pub mod conflict;
pub mod daemon;
pub mod queue;
pub mod send;
pub mod watch;
