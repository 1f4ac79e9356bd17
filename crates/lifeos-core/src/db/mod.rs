//! Local persistence for client state

mod connection;
mod migrations;
mod storage;

pub use connection::Database;
pub use storage::{KeyValueStore, LibSqlKeyValueStore, MemoryKeyValueStore};
