//! Persisted interception state

mod store;

pub use store::{JsonFileStore, MemoryStore, StateStore, DEFAULT_STATE_PATH};
