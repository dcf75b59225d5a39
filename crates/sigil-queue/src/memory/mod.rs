//! In-memory queue backend.

pub mod store;

pub use store::MemoryQueueStore;
