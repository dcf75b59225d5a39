//! Redis queue backend.

pub mod client;
pub mod scripts;
pub mod store;

pub use client::RedisClient;
pub use store::RedisQueueStore;
