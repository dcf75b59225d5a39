//! # sigil-queue
//!
//! Durable work queue for Sigil Bot: three priority lanes, an in-flight
//! dedup set, a processing set, delayed retries, a dead-letter list, and
//! watcher checkpoints. Two backends share one contract:
//!
//! - **redis**: every operation is a Lua script on a shared Redis
//! - **memory**: one lock around in-process structures, for tests and
//!   single-process runs
//!
//! The backend is selected at runtime based on configuration.

pub mod backoff;
pub mod engine;
pub mod keys;
#[cfg(feature = "memory")]
pub mod memory;
pub mod provider;
#[cfg(feature = "redis-backend")]
pub mod redis;
pub mod store;

pub use backoff::RetryPolicy;
pub use engine::JobQueue;
pub use provider::connect;
pub use store::{ProcessingEntry, QueueDepth, QueueStore};
