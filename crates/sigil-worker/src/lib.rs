//! Registry watchers, scanner workers, and the rescan scheduler for
//! Sigil Bot.
//!
//! This crate provides:
//! - The [`Watcher`] contract, its polling loop, and watchers for npm,
//!   PyPI, ClawHub, GitHub, and skills.sh
//! - A job executor that runs one scan job through download, scan, store,
//!   and publish, and a worker pool that resolves outcomes on the queue
//! - A rescan scheduler that feeds stale verdicts back into the queue
//! - Collaborator contracts plus default command-line and file adapters

pub mod adapters;
pub mod collaborators;
mod encoding;
pub mod executor;
pub mod filters;
pub mod rescan;
pub mod runner;
pub mod watcher;
pub mod watchers;

pub use collaborators::Collaborators;
pub use executor::{JobExecutionError, JobExecutor, WorkerState};
pub use rescan::RescanScheduler;
pub use runner::{WorkerPool, WorkerRunner};
pub use watcher::{CheckpointStore, PollStats, Watcher, WatcherRunner};
