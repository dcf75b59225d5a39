//! # sigil-core
//!
//! Core crate for Sigil Bot. Contains the configuration schema and the
//! unified error system shared by the queue engine, the watchers, and the
//! scanner workers.
//!
//! This crate has **no** internal dependencies on other Sigil crates.

pub mod config;
pub mod error;
pub mod result;

pub use error::AppError;
pub use result::AppResult;
