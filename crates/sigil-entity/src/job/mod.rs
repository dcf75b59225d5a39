//! Scan job domain entities.

pub mod dead_letter;
pub mod lane;
pub mod metadata;
pub mod model;

pub use dead_letter::DeadLetterEntry;
pub use lane::{Lane, priority};
pub use metadata::JobMetadata;
pub use model::ScanJob;
