//! Scan output and stored scan records.

pub mod output;
pub mod record;

pub use output::{ScanOutput, Verdict};
pub use record::ScanRecord;
