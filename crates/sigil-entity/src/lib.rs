//! # sigil-entity
//!
//! Domain models for Sigil Bot. Every struct in this crate is either a
//! value carried through the queue (scan jobs, dead-letter entries) or a
//! value exchanged with an external collaborator (scan output, stored scan
//! records). All entities derive `Debug`, `Clone`, `Serialize`, and
//! `Deserialize`.

pub mod job;
pub mod scan;
