//! Read models handed out by the storage engine.
//!
//! None of these are persisted. Every value is rebuilt from filesystem state
//! (plus the checksum index for entity tags) each time it is requested, and
//! serializes naturally as JSON via `serde`.

pub mod bucket;
pub mod object;
