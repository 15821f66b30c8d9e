//! Filesystem-backed storage engine for an S3-compatible object store.
//!
//! Buckets are top-level directories under a storage root and object keys map
//! onto nested directories plus a terminal file. The engine lives in
//! [`services`]; [`handlers`] and [`routes`] expose it over HTTP.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
