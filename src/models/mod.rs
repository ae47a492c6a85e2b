//! Core data models for the dataset ingest service.
//!
//! Persistent entities (datasets, buckets, stored objects) map to database
//! tables via `sqlx::FromRow`; everything serializes as JSON via `serde`.

pub mod bucket;
pub mod dataset;
pub mod object;
pub mod preview;
pub mod schema;
pub mod upload;
