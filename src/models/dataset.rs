//! Represents a dataset: the persisted record describing one uploaded file.

use crate::models::schema::ColumnSchema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Storage backend identifier written on every record produced by the local store.
pub const LOCAL_BACKEND: &str = "local";

/// A dataset row in the metadata store.
///
/// A dataset only exists once its payload has been stored; the record is the
/// last thing the ingest pipeline writes.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct Dataset {
    /// Identifier generated at creation.
    pub id: Uuid,

    /// Principal that uploaded the file.
    pub owner_id: Uuid,

    /// User-entered display name.
    pub name: String,

    pub description: Option<String>,

    /// File name as selected by the user.
    pub file_name: String,

    pub size_bytes: i64,

    /// Number of data rows as counted during inference.
    pub row_count: i64,

    /// Inferred schema. Empty when inference failed or was skipped.
    #[sqlx(json)]
    pub schema: ColumnSchema,

    /// Bucket-relative key of the stored payload.
    pub storage_path: String,

    /// Public URL of the stored payload.
    pub storage_url: String,

    /// Which object store holds the payload (e.g. "local").
    pub storage_backend: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
