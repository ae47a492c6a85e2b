//! A small decoded sample of dataset rows for fast rendering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One decoded row, keyed by column name.
pub type PreviewRow = Map<String, Value>;

/// Maximum number of rows kept in any preview.
pub const MAX_PREVIEW_ROWS: usize = 50;

/// A fresh cache key for one session's preview.
pub fn new_preview_handle() -> String {
    format!("preview_{}", Uuid::new_v4().simple())
}

/// Where the rows of a preview came from.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PreviewOrigin {
    /// Decoded from the in-memory file before the upload finished.
    Local,
    /// Re-read from the stored object.
    Stored,
    /// Generated because no real sample could be produced. Not real data.
    Synthetic,
}

impl PreviewOrigin {
    pub fn is_synthetic(&self) -> bool {
        matches!(self, PreviewOrigin::Synthetic)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PreviewSample {
    pub handle: String,
    pub origin: PreviewOrigin,
    pub rows: Vec<PreviewRow>,
    pub created_at: DateTime<Utc>,
}
