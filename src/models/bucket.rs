//! Represents a logical bucket: a top-level container for stored files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A storage bucket as recorded by the object store.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    pub id: Uuid,

    /// Globally unique bucket name (must conform to DNS naming rules).
    pub name: String,

    /// Whether anonymous readers may fetch objects through public links.
    pub public: bool,

    /// Attached access policy, serialized as JSON. `None` until one is attached.
    pub policy: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// Role a bucket plays in the ingest pipeline.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BucketTier {
    /// User-facing storage that uploads land in.
    Hot,
    Secure,
    /// Archival storage.
    Cold,
}

/// Declaration of a bucket the pipeline expects to exist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketSpec {
    pub name: String,
    pub tier: BucketTier,
    pub public: bool,
    /// Provisioning fails only when a required bucket cannot be created.
    pub required: bool,
}

impl BucketSpec {
    pub fn new(name: impl Into<String>, tier: BucketTier, required: bool) -> Self {
        Self {
            name: name.into(),
            tier,
            public: true,
            required,
        }
    }
}

/// Name of the bucket uploads are written to.
pub const HOT_BUCKET: &str = "datasets";
pub const SECURE_BUCKET: &str = "datasets-secure";
pub const COLD_BUCKET: &str = "datasets-archive";

/// The fixed set of buckets every deployment needs.
pub fn required_buckets() -> Vec<BucketSpec> {
    vec![
        BucketSpec::new(HOT_BUCKET, BucketTier::Hot, true),
        BucketSpec::new(SECURE_BUCKET, BucketTier::Secure, false),
        BucketSpec::new(COLD_BUCKET, BucketTier::Cold, false),
    ]
}

/// Access rules attached to a bucket after creation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct BucketPolicy {
    /// Anyone holding a link may read.
    pub public_read: bool,
    /// Only authenticated principals may write.
    pub authenticated_write: bool,
}

impl Default for BucketPolicy {
    fn default() -> Self {
        Self {
            public_read: true,
            authenticated_write: true,
        }
    }
}
