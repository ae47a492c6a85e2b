//! src/services/object_store.rs
//!
//! The object-store capability the ingest pipeline writes file payloads to,
//! and `LocalObjectStore`, a backend keeping bucket/object metadata in SQLite
//! and payloads on disk sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`.

use crate::models::{
    bucket::{Bucket, BucketPolicy},
    object::StoredObject,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut, stream};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("object `{key}` already exists in bucket `{bucket}`")]
    ObjectAlreadyExists { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("payload of {size} bytes exceeds the {limit} byte object limit")]
    PayloadTooLarge { size: u64, limit: u64 },
    #[error("object store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, ObjectStoreError>;

/// Options for a single payload write.
#[derive(Clone, Debug, Default)]
pub struct UploadOptions {
    /// Overwrite an existing object at the same key instead of failing.
    pub upsert: bool,
    pub content_type: Option<String>,
}

/// Capability-based object store interface.
///
/// Implementations may be partially provisioned at startup; callers go through
/// the bucket provisioner before relying on any bucket existing.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Identifier recorded on datasets whose payload lives in this store.
    fn backend(&self) -> &'static str;

    async fn list_buckets(&self) -> StoreResult<Vec<Bucket>>;

    async fn create_bucket(&self, name: &str, public: bool) -> StoreResult<Bucket>;

    async fn attach_policy(&self, bucket: &str, policy: &BucketPolicy) -> StoreResult<()>;

    /// Write a payload and return its public URL.
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        options: &UploadOptions,
    ) -> StoreResult<String>;

    async fn download(&self, bucket: &str, key: &str) -> StoreResult<Bytes>;

    /// Remove objects, returning how many existed.
    async fn remove(&self, bucket: &str, keys: &[String]) -> StoreResult<usize>;
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
/// Payloads are streamed to disk in pieces of this size.
const WRITE_CHUNK_SIZE: usize = 1024 * 1024;

/// Removes a half-written temp file unless disarmed after the final rename.
struct TempFileGuard {
    path: Option<PathBuf>,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn disarm(&mut self) {
        self.path = None;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != ErrorKind::NotFound {
                    debug!(path = %path.display(), error = %err, "could not remove temp file");
                }
            }
        }
    }
}

/// Object store backed by a SQLite pool for metadata and a directory tree for payloads.
#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// Prefix for public links, e.g. `http://localhost:3000/storage`.
    public_base_url: String,

    max_object_bytes: Option<u64>,
}

impl LocalObjectStore {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            max_object_bytes: None,
        }
    }

    /// Reject payloads larger than `limit` bytes.
    pub fn with_max_object_bytes(mut self, limit: u64) -> Self {
        self.max_object_bytes = Some(limit);
        self
    }

    pub fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, bucket, key)
    }

    /// Rejects keys that are empty, absolute, traverse upwards, or carry
    /// control characters.
    fn ensure_key_safe(&self, key: &str) -> StoreResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(ObjectStoreError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(ObjectStoreError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(ObjectStoreError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// Enforces S3-like naming rules:
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots or dot-hyphen patterns
    /// - cannot look like an IPv4 address
    fn ensure_bucket_name_safe(&self, name: &str) -> StoreResult<()> {
        let invalid = |reason: &str| ObjectStoreError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if name.len() < BUCKET_NAME_MIN_LEN || name.len() > BUCKET_NAME_MAX_LEN {
            return Err(invalid("must be between 3 and 63 characters"));
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }
        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }
        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return Err(invalid(
                "cannot contain consecutive dots or dot-hyphen combinations",
            ));
        }
        if is_ipv4_like(name) {
            return Err(invalid("must not be formatted like an IP address"));
        }
        Ok(())
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Two-level shard directories from MD5(bucket/key), keeping per-directory
    /// file counts small.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_bucket(&self, bucket: &str) -> StoreResult<Bucket> {
        self.ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<_, Bucket>(
            "SELECT id, name, public, policy, created_at FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => ObjectStoreError::BucketNotFound(bucket.to_string()),
            other => ObjectStoreError::Sqlx(other),
        })
    }

    async fn fetch_object(&self, bucket: &Bucket, key: &str) -> StoreResult<Option<StoredObject>> {
        let object = sqlx::query_as::<_, StoredObject>(
            "SELECT id, bucket_id, key, content_type, size_bytes, etag, last_modified
             FROM objects WHERE key = ? AND bucket_id = ?",
        )
        .bind(key)
        .bind(bucket.id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(object)
    }

    /// Stream a payload to a temp file beside `file_path`, fsync it, then
    /// rename into place. Returns size and MD5 hex digest.
    async fn write_payload<S>(&self, file_path: &Path, stream: S) -> StoreResult<(i64, String)>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            ObjectStoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        // Also covers the future being dropped mid-write.
        let mut guard = TempFileGuard::new(tmp_path.clone());

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let written = match chunk_res {
                Ok(chunk) => {
                    size_bytes += chunk.len() as i64;
                    digest.consume(&chunk);
                    file.write_all(&chunk).await
                }
                Err(err) => Err(err),
            };
            written?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, file_path).await {
            if err.kind() != ErrorKind::AlreadyExists {
                return Err(ObjectStoreError::Io(err));
            }
            fs::remove_file(file_path).await?;
            fs::rename(&tmp_path, file_path).await?;
        }
        guard.disarm();

        Ok((size_bytes, format!("{:x}", digest.compute())))
    }

    /// Open a stored payload for streaming out.
    pub async fn get_object_reader(
        &self,
        bucket: &str,
        key: &str,
    ) -> StoreResult<(StoredObject, File)> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let not_found = || ObjectStoreError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        };
        if !bucket_rec.public {
            return Err(ObjectStoreError::AccessDenied(format!(
                "bucket `{}` is not publicly readable",
                bucket
            )));
        }
        let object = self.fetch_object(&bucket_rec, key).await?.ok_or_else(not_found)?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                not_found()
            } else {
                ObjectStoreError::Io(err)
            }
        })?;

        Ok((object, file))
    }

    /// Remove empty directories from `start` up to (not including) `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn backend(&self) -> &'static str {
        crate::models::dataset::LOCAL_BACKEND
    }

    async fn list_buckets(&self) -> StoreResult<Vec<Bucket>> {
        let buckets = sqlx::query_as::<_, Bucket>(
            "SELECT id, name, public, policy, created_at FROM buckets ORDER BY name ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(buckets)
    }

    /// Insert the bucket row and create its directory. A name conflict yields
    /// `BucketAlreadyExists`.
    async fn create_bucket(&self, name: &str, public: bool) -> StoreResult<Bucket> {
        self.ensure_bucket_name_safe(name)?;
        fs::create_dir_all(self.bucket_root(name)).await?;

        let bucket = Bucket {
            id: Uuid::new_v4(),
            name: name.to_string(),
            public,
            policy: None,
            created_at: Utc::now(),
        };

        match sqlx::query(
            "INSERT INTO buckets (id, name, public, policy, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(bucket.id)
        .bind(&bucket.name)
        .bind(bucket.public)
        .bind(&bucket.policy)
        .bind(bucket.created_at)
        .execute(&*self.db)
        .await
        {
            Ok(_) => Ok(bucket),
            Err(err) if is_unique_violation(&err) => {
                Err(ObjectStoreError::BucketAlreadyExists(name.to_string()))
            }
            Err(err) => Err(ObjectStoreError::Sqlx(err)),
        }
    }

    async fn attach_policy(&self, bucket: &str, policy: &BucketPolicy) -> StoreResult<()> {
        self.ensure_bucket_name_safe(bucket)?;
        let encoded = serde_json::to_string(policy)
            .map_err(|err| ObjectStoreError::Io(io::Error::new(ErrorKind::InvalidData, err)))?;
        let result = sqlx::query("UPDATE buckets SET policy = ?, public = ? WHERE name = ?")
            .bind(encoded)
            .bind(policy.public_read)
            .bind(bucket)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ObjectStoreError::BucketNotFound(bucket.to_string()));
        }
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        options: &UploadOptions,
    ) -> StoreResult<String> {
        self.ensure_key_safe(key)?;
        if let Some(limit) = self.max_object_bytes {
            let size = bytes.len() as u64;
            if size > limit {
                return Err(ObjectStoreError::PayloadTooLarge { size, limit });
            }
        }
        let bucket_rec = self.fetch_bucket(bucket).await?;
        if !options.upsert && self.fetch_object(&bucket_rec, key).await?.is_some() {
            return Err(ObjectStoreError::ObjectAlreadyExists {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let chunks: Vec<io::Result<Bytes>> = (0..bytes.len())
            .step_by(WRITE_CHUNK_SIZE)
            .map(|start| Ok(bytes.slice(start..(start + WRITE_CHUNK_SIZE).min(bytes.len()))))
            .collect();
        let file_path = self.object_path(&bucket_rec.name, key);
        let (size_bytes, etag) = self.write_payload(&file_path, stream::iter(chunks)).await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO objects (id, bucket_id, key, content_type, size_bytes, etag, last_modified)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket_rec.id)
        .bind(key)
        .bind(options.content_type.clone())
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .execute(&*self.db)
        .await;

        match inserted {
            Ok(_) => Ok(self.public_url(bucket, key)),
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(ObjectStoreError::Sqlx(err))
            }
        }
    }

    async fn download(&self, bucket: &str, key: &str) -> StoreResult<Bytes> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let not_found = || ObjectStoreError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        };
        self.fetch_object(&bucket_rec, key).await?.ok_or_else(not_found)?;

        match fs::read(self.object_path(&bucket_rec.name, key)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(not_found()),
            Err(err) => Err(ObjectStoreError::Io(err)),
        }
    }

    async fn remove(&self, bucket: &str, keys: &[String]) -> StoreResult<usize> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let bucket_root = self.bucket_root(&bucket_rec.name);
        let mut removed = 0;

        for key in keys {
            self.ensure_key_safe(key)?;
            let result = sqlx::query("DELETE FROM objects WHERE key = ? AND bucket_id = ?")
                .bind(key)
                .bind(bucket_rec.id)
                .execute(&*self.db)
                .await?;
            if result.rows_affected() == 0 {
                continue;
            }
            removed += 1;

            let file_path = self.object_path(&bucket_rec.name, key);
            match fs::remove_file(&file_path).await {
                Ok(_) => debug!("removed physical file {}", file_path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!("file {} already missing", file_path.display());
                }
                Err(err) => return Err(ObjectStoreError::Io(err)),
            }
            if let Some(parent) = file_path.parent() {
                self.prune_empty_dirs(parent, &bucket_root).await;
            }
        }

        Ok(removed)
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
