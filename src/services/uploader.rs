//! Moves file bytes into the object store.
//!
//! The primary transfer refuses to overwrite and is retried a size-dependent
//! number of times. When every attempt fails the buckets are re-provisioned
//! and one overwrite-permitting fallback transfer is made; if that fails too
//! the primary error is returned. A key that is already taken is a conflict
//! and never reaches the fallback. While a transfer is in flight, progress is
//! advanced on a clock tick, and the whole sequence is bounded by a safety
//! cutoff.

use crate::{
    models::{bucket::HOT_BUCKET, upload::FileUpload},
    services::{
        clock::SharedClock,
        object_store::{ObjectStore, ObjectStoreError, UploadOptions},
        provisioner::BucketProvisioner,
    },
};
use chrono::{DateTime, Utc};
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const MIB: u64 = 1024 * 1024;

pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Forwards progress to a callback, never letting the reported value go
/// backwards. The only way back to zero is [`ProgressTracker::reset`].
#[derive(Clone)]
pub struct ProgressTracker {
    high_water: Arc<AtomicU8>,
    silenced: Arc<AtomicBool>,
    callback: ProgressCallback,
}

impl ProgressTracker {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            high_water: Arc::new(AtomicU8::new(0)),
            silenced: Arc::new(AtomicBool::new(false)),
            callback,
        }
    }

    pub fn current(&self) -> u8 {
        self.high_water.load(Ordering::SeqCst)
    }

    /// Report `value`, clamped to `[current, 100]`. Only increases reach the callback.
    pub fn report(&self, value: u8) {
        let value = value.min(100);
        let previous = self.high_water.fetch_max(value, Ordering::SeqCst);
        if value > previous && !self.silenced.load(Ordering::SeqCst) {
            (self.callback)(value);
        }
    }

    /// Step forward by `step` without reaching `ceiling`.
    pub fn advance(&self, step: u8, ceiling: u8) {
        let next = self.current().saturating_add(step).min(ceiling);
        self.report(next);
    }

    /// Terminal failure: drop back to zero and tell the caller.
    pub fn reset(&self) {
        self.high_water.store(0, Ordering::SeqCst);
        if !self.silenced.load(Ordering::SeqCst) {
            (self.callback)(0);
        }
    }

    /// Stop forwarding anything. Used once the caller has abandoned the session.
    pub fn silence(&self) {
        self.silenced.store(true, Ordering::SeqCst);
    }
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("current", &self.current())
            .field("silenced", &self.silenced.load(Ordering::SeqCst))
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("storage refused the upload: {0}")]
    AccessDenied(String),
    #[error("file of {size} bytes exceeds the storage limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },
    #[error("storage bucket `{0}` does not exist")]
    MissingBucket(String),
    #[error("transfer failed: {0}")]
    Network(String),
    #[error("storage path `{0}` is already taken")]
    Conflict(String),
    #[error("upload did not finish within {0:?}")]
    TimedOut(Duration),
    #[error("upload cancelled")]
    Cancelled,
}

impl TransferError {
    /// Errors that end the sequence at once, skipping retries and the fallback.
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferError::Cancelled | TransferError::TimedOut(_) | TransferError::Conflict(_)
        )
    }

    /// What the user should be told, separating permission problems from
    /// connectivity and size problems.
    pub fn user_message(&self) -> String {
        match self {
            TransferError::AccessDenied(_) => {
                "Storage permissions blocked this upload. Ask an administrator to check the bucket access policy.".into()
            }
            TransferError::PayloadTooLarge { limit, .. } => format!(
                "The file is larger than storage accepts ({} MiB maximum).",
                limit / MIB
            ),
            TransferError::MissingBucket(_) => {
                "Storage is not set up yet. Please try again in a moment.".into()
            }
            TransferError::Network(_) => {
                "The upload could not reach storage. Check your connection and retry.".into()
            }
            TransferError::Conflict(_) => {
                "Another upload already used this storage location. Please retry.".into()
            }
            TransferError::TimedOut(_) => "The upload took too long and was stopped. Please retry.".into(),
            TransferError::Cancelled => "The upload was cancelled.".into(),
        }
    }
}

impl From<ObjectStoreError> for TransferError {
    fn from(err: ObjectStoreError) -> Self {
        match err {
            ObjectStoreError::AccessDenied(reason) => TransferError::AccessDenied(reason),
            ObjectStoreError::PayloadTooLarge { size, limit } => {
                TransferError::PayloadTooLarge { size, limit }
            }
            ObjectStoreError::BucketNotFound(bucket) => TransferError::MissingBucket(bucket),
            ObjectStoreError::ObjectAlreadyExists { bucket, key } => {
                TransferError::Conflict(format!("{}/{}", bucket, key))
            }
            other => TransferError::Network(other.to_string()),
        }
    }
}

/// Retry, progress, and cutoff settings for uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    /// Files above this size get `large_file_attempts` primary attempts.
    pub large_file_threshold: u64,
    pub small_file_attempts: u32,
    pub large_file_attempts: u32,
    pub retry_delay: Duration,
    /// Interval between simulated progress steps while a transfer is in flight.
    pub progress_tick: Duration,
    pub progress_step: u8,
    /// Upper bound on the whole retry and fallback sequence.
    pub safety_cutoff: Duration,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            large_file_threshold: 50 * MIB,
            small_file_attempts: 1,
            large_file_attempts: 3,
            retry_delay: Duration::from_secs(1),
            progress_tick: Duration::from_millis(500),
            progress_step: 5,
            safety_cutoff: Duration::from_secs(30),
        }
    }
}

impl UploadPolicy {
    pub fn attempts_for(&self, size_bytes: u64) -> u32 {
        let attempts = if size_bytes > self.large_file_threshold {
            self.large_file_attempts
        } else {
            self.small_file_attempts
        };
        attempts.max(1)
    }
}

/// Portion of the overall 0–100 progress range the transfer occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSpan {
    pub start: u8,
    pub end: u8,
}

impl Default for ProgressSpan {
    fn default() -> Self {
        Self { start: 0, end: 100 }
    }
}

/// Where a payload ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub bucket: String,
    pub storage_path: String,
    pub storage_url: String,
    /// True when the overwrite fallback, not the primary transfer, succeeded.
    pub via_fallback: bool,
}

/// Lowercase the name and squash anything outside `[a-z0-9]` into single
/// underscores. Falls back to `dataset` when nothing survives.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "dataset".to_string()
    } else {
        trimmed.chars().take(64).collect()
    }
}

/// `{owner}/{sanitized-name}_{unix-millis}_{random}.{extension}`. The random
/// part keeps same-name uploads in the same millisecond apart.
pub fn destination_path(name: &str, owner_id: Uuid, extension: &str, at: DateTime<Utc>) -> String {
    let nonce = Uuid::new_v4().simple().to_string();
    format!(
        "{}/{}_{}_{}.{}",
        owner_id,
        sanitize_name(name),
        at.timestamp_millis(),
        &nonce[..12],
        extension
    )
}

pub struct UploadOrchestrator {
    store: Arc<dyn ObjectStore>,
    provisioner: Arc<BucketProvisioner>,
    clock: SharedClock,
    policy: UploadPolicy,
    bucket: String,
}

impl UploadOrchestrator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        provisioner: Arc<BucketProvisioner>,
        clock: SharedClock,
        policy: UploadPolicy,
    ) -> Self {
        Self {
            store,
            provisioner,
            clock,
            policy,
            bucket: HOT_BUCKET.to_string(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub async fn upload(
        &self,
        file: &FileUpload,
        destination: &str,
        progress: &ProgressTracker,
        span: ProgressSpan,
        cancel: &CancellationToken,
    ) -> Result<StoredFile, TransferError> {
        let started = self.clock.now();
        let attempts = self.policy.attempts_for(file.descriptor.size_bytes);
        let primary = UploadOptions {
            upsert: false,
            content_type: file.descriptor.content_type.clone(),
        };
        progress.report(span.start);

        let mut primary_error = None;
        for attempt in 1..=attempts {
            debug!(attempt, attempts, path = %destination, "starting transfer");
            match self
                .transfer(file, destination, &primary, progress, span, cancel, started)
                .await
            {
                Ok(storage_url) => {
                    progress.report(span.end);
                    return Ok(self.stored(destination, storage_url, false));
                }
                Err(err) if err.is_terminal() => return Err(err),
                Err(err) => {
                    warn!(attempt, attempts, error = %err, "transfer attempt failed");
                    primary_error = Some(err);
                }
            }
            if attempt < attempts {
                self.pause(self.policy.retry_delay, cancel).await?;
            }
        }

        warn!(path = %destination, "primary transfer exhausted, re-provisioning for fallback");
        if !self.provisioner.ensure_buckets().await {
            warn!("re-provisioning before fallback did not complete");
        }
        self.check_cutoff(started)?;

        let fallback = UploadOptions {
            upsert: true,
            ..primary
        };
        match self
            .transfer(file, destination, &fallback, progress, span, cancel, started)
            .await
        {
            Ok(storage_url) => {
                info!(path = %destination, "fallback transfer succeeded");
                progress.report(span.end);
                Ok(self.stored(destination, storage_url, true))
            }
            Err(err) if err.is_terminal() => Err(err),
            Err(fallback_error) => {
                warn!(error = %fallback_error, "fallback transfer failed");
                Err(primary_error.unwrap_or(fallback_error))
            }
        }
    }

    fn stored(&self, destination: &str, storage_url: String, via_fallback: bool) -> StoredFile {
        StoredFile {
            bucket: self.bucket.clone(),
            storage_path: destination.to_string(),
            storage_url,
            via_fallback,
        }
    }

    /// One store call, racing progress ticks, cancellation, and the cutoff.
    #[allow(clippy::too_many_arguments)]
    async fn transfer(
        &self,
        file: &FileUpload,
        destination: &str,
        options: &UploadOptions,
        progress: &ProgressTracker,
        span: ProgressSpan,
        cancel: &CancellationToken,
        started: DateTime<Utc>,
    ) -> Result<String, TransferError> {
        self.check_cutoff(started)?;
        let ceiling = span.end.saturating_sub(1).max(span.start);
        let mut upload = self
            .store
            .upload(&self.bucket, destination, file.bytes.clone(), options);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                result = &mut upload => return result.map_err(TransferError::from),
                _ = self.clock.sleep(self.policy.progress_tick) => {
                    progress.advance(self.policy.progress_step, ceiling);
                    self.check_cutoff(started)?;
                }
            }
        }
    }

    async fn pause(&self, delay: Duration, cancel: &CancellationToken) -> Result<(), TransferError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            _ = self.clock.sleep(delay) => Ok(()),
        }
    }

    fn check_cutoff(&self, started: DateTime<Utc>) -> Result<(), TransferError> {
        let elapsed = (self.clock.now() - started).to_std().unwrap_or_default();
        if elapsed >= self.policy.safety_cutoff {
            return Err(TransferError::TimedOut(self.policy.safety_cutoff));
        }
        Ok(())
    }
}
