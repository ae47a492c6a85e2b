//! The ingest pipeline: validate, infer, provision, upload, record, preview.
//!
//! Steps run strictly in that order for one session. Inference and optional
//! bucket problems degrade the result (reported as notices) instead of
//! failing it; validation, transfer, and record errors are fatal and leave
//! the session retryable with progress back at zero.

use crate::{
    models::{
        dataset::Dataset,
        preview::{
            MAX_PREVIEW_ROWS, PreviewOrigin, PreviewRow, PreviewSample, new_preview_handle,
        },
        upload::{ContentKind, FileUpload, InvalidPrincipal, Principal, UploadSession},
    },
    services::{
        clock::SharedClock,
        metadata_store::{MetadataError, MetadataStore},
        object_store::ObjectStore,
        preview_cache::{
            DEFAULT_CACHE_CAPACITY, DEFAULT_TTL, LastUpload, PreviewCache, RecoveryCache,
            synthetic_rows_from_file_name, synthetic_rows_from_schema,
        },
        provisioner::{BucketProvisioner, ProvisioningError},
        records::{DatasetRecordCreator, NewDataset, RecordCreationError},
        schema_inference::{Inference, InferenceError, SchemaInferencer},
        uploader::{
            ProgressCallback, ProgressSpan, ProgressTracker, StoredFile, TransferError,
            UploadOrchestrator, UploadPolicy, destination_path,
        },
        validator::{self, ValidationError, ValidationLimits},
    },
};
use bytes::Bytes;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

const PROGRESS_VALIDATED: u8 = 5;
const PROGRESS_INFERRED: u8 = 10;
const PROGRESS_PROVISIONED: u8 = 15;
const PROGRESS_TRANSFERRED: u8 = 90;
const PROGRESS_RECORDED: u8 = 95;
const PROGRESS_DONE: u8 = 100;

/// Stored objects larger than this are not re-read for the final preview; the
/// locally decoded sample is kept instead.
const AUTHORITATIVE_PREVIEW_MAX_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no file selected")]
    NoFile,
    #[error(transparent)]
    InvalidPrincipal(#[from] InvalidPrincipal),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
    #[error(transparent)]
    Transfer(TransferError),
    #[error(transparent)]
    RecordCreation(#[from] RecordCreationError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("upload cancelled")]
    Cancelled,
}

impl From<TransferError> for IngestError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Cancelled => IngestError::Cancelled,
            other => IngestError::Transfer(other),
        }
    }
}

impl IngestError {
    pub fn user_message(&self) -> String {
        match self {
            IngestError::NoFile => "Select a file to upload.".into(),
            IngestError::InvalidPrincipal(_) => "Your session is invalid. Sign in again.".into(),
            IngestError::Validation(err) => match err {
                ValidationError::InvalidType { .. } => {
                    "Upload a CSV, JSON, or spreadsheet file.".into()
                }
                ValidationError::TooLarge { limit, .. } => format!(
                    "Files must be {} MiB or smaller.",
                    limit / (1024 * 1024)
                ),
            },
            IngestError::Provisioning(_) => {
                "Storage is not available right now. Please try again shortly.".into()
            }
            IngestError::Transfer(err) => err.user_message(),
            IngestError::RecordCreation(_) => {
                "Your file was stored but the dataset could not be saved. Please retry.".into()
            }
            IngestError::Metadata(_) => "Dataset storage is unavailable.".into(),
            IngestError::Cancelled => "The upload was cancelled.".into(),
        }
    }
}

/// Degraded-mode events that did not stop the upload.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// Schema inference failed or does not apply; the schema is empty.
    InferenceSkipped { reason: String },
    /// An optional bucket could not be provisioned.
    StorageDegraded { buckets: Vec<String> },
    /// The payload was written by the overwrite fallback.
    FallbackTransfer,
    /// Preview rows are placeholders, not file contents.
    SyntheticPreview,
}

#[derive(Serialize, Debug, Clone)]
pub struct IngestOutcome {
    pub dataset: Dataset,
    pub preview_handle: String,
    pub preview_origin: PreviewOrigin,
    pub notices: Vec<Notice>,
}

/// What the recovery cache still knows about an owner's last upload.
#[derive(Serialize, Debug, Clone)]
pub struct RecoveredUpload {
    pub last_upload: LastUpload,
    pub preview: Option<PreviewSample>,
}

pub struct IngestPipeline {
    limits: ValidationLimits,
    inferencer: SchemaInferencer,
    store: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    provisioner: Arc<BucketProvisioner>,
    uploader: UploadOrchestrator,
    records: DatasetRecordCreator,
    previews: PreviewCache,
    recovery: RecoveryCache,
    clock: SharedClock,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        provisioner: Arc<BucketProvisioner>,
        clock: SharedClock,
    ) -> Self {
        let uploader = UploadOrchestrator::new(
            store.clone(),
            provisioner.clone(),
            clock.clone(),
            UploadPolicy::default(),
        );
        let records = DatasetRecordCreator::new(metadata.clone(), clock.clone(), store.backend());
        Self {
            limits: ValidationLimits::default(),
            inferencer: SchemaInferencer::default(),
            store,
            metadata,
            provisioner,
            uploader,
            records,
            previews: PreviewCache::new(clock.clone(), DEFAULT_CACHE_CAPACITY, DEFAULT_TTL),
            recovery: RecoveryCache::new(clock.clone(), DEFAULT_CACHE_CAPACITY, DEFAULT_TTL),
            clock,
        }
    }

    pub fn with_limits(mut self, limits: ValidationLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_upload_policy(mut self, policy: UploadPolicy) -> Self {
        self.uploader = UploadOrchestrator::new(
            self.store.clone(),
            self.provisioner.clone(),
            self.clock.clone(),
            policy,
        );
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.previews = PreviewCache::new(self.clock.clone(), DEFAULT_CACHE_CAPACITY, ttl);
        self.recovery = RecoveryCache::new(self.clock.clone(), DEFAULT_CACHE_CAPACITY, ttl);
        self
    }

    /// Run one ingestion for `session` on behalf of `principal`.
    ///
    /// The local preview is cached under `session.preview_handle` as soon as
    /// inference finishes, so a caller holding the handle can read it through
    /// [`IngestPipeline::preview`] before the transfer completes.
    ///
    /// On success the session is reset. On a fatal error progress is reset to
    /// zero and the session keeps its file for a retry. On cancellation the
    /// caller stops hearing about progress and the session is left alone.
    pub async fn ingest(
        &self,
        session: &mut UploadSession,
        principal: Principal,
        on_progress: ProgressCallback,
    ) -> Result<IngestOutcome, IngestError> {
        let tracker = ProgressTracker::new(on_progress);
        let cancel = session.cancellation_token();

        match self.run(session, principal, &tracker, &cancel).await {
            Ok(outcome) => {
                session.reset();
                Ok(outcome)
            }
            Err(IngestError::Cancelled) => {
                tracker.silence();
                info!(session_id = %session.id, "ingest cancelled");
                Err(IngestError::Cancelled)
            }
            Err(err) => {
                warn!(session_id = %session.id, error = %err, "ingest failed");
                tracker.reset();
                session.mark_failed(err.user_message());
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        session: &mut UploadSession,
        principal: Principal,
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<IngestOutcome, IngestError> {
        let file: FileUpload = session.file().cloned().ok_or(IngestError::NoFile)?;
        let owner_id = principal.owner_id();
        let mut notices = Vec::new();

        let kind = validator::validate(&file.descriptor, &self.limits)?;
        self.checkpoint(session, tracker, PROGRESS_VALIDATED);

        let inference = match self.infer(kind, file.bytes.clone()).await {
            Ok(inference) => inference,
            Err(err) => {
                warn!(file = %file.descriptor.name, error = %err, "schema inference skipped");
                notices.push(Notice::InferenceSkipped {
                    reason: err.to_string(),
                });
                Inference::default()
            }
        };
        let handle = session
            .preview_handle
            .get_or_insert_with(new_preview_handle)
            .clone();
        if !inference.preview_rows.is_empty() {
            self.previews
                .put(&handle, inference.preview_rows.clone(), PreviewOrigin::Local);
        }
        self.checkpoint(session, tracker, PROGRESS_INFERRED);
        ensure_active(cancel)?;

        match self.provisioner.provision().await {
            Ok(report) if report.is_degraded() => {
                notices.push(Notice::StorageDegraded {
                    buckets: report.degraded,
                });
            }
            Ok(_) => {}
            Err(err) => {
                let ProvisioningError::Exhausted { bucket, .. } = &err;
                if bucket == self.uploader.bucket() {
                    return Err(err.into());
                }
                warn!(error = %err, "provisioning incomplete; upload bucket unaffected");
                notices.push(Notice::StorageDegraded {
                    buckets: vec![bucket.clone()],
                });
            }
        }
        self.checkpoint(session, tracker, PROGRESS_PROVISIONED);
        ensure_active(cancel)?;

        let display_name = match session.name.trim() {
            "" => file.descriptor.name.clone(),
            trimmed => trimmed.to_string(),
        };
        let extension = file
            .descriptor
            .extension()
            .unwrap_or_else(|| kind.default_extension().to_string());
        let destination = destination_path(&display_name, owner_id, &extension, self.clock.now());
        let span = ProgressSpan {
            start: PROGRESS_PROVISIONED,
            end: PROGRESS_TRANSFERRED,
        };
        let stored = self
            .uploader
            .upload(&file, &destination, tracker, span, cancel)
            .await?;
        if stored.via_fallback {
            notices.push(Notice::FallbackTransfer);
        }
        self.checkpoint(session, tracker, PROGRESS_TRANSFERRED);

        if cancel.is_cancelled() {
            self.discard_orphan(&stored).await;
            return Err(IngestError::Cancelled);
        }

        let dataset = self
            .records
            .create_record(NewDataset {
                name: &display_name,
                description: session.description.as_deref(),
                file: &file.descriptor,
                stored: &stored,
                owner_id,
                schema: inference.schema.clone(),
                row_count: inference.row_count,
            })
            .await?;
        self.checkpoint(session, tracker, PROGRESS_RECORDED);

        let (rows, origin) = self
            .authoritative_preview(kind, &file, &stored, &inference)
            .await;
        if origin.is_synthetic() {
            notices.push(Notice::SyntheticPreview);
        }
        let preview = self.previews.put(&handle, rows, origin);
        self.recovery.remember(owner_id, dataset.id, &handle);
        self.checkpoint(session, tracker, PROGRESS_DONE);

        info!(
            dataset_id = %dataset.id,
            owner_id = %owner_id,
            rows = dataset.row_count,
            preview = ?preview.origin,
            "dataset ingested"
        );
        Ok(IngestOutcome {
            dataset,
            preview_handle: preview.handle,
            preview_origin: preview.origin,
            notices,
        })
    }

    fn checkpoint(&self, session: &mut UploadSession, tracker: &ProgressTracker, value: u8) {
        tracker.report(value);
        session.advance_progress(tracker.current());
    }

    async fn infer(&self, kind: ContentKind, bytes: Bytes) -> Result<Inference, InferenceError> {
        let inferencer = self.inferencer;
        tokio::task::spawn_blocking(move || inferencer.infer(kind, &bytes))
            .await
            .unwrap_or_else(|err| Err(InferenceError::Malformed(err.to_string())))
    }

    /// Final preview: re-read from storage when small enough, else the local
    /// sample, else placeholders.
    async fn authoritative_preview(
        &self,
        kind: ContentKind,
        file: &FileUpload,
        stored: &StoredFile,
        local: &Inference,
    ) -> (Vec<PreviewRow>, PreviewOrigin) {
        if file.descriptor.size_bytes <= AUTHORITATIVE_PREVIEW_MAX_BYTES {
            match self.store.download(&stored.bucket, &stored.storage_path).await {
                Ok(bytes) => match self.infer(kind, bytes).await {
                    Ok(inference) if !inference.preview_rows.is_empty() => {
                        return (inference.preview_rows, PreviewOrigin::Stored);
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "stored object could not be decoded"),
                },
                Err(err) => {
                    warn!(path = %stored.storage_path, error = %err, "stored object unreadable for preview")
                }
            }
        }

        if !local.preview_rows.is_empty() {
            return (local.preview_rows.clone(), PreviewOrigin::Local);
        }
        let rows = if local.schema.is_empty() {
            synthetic_rows_from_file_name(&file.descriptor.name, MAX_PREVIEW_ROWS)
        } else {
            synthetic_rows_from_schema(&local.schema, MAX_PREVIEW_ROWS)
        };
        (rows, PreviewOrigin::Synthetic)
    }

    /// A payload written after the caller walked away has no record; remove it.
    async fn discard_orphan(&self, stored: &StoredFile) {
        let keys = [stored.storage_path.clone()];
        if let Err(err) = self.store.remove(&stored.bucket, &keys).await {
            warn!(path = %stored.storage_path, error = %err, "could not remove abandoned upload");
        }
    }

    pub fn preview(&self, handle: &str) -> Option<PreviewSample> {
        self.previews.get(handle)
    }

    pub fn recover_last_upload(&self, owner_id: Uuid) -> Option<RecoveredUpload> {
        let last_upload = self.recovery.last_upload(owner_id)?;
        let preview = self.previews.get(&last_upload.preview_handle);
        Some(RecoveredUpload {
            last_upload,
            preview,
        })
    }

    pub async fn dataset(&self, id: Uuid) -> Result<Option<Dataset>, IngestError> {
        Ok(self.metadata.get_dataset(id).await?)
    }

    pub async fn datasets(&self, owner_id: Uuid) -> Result<Vec<Dataset>, IngestError> {
        Ok(self.metadata.list_datasets(owner_id).await?)
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), IngestError> {
    if cancel.is_cancelled() {
        return Err(IngestError::Cancelled);
    }
    Ok(())
}

