//! HTTP handlers for dataset ingestion and lookup.
//!
//! The caller is identified by the `x-user-id` header. When demo mode is
//! enabled a missing header means the system owner.

use crate::{
    errors::AppError,
    models::{
        dataset::Dataset,
        preview::PreviewSample,
        upload::{FileUpload, Principal, UploadSession},
    },
    services::pipeline::{IngestError, IngestOutcome, RecoveredUpload},
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode},
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub const USER_HEADER: &str = "x-user-id";

/// Resolve the caller from request headers.
pub fn principal(headers: &HeaderMap, allow_demo_mode: bool) -> Result<Principal, AppError> {
    match headers.get(USER_HEADER) {
        Some(value) => {
            let raw = value
                .to_str()
                .map_err(|_| AppError::bad_request("x-user-id must be ASCII"))?;
            Ok(Principal::parse(raw).map_err(IngestError::from)?)
        }
        None if allow_demo_mode => Ok(Principal::System),
        None => Err(
            AppError::new(StatusCode::UNAUTHORIZED, "missing x-user-id header")
                .with_code("invalid-principal"),
        ),
    }
}

/// `POST /datasets`: multipart with `file`, optional `name` and `description`.
pub async fn create_dataset(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<IngestOutcome>), AppError> {
    let principal = principal(&headers, state.config.allow_demo_mode)?;

    let mut file: Option<FileUpload> = None;
    let mut name = String::new();
    let mut description = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.body_text()))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes: Bytes = field
                    .bytes()
                    .await
                    .map_err(|err| AppError::bad_request(err.body_text()))?;
                file = Some(FileUpload::new(file_name, content_type, bytes));
            }
            "name" => {
                name = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(err.body_text()))?;
            }
            "description" => {
                description = Some(
                    field
                        .text()
                        .await
                        .map_err(|err| AppError::bad_request(err.body_text()))?,
                );
            }
            other => debug!(field = other, "ignoring unknown multipart field"),
        }
    }

    let file = file.ok_or(IngestError::NoFile)?;
    let mut session = UploadSession::new(file, name, description);
    let session_id = session.id;
    debug!(
        session_id = %session_id,
        preview_handle = session.preview_handle.as_deref().unwrap_or_default(),
        "starting ingest"
    );
    let on_progress = Arc::new(move |value: u8| {
        debug!(session_id = %session_id, progress = value, "upload progress");
    });

    let outcome = state
        .pipeline
        .ingest(&mut session, principal, on_progress)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// `GET /datasets`: the caller's datasets, newest first.
pub async fn list_datasets(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Dataset>>, AppError> {
    let principal = principal(&headers, state.config.allow_demo_mode)?;
    let datasets = state.pipeline.datasets(principal.owner_id()).await?;
    Ok(Json(datasets))
}

/// `GET /datasets/{id}`. Other owners' datasets read as not found.
pub async fn get_dataset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Dataset>, AppError> {
    let principal = principal(&headers, state.config.allow_demo_mode)?;
    match state.pipeline.dataset(id).await? {
        Some(dataset) if dataset.owner_id == principal.owner_id() => Ok(Json(dataset)),
        _ => Err(AppError::not_found(format!("dataset `{}` not found", id))),
    }
}

/// `GET /previews/{handle}`
pub async fn get_preview(
    State(state): State<AppState>,
    Path(handle): Path<String>,
) -> Result<Json<PreviewSample>, AppError> {
    state
        .pipeline
        .preview(&handle)
        .map(Json)
        .ok_or_else(|| AppError::not_found("preview expired or unknown"))
}

/// `GET /uploads/last`: what is still cached about the caller's last upload.
pub async fn last_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RecoveredUpload>, AppError> {
    let principal = principal(&headers, state.config.allow_demo_mode)?;
    state
        .pipeline
        .recover_last_upload(principal.owner_id())
        .map(Json)
        .ok_or_else(|| AppError::not_found("no recent upload"))
}
