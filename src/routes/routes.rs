//! Defines routes for dataset ingestion and lookup.
//!
//! ## Structure
//! - **Datasets**
//!   - `POST /datasets`: multipart upload (`file`, `name`, `description`)
//!   - `GET  /datasets`: caller's datasets, newest first
//!   - `GET  /datasets/{id}`: one dataset
//!   - `GET  /previews/{handle}`: cached preview rows
//!   - `GET  /uploads/last`: caller's most recent upload, while cached
//!
//! - **Storage**
//!   - `GET  /storage/{bucket}/{*key}`: stream a stored payload
//!
//! The wildcard `*key` allows nested keys like `{owner}/report_1700000000000_3f2504e04f89.csv`.

use crate::{
    handlers::{
        dataset_handlers::{create_dataset, get_dataset, get_preview, last_upload, list_datasets},
        health_handlers::{healthz, readyz},
        storage_handlers::get_object,
    },
    state::AppState,
};
use axum::{Router, extract::DefaultBodyLimit, routing::get};

/// Multipart framing and the text fields ride on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Build the router for all routes, without state attached.
pub fn routes(max_upload_bytes: u64) -> Router<AppState> {
    let body_limit = usize::try_from(max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/datasets",
            get(list_datasets)
                .post(create_dataset)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/datasets/{id}", get(get_dataset))
        .route("/previews/{handle}", get(get_preview))
        .route("/uploads/last", get(last_upload))
        .route("/storage/{bucket}/{*key}", get(get_object))
}

/// The complete application with shared state attached.
pub fn app(state: AppState) -> Router {
    routes(state.config.max_upload_bytes).with_state(state)
}
