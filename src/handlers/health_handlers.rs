//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the metadata store and disk I/O

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::BTreeMap, path::Path};
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Liveness only; never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 1. Runs the metadata store's health probe.
/// 2. Performs a write/read/delete against the payload directory.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let metadata = match state.metadata.health_check().await {
        Ok(()) => CheckStatus::ok(),
        Err(err) => CheckStatus::failed(format!("error: {}", err)),
    };
    let disk = probe_disk(&state.objects.base_path).await;

    let overall_ok = metadata.ok && disk.ok;
    let mut checks = BTreeMap::new();
    checks.insert("metadata", metadata);
    checks.insert("disk", disk);

    let body = ReadyResponse {
        status: if overall_ok { "ok".into() } else { "error".into() },
        checks,
    };
    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn probe_disk(base_path: &Path) -> CheckStatus {
    if let Err(err) = fs::create_dir_all(base_path).await {
        return CheckStatus::failed(format!("could not create storage dir: {}", err));
    }

    let tmp_path = base_path.join(format!(".readyz-{}", Uuid::new_v4()));
    if let Err(err) = fs::write(&tmp_path, b"readyz").await {
        return CheckStatus::failed(format!("could not write tmp file: {}", err));
    }
    let read = fs::read(&tmp_path).await;
    let removed = fs::remove_file(&tmp_path).await;

    match (read, removed) {
        (Ok(bytes), _) if bytes != b"readyz" => CheckStatus::failed("file content mismatch"),
        (Ok(_), Ok(())) => CheckStatus::ok(),
        // The probe itself worked; a leftover temp file is only worth reporting.
        (Ok(_), Err(err)) => CheckStatus {
            ok: true,
            error: Some(format!("could not remove tmp file: {}", err)),
        },
        (Err(err), _) => CheckStatus::failed(format!("could not read tmp file: {}", err)),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}
