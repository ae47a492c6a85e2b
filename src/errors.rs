use crate::services::{
    metadata_store::MetadataError, object_store::ObjectStoreError, pipeline::IngestError,
    uploader::TransferError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// An HTTP-facing error: a status plus the message shown to the caller.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Machine-readable reason, e.g. `too-large`.
    pub code: Option<&'static str>,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = match self.code {
            Some(code) => json!({
                "error": self.message,
                "code": code,
                "status": self.status.as_u16()
            }),
            None => json!({
                "error": self.message,
                "status": self.status.as_u16()
            }),
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        let message = err.user_message();
        match &err {
            IngestError::NoFile => AppError::bad_request(message).with_code("missing-file"),
            IngestError::InvalidPrincipal(_) => {
                AppError::new(StatusCode::UNAUTHORIZED, message).with_code("invalid-principal")
            }
            IngestError::Validation(validation) => {
                let status = match validation.code() {
                    "too-large" => StatusCode::PAYLOAD_TOO_LARGE,
                    _ => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                };
                AppError::new(status, message).with_code(validation.code())
            }
            IngestError::Provisioning(_) => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, message).with_code("storage-unavailable")
            }
            IngestError::Transfer(transfer) => {
                let (status, code) = match transfer {
                    TransferError::AccessDenied(_) => (StatusCode::FORBIDDEN, "access-denied"),
                    TransferError::PayloadTooLarge { .. } => {
                        (StatusCode::PAYLOAD_TOO_LARGE, "too-large")
                    }
                    TransferError::TimedOut(_) => (StatusCode::GATEWAY_TIMEOUT, "timed-out"),
                    TransferError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
                    TransferError::MissingBucket(_) => {
                        (StatusCode::SERVICE_UNAVAILABLE, "storage-unavailable")
                    }
                    TransferError::Network(_) | TransferError::Cancelled => {
                        (StatusCode::BAD_GATEWAY, "transfer-failed")
                    }
                };
                AppError::new(status, message).with_code(code)
            }
            IngestError::RecordCreation(_) => {
                AppError::internal(message).with_code("record-not-saved")
            }
            IngestError::Metadata(_) => AppError::internal(message),
            IngestError::Cancelled => {
                AppError::new(StatusCode::CONFLICT, message).with_code("cancelled")
            }
        }
    }
}

impl From<ObjectStoreError> for AppError {
    fn from(err: ObjectStoreError) -> Self {
        match err {
            ObjectStoreError::BucketNotFound(_) | ObjectStoreError::ObjectNotFound { .. } => {
                AppError::not_found(err.to_string())
            }
            ObjectStoreError::InvalidBucketName { .. } | ObjectStoreError::InvalidObjectKey => {
                AppError::bad_request(err.to_string())
            }
            ObjectStoreError::AccessDenied(_) => {
                AppError::new(StatusCode::FORBIDDEN, err.to_string())
            }
            other => AppError::internal(other.to_string()),
        }
    }
}

impl From<MetadataError> for AppError {
    fn from(err: MetadataError) -> Self {
        AppError::internal(err.to_string())
    }
}
