//! Pre-flight checks on a selected file. Pure: no I/O happens here.

use crate::models::upload::{ContentKind, FileDescriptor};
use thiserror::Error;

/// Default size ceiling: 100 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

const CSV_TYPES: &[&str] = &["text/csv", "application/csv", "text/x-csv"];
const JSON_TYPES: &[&str] = &["application/json", "text/json"];
const SPREADSHEET_TYPES: &[&str] = &[
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.oasis.opendocument.spreadsheet",
];
/// Declared types some platforms report for CSV files; accepted only with a
/// `.csv` extension.
const GENERIC_TYPES: &[&str] = &["", "application/octet-stream", "text/plain"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("`{name}` is not a CSV, JSON, or spreadsheet file")]
    InvalidType { name: String },
    #[error("file is {size} bytes; the maximum is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
}

impl ValidationError {
    /// Stable reason code shown to users.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::InvalidType { .. } => "invalid-type",
            ValidationError::TooLarge { .. } => "too-large",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationLimits {
    pub max_bytes: u64,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Accept or reject a file, returning the content family on success.
///
/// Type is checked before size, so an oversized file of the wrong type
/// reports `invalid-type`.
pub fn validate(
    file: &FileDescriptor,
    limits: &ValidationLimits,
) -> Result<ContentKind, ValidationError> {
    let kind = detect_kind(file).ok_or_else(|| ValidationError::InvalidType {
        name: file.name.clone(),
    })?;

    if file.size_bytes > limits.max_bytes {
        return Err(ValidationError::TooLarge {
            size: file.size_bytes,
            limit: limits.max_bytes,
        });
    }

    Ok(kind)
}

fn detect_kind(file: &FileDescriptor) -> Option<ContentKind> {
    let declared = file
        .content_type
        .as_deref()
        .map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
        .unwrap_or_default();
    let extension = file.extension();

    if CSV_TYPES.contains(&declared.as_str()) {
        return Some(ContentKind::Csv);
    }
    if JSON_TYPES.contains(&declared.as_str()) {
        return Some(ContentKind::Json);
    }
    if SPREADSHEET_TYPES.contains(&declared.as_str()) {
        return Some(ContentKind::Spreadsheet);
    }
    // Windows reports CSV as the Excel MIME type above; anything else generic
    // falls back to the extension, but only for CSV.
    if GENERIC_TYPES.contains(&declared.as_str()) && extension.as_deref() == Some("csv") {
        return Some(ContentKind::Csv);
    }
    None
}
