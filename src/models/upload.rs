//! Transient upload state: the selected file, the acting principal, and the
//! per-session bookkeeping the pipeline mutates while it runs.

use crate::models::preview::new_preview_handle;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Owner id recorded when the service runs in unauthenticated demo mode.
pub const SYSTEM_OWNER_ID: Uuid = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0001);

/// What the client told us about the file before any bytes are inspected.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Original file name, including extension.
    pub name: String,
    /// Declared MIME type. Browsers frequently leave this empty or generic.
    pub content_type: Option<String>,
    pub size_bytes: u64,
}

impl FileDescriptor {
    /// Lowercased extension without the dot, if any.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// A selected file with its bytes loaded into memory.
#[derive(Clone, Debug)]
pub struct FileUpload {
    pub descriptor: FileDescriptor,
    pub bytes: Bytes,
}

impl FileUpload {
    pub fn new(name: impl Into<String>, content_type: Option<String>, bytes: Bytes) -> Self {
        Self {
            descriptor: FileDescriptor {
                name: name.into(),
                content_type,
                size_bytes: bytes.len() as u64,
            },
            bytes,
        }
    }
}

/// Content families the pipeline knows how to ingest.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Csv,
    Json,
    Spreadsheet,
}

impl ContentKind {
    pub fn default_extension(&self) -> &'static str {
        match self {
            ContentKind::Csv => "csv",
            ContentKind::Json => "json",
            ContentKind::Spreadsheet => "xlsx",
        }
    }
}

/// The identity an upload is performed on behalf of.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Principal {
    User(Uuid),
    /// Unauthenticated admin/demo mode.
    System,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("`{0}` is not a valid user id")]
pub struct InvalidPrincipal(pub String);

impl Principal {
    /// Parse a caller-supplied user id. Only hyphenated UUIDs are accepted.
    pub fn parse(raw: &str) -> Result<Self, InvalidPrincipal> {
        let trimmed = raw.trim();
        if trimmed.len() != 36 {
            return Err(InvalidPrincipal(raw.to_string()));
        }
        Uuid::parse_str(trimmed)
            .map(Principal::User)
            .map_err(|_| InvalidPrincipal(raw.to_string()))
    }

    pub fn owner_id(&self) -> Uuid {
        match self {
            Principal::User(id) => *id,
            Principal::System => SYSTEM_OWNER_ID,
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::User(id) => write!(f, "{}", id),
            Principal::System => f.write_str("system"),
        }
    }
}

/// State for one in-progress ingestion attempt.
///
/// Created when a file is selected and reset on success or cancellation.
/// A failed attempt keeps the file so the caller can retry without selecting
/// it again.
#[derive(Debug)]
pub struct UploadSession {
    pub id: Uuid,
    file: Option<FileUpload>,
    pub name: String,
    pub description: Option<String>,
    progress: u8,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// Allocated up front so the caller can poll the preview while the
    /// transfer is still running. Kept across retries.
    pub preview_handle: Option<String>,
    cancel: CancellationToken,
}

impl UploadSession {
    pub fn new(file: FileUpload, name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            file: Some(file),
            name: name.into(),
            description,
            progress: 0,
            retry_count: 0,
            last_error: None,
            preview_handle: Some(new_preview_handle()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn file(&self) -> Option<&FileUpload> {
        self.file.as_ref()
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Record progress; values below the current one are ignored.
    pub fn advance_progress(&mut self, value: u8) {
        self.progress = self.progress.max(value.min(100));
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Terminal failure: progress back to zero, file kept for a retry.
    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.progress = 0;
        self.retry_count += 1;
        self.last_error = Some(message.into());
    }

    /// Drop all session state. In-flight work observing the old token stops
    /// reporting to the caller.
    pub fn reset(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.file = None;
        self.name.clear();
        self.description = None;
        self.progress = 0;
        self.retry_count = 0;
        self.last_error = None;
        self.preview_handle = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principal_rejects_malformed_ids() {
        assert!(Principal::parse("not-a-uuid").is_err());
        assert!(Principal::parse("3f2504e04f8941d39a0c0305e82c3301").is_err());
        let id = Uuid::new_v4();
        assert_eq!(
            Principal::parse(&id.to_string()).unwrap(),
            Principal::User(id)
        );
    }

    #[test]
    fn session_progress_never_regresses() {
        let file = FileUpload::new("a.csv", None, Bytes::from_static(b"a\n1\n"));
        let mut session = UploadSession::new(file, "a", None);
        let handle = session.preview_handle.clone();
        assert!(handle.as_deref().is_some_and(|h| h.starts_with("preview_")));
        session.advance_progress(40);
        session.advance_progress(20);
        assert_eq!(session.progress(), 40);

        session.mark_failed("boom");
        assert_eq!(session.progress(), 0);
        assert_eq!(session.retry_count, 1);
        assert!(session.file().is_some());
        assert_eq!(session.preview_handle, handle);
    }

    #[test]
    fn reset_cancels_outstanding_token() {
        let file = FileUpload::new("a.csv", None, Bytes::from_static(b"a\n1\n"));
        let mut session = UploadSession::new(file, "a", None);
        let token = session.cancellation_token();
        session.reset();
        assert!(token.is_cancelled());
        assert!(!session.is_cancelled());
        assert!(session.file().is_none());
    }

    #[test]
    fn extension_is_lowercased() {
        let file = FileUpload::new("Report.CSV", None, Bytes::new());
        assert_eq!(file.descriptor.extension().as_deref(), Some("csv"));
        let bare = FileUpload::new(".hidden", None, Bytes::new());
        assert_eq!(bare.descriptor.extension(), None);
    }
}
