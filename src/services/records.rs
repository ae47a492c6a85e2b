//! Writes the dataset row once the payload is safely stored.

use crate::{
    models::{dataset::Dataset, schema::ColumnSchema, upload::FileDescriptor},
    services::{clock::SharedClock, metadata_store::MetadataStore, uploader::StoredFile},
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

/// The payload exists but no record points at it. Needs manual cleanup or a
/// re-run of record creation against `storage_path`.
#[derive(Debug, Error)]
#[error("dataset record for `{storage_path}` could not be written: {reason}")]
pub struct RecordCreationError {
    pub storage_path: String,
    pub storage_url: String,
    pub reason: String,
}

impl RecordCreationError {
    pub fn requires_reconciliation(&self) -> bool {
        true
    }
}

/// Everything a new record is built from.
#[derive(Debug, Clone)]
pub struct NewDataset<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub file: &'a FileDescriptor,
    pub stored: &'a StoredFile,
    pub owner_id: Uuid,
    pub schema: ColumnSchema,
    pub row_count: u64,
}

pub struct DatasetRecordCreator {
    metadata: Arc<dyn MetadataStore>,
    clock: SharedClock,
    backend: &'static str,
}

impl DatasetRecordCreator {
    pub fn new(metadata: Arc<dyn MetadataStore>, clock: SharedClock, backend: &'static str) -> Self {
        Self {
            metadata,
            clock,
            backend,
        }
    }

    /// Persist the record. Size and row count come from the file descriptor
    /// and inference, never from re-reading the stored object.
    pub async fn create_record(&self, new: NewDataset<'_>) -> Result<Dataset, RecordCreationError> {
        let now = self.clock.now();
        let name = match new.name.trim() {
            "" => new.file.name.clone(),
            trimmed => trimmed.to_string(),
        };
        let description = new
            .description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        let dataset = Dataset {
            id: Uuid::new_v4(),
            owner_id: new.owner_id,
            name,
            description,
            file_name: new.file.name.clone(),
            size_bytes: i64::try_from(new.file.size_bytes).unwrap_or(i64::MAX),
            row_count: i64::try_from(new.row_count).unwrap_or(i64::MAX),
            schema: new.schema,
            storage_path: new.stored.storage_path.clone(),
            storage_url: new.stored.storage_url.clone(),
            storage_backend: self.backend.to_string(),
            created_at: now,
            updated_at: now,
        };

        match self.metadata.insert_dataset(&dataset).await {
            Ok(saved) => {
                info!(dataset_id = %saved.id, owner_id = %saved.owner_id, "dataset record created");
                Ok(saved)
            }
            Err(err) => {
                error!(
                    storage_path = %new.stored.storage_path,
                    error = %err,
                    "dataset record creation failed; stored object has no record"
                );
                Err(RecordCreationError {
                    storage_path: new.stored.storage_path.clone(),
                    storage_url: new.stored.storage_url.clone(),
                    reason: err.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db,
        models::schema::ColumnType,
        services::{clock::ManualClock, metadata_store::SqliteMetadataStore},
    };

    fn stored() -> StoredFile {
        StoredFile {
            bucket: "datasets".into(),
            storage_path: "owner/report_1.csv".into(),
            storage_url: "http://test/storage/datasets/owner/report_1.csv".into(),
            via_fallback: false,
        }
    }

    #[tokio::test]
    async fn record_uses_descriptor_size_and_inferred_rows() {
        let metadata = Arc::new(SqliteMetadataStore::new(Arc::new(
            db::connect_in_memory().await.unwrap(),
        )));
        let creator = DatasetRecordCreator::new(metadata.clone(), Arc::new(ManualClock::default()), "local");
        let file = FileDescriptor {
            name: "report.csv".into(),
            content_type: Some("text/csv".into()),
            size_bytes: 2048,
        };
        let stored = stored();
        let schema: ColumnSchema = [("a", ColumnType::Number)].into_iter().collect();

        let dataset = creator
            .create_record(NewDataset {
                name: "  ",
                description: Some(" "),
                file: &file,
                stored: &stored,
                owner_id: Uuid::new_v4(),
                schema: schema.clone(),
                row_count: 7,
            })
            .await
            .unwrap();

        assert_eq!(dataset.name, "report.csv");
        assert_eq!(dataset.description, None);
        assert_eq!(dataset.size_bytes, 2048);
        assert_eq!(dataset.row_count, 7);
        assert_eq!(dataset.schema, schema);
        assert_eq!(dataset.storage_backend, "local");
        assert!(metadata.get_dataset(dataset.id).await.unwrap().is_some());
    }
}
