//! Metadata-store capability holding dataset records, plus the SQLite backend.

use crate::models::dataset::Dataset;
use async_trait::async_trait;
use sqlx::{SqlitePool, types::Json};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("dataset `{0}` already exists")]
    Conflict(Uuid),
    #[error("metadata store rejected the write: {0}")]
    Rejected(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn insert_dataset(&self, dataset: &Dataset) -> MetadataResult<Dataset>;

    async fn get_dataset(&self, id: Uuid) -> MetadataResult<Option<Dataset>>;

    /// Datasets owned by `owner_id`, newest first.
    async fn list_datasets(&self, owner_id: Uuid) -> MetadataResult<Vec<Dataset>>;

    async fn health_check(&self) -> MetadataResult<()>;
}

const DATASET_COLUMNS: &str = "id, owner_id, name, description, file_name, size_bytes, \
     row_count, schema, storage_path, storage_url, storage_backend, created_at, updated_at";

#[derive(Clone)]
pub struct SqliteMetadataStore {
    pub db: Arc<SqlitePool>,
}

impl SqliteMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert_dataset(&self, dataset: &Dataset) -> MetadataResult<Dataset> {
        let sql = format!(
            "INSERT INTO datasets ({DATASET_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {DATASET_COLUMNS}"
        );
        sqlx::query_as::<_, Dataset>(&sql)
            .bind(dataset.id)
            .bind(dataset.owner_id)
            .bind(&dataset.name)
            .bind(&dataset.description)
            .bind(&dataset.file_name)
            .bind(dataset.size_bytes)
            .bind(dataset.row_count)
            .bind(Json(&dataset.schema))
            .bind(&dataset.storage_path)
            .bind(&dataset.storage_url)
            .bind(&dataset.storage_backend)
            .bind(dataset.created_at)
            .bind(dataset.updated_at)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::Database(db_err)
                    if db_err.message().to_ascii_lowercase().contains("unique") =>
                {
                    MetadataError::Conflict(dataset.id)
                }
                other => MetadataError::Sqlx(other),
            })
    }

    async fn get_dataset(&self, id: Uuid) -> MetadataResult<Option<Dataset>> {
        let sql = format!("SELECT {DATASET_COLUMNS} FROM datasets WHERE id = ?");
        let dataset = sqlx::query_as::<_, Dataset>(&sql)
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(dataset)
    }

    async fn list_datasets(&self, owner_id: Uuid) -> MetadataResult<Vec<Dataset>> {
        let sql = format!(
            "SELECT {DATASET_COLUMNS} FROM datasets WHERE owner_id = ? ORDER BY created_at DESC"
        );
        let datasets = sqlx::query_as::<_, Dataset>(&sql)
            .bind(owner_id)
            .fetch_all(&*self.db)
            .await?;
        Ok(datasets)
    }

    async fn health_check(&self) -> MetadataResult<()> {
        let value = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        if value != 1 {
            return Err(MetadataError::Rejected(format!(
                "unexpected health probe result: {}",
                value
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db,
        models::{
            dataset::LOCAL_BACKEND,
            schema::{ColumnSchema, ColumnType},
        },
    };
    use chrono::{Duration, Utc};

    fn dataset(owner_id: Uuid, name: &str, offset_secs: i64) -> Dataset {
        let created_at = Utc::now() + Duration::seconds(offset_secs);
        Dataset {
            id: Uuid::new_v4(),
            owner_id,
            name: name.to_string(),
            description: Some("quarterly".into()),
            file_name: format!("{name}.csv"),
            size_bytes: 42,
            row_count: 2,
            schema: [("name", ColumnType::String), ("age", ColumnType::Number)]
                .into_iter()
                .collect::<ColumnSchema>(),
            storage_path: format!("{owner_id}/{name}.csv"),
            storage_url: format!("http://test/{name}.csv"),
            storage_backend: LOCAL_BACKEND.to_string(),
            created_at,
            updated_at: created_at,
        }
    }

    #[tokio::test]
    async fn insert_then_fetch_round_trips_schema_order() {
        let store = SqliteMetadataStore::new(Arc::new(db::connect_in_memory().await.unwrap()));
        let owner = Uuid::new_v4();
        let record = dataset(owner, "sales", 0);

        let inserted = store.insert_dataset(&record).await.unwrap();
        assert_eq!(inserted.id, record.id);

        let fetched = store.get_dataset(record.id).await.unwrap().unwrap();
        assert_eq!(
            fetched.schema.names().collect::<Vec<_>>(),
            vec!["name", "age"]
        );
        assert_eq!(fetched.row_count, 2);
        assert!(store.get_dataset(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_id_is_a_conflict() {
        let store = SqliteMetadataStore::new(Arc::new(db::connect_in_memory().await.unwrap()));
        let record = dataset(Uuid::new_v4(), "sales", 0);
        store.insert_dataset(&record).await.unwrap();
        assert!(matches!(
            store.insert_dataset(&record).await,
            Err(MetadataError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn list_is_scoped_to_owner_newest_first() {
        let store = SqliteMetadataStore::new(Arc::new(db::connect_in_memory().await.unwrap()));
        let owner = Uuid::new_v4();
        store.insert_dataset(&dataset(owner, "older", -60)).await.unwrap();
        store.insert_dataset(&dataset(owner, "newer", 0)).await.unwrap();
        store
            .insert_dataset(&dataset(Uuid::new_v4(), "other", 0))
            .await
            .unwrap();

        let names: Vec<_> = store
            .list_datasets(owner)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["newer", "older"]);
        store.health_check().await.unwrap();
    }
}
