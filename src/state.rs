//! Shared handler state and its construction from configuration.

use crate::{
    config::AppConfig,
    services::{
        clock::{SharedClock, SystemClock},
        metadata_store::{MetadataStore, SqliteMetadataStore},
        object_store::{LocalObjectStore, ObjectStore},
        pipeline::IngestPipeline,
        provisioner::BucketProvisioner,
        validator::ValidationLimits,
    },
};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestPipeline>,
    pub objects: Arc<LocalObjectStore>,
    pub metadata: Arc<dyn MetadataStore>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(config: AppConfig, db: Arc<SqlitePool>) -> Self {
        Self::with_clock(config, db, Arc::new(SystemClock))
    }

    /// The local store serves as both the caller's handle and the elevated
    /// provisioning handle.
    pub fn with_clock(config: AppConfig, db: Arc<SqlitePool>, clock: SharedClock) -> Self {
        let objects = Arc::new(
            LocalObjectStore::new(
                db.clone(),
                config.storage_dir.clone(),
                config.public_base_url.clone(),
            )
            .with_max_object_bytes(config.max_upload_bytes),
        );
        let store: Arc<dyn ObjectStore> = objects.clone();
        let metadata: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::new(db));
        let provisioner = Arc::new(BucketProvisioner::with_default_strategies(
            store.clone(),
            store.clone(),
        ));
        let pipeline = IngestPipeline::new(store, metadata.clone(), provisioner, clock)
            .with_limits(ValidationLimits {
                max_bytes: config.max_upload_bytes,
            })
            .with_cache_ttl(config.preview_ttl);

        Self {
            pipeline: Arc::new(pipeline),
            objects,
            metadata,
            config: Arc::new(config),
        }
    }
}
