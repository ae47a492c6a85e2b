//! In-memory fakes shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use dataset_ingest::{
    models::{
        bucket::{Bucket, BucketPolicy},
        dataset::Dataset,
    },
    services::{
        clock::{ManualClock, SharedClock},
        metadata_store::{MetadataError, MetadataResult, MetadataStore},
        object_store::{ObjectStore, ObjectStoreError, StoreResult, UploadOptions},
        pipeline::IngestPipeline,
        provisioner::BucketProvisioner,
        uploader::{ProgressCallback, UploadPolicy},
    },
};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use uuid::Uuid;

/// Object store kept in memory with knobs for injecting failures.
#[derive(Default)]
pub struct FakeObjectStore {
    buckets: Mutex<Vec<String>>,
    objects: Mutex<HashMap<(String, String), Bytes>>,
    pub list_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub policy_calls: AtomicUsize,
    pub upload_calls: AtomicUsize,
    pub upsert_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
    /// `list_buckets` errors.
    pub fail_list: AtomicBool,
    /// `create_bucket` is refused.
    pub deny_create: AtomicBool,
    /// `attach_policy` is refused.
    pub fail_policy: AtomicBool,
    /// The next N non-upsert uploads fail with a network-style error.
    pub primary_failures: AtomicUsize,
    /// Every upload, upsert included, is refused by access policy.
    pub deny_uploads: AtomicBool,
    /// Uploads never complete.
    pub hang_uploads: AtomicBool,
    /// `download` errors.
    pub fail_download: AtomicBool,
}

impl FakeObjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_buckets(names: &[&str]) -> Arc<Self> {
        let store = Self::default();
        store
            .buckets
            .lock()
            .unwrap()
            .extend(names.iter().map(|n| n.to_string()));
        Arc::new(store)
    }

    pub fn bucket_names(&self) -> Vec<String> {
        self.buckets.lock().unwrap().clone()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Any call at all reached the store.
    pub fn total_calls(&self) -> usize {
        [
            &self.list_calls,
            &self.create_calls,
            &self.policy_calls,
            &self.upload_calls,
            &self.download_calls,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }

    fn bucket(name: &str) -> Bucket {
        Bucket {
            id: Uuid::new_v4(),
            name: name.to_string(),
            public: true,
            policy: None,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    fn backend(&self) -> &'static str {
        "fake"
    }

    async fn list_buckets(&self) -> StoreResult<Vec<Bucket>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::Unavailable("listing disabled".into()));
        }
        Ok(self
            .buckets
            .lock()
            .unwrap()
            .iter()
            .map(|name| Self::bucket(name))
            .collect())
    }

    async fn create_bucket(&self, name: &str, _public: bool) -> StoreResult<Bucket> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.deny_create.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::AccessDenied("create not permitted".into()));
        }
        let mut buckets = self.buckets.lock().unwrap();
        if buckets.iter().any(|b| b == name) {
            return Err(ObjectStoreError::BucketAlreadyExists(name.to_string()));
        }
        buckets.push(name.to_string());
        Ok(Self::bucket(name))
    }

    async fn attach_policy(&self, _bucket: &str, _policy: &BucketPolicy) -> StoreResult<()> {
        self.policy_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_policy.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::AccessDenied("policy change not permitted".into()));
        }
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        options: &UploadOptions,
    ) -> StoreResult<String> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if options.upsert {
            self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        }
        if self.hang_uploads.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if self.deny_uploads.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::AccessDenied("row-level policy".into()));
        }
        if !options.upsert
            && self
                .primary_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(ObjectStoreError::Unavailable("connection reset".into()));
        }
        if !self.buckets.lock().unwrap().iter().any(|b| b == bucket) {
            return Err(ObjectStoreError::BucketNotFound(bucket.to_string()));
        }

        let mut objects = self.objects.lock().unwrap();
        let slot = (bucket.to_string(), key.to_string());
        if !options.upsert && objects.contains_key(&slot) {
            return Err(ObjectStoreError::ObjectAlreadyExists {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        objects.insert(slot, bytes);
        Ok(format!("http://fake/{}/{}", bucket, key))
    }

    async fn download(&self, bucket: &str, key: &str) -> StoreResult<Bytes> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_download.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::Unavailable("download disabled".into()));
        }
        self.object(bucket, key)
            .ok_or_else(|| ObjectStoreError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn remove(&self, bucket: &str, keys: &[String]) -> StoreResult<usize> {
        let mut objects = self.objects.lock().unwrap();
        Ok(keys
            .iter()
            .filter(|key| objects.remove(&(bucket.to_string(), key.to_string())).is_some())
            .count())
    }
}

/// Metadata store kept in memory; can be told to reject inserts.
#[derive(Default)]
pub struct FakeMetadataStore {
    datasets: Mutex<Vec<Dataset>>,
    pub reject_inserts: AtomicBool,
}

impl FakeMetadataStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.datasets.lock().unwrap().len()
    }
}

#[async_trait]
impl MetadataStore for FakeMetadataStore {
    async fn insert_dataset(&self, dataset: &Dataset) -> MetadataResult<Dataset> {
        if self.reject_inserts.load(Ordering::SeqCst) {
            return Err(MetadataError::Rejected("insert blocked by policy".into()));
        }
        self.datasets.lock().unwrap().push(dataset.clone());
        Ok(dataset.clone())
    }

    async fn get_dataset(&self, id: Uuid) -> MetadataResult<Option<Dataset>> {
        Ok(self
            .datasets
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.id == id)
            .cloned())
    }

    async fn list_datasets(&self, owner_id: Uuid) -> MetadataResult<Vec<Dataset>> {
        let mut owned: Vec<Dataset> = self
            .datasets
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }

    async fn health_check(&self) -> MetadataResult<()> {
        Ok(())
    }
}

/// A pipeline over the fakes with a virtual clock.
pub struct Harness {
    pub store: Arc<FakeObjectStore>,
    pub metadata: Arc<FakeMetadataStore>,
    pub clock: ManualClock,
    pub pipeline: IngestPipeline,
}

impl Harness {
    pub fn new(store: Arc<FakeObjectStore>, policy: UploadPolicy) -> Self {
        let metadata = FakeMetadataStore::new();
        let clock = ManualClock::default();
        let shared_clock: SharedClock = Arc::new(clock.clone());
        let provisioner = Arc::new(BucketProvisioner::with_default_strategies(
            store.clone(),
            store.clone(),
        ));
        let pipeline =
            IngestPipeline::new(store.clone(), metadata.clone(), provisioner, shared_clock)
                .with_upload_policy(policy);
        Self {
            store,
            metadata,
            clock,
            pipeline,
        }
    }
}

/// Progress callback that records every value it receives.
pub fn recording_progress() -> (ProgressCallback, Arc<Mutex<Vec<u8>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (Arc::new(move |v| sink.lock().unwrap().push(v)), seen)
}
