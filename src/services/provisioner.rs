//! Makes sure the buckets the pipeline writes to exist before anything is
//! uploaded.
//!
//! Provisioning is idempotent and may run concurrently from several upload
//! sessions: losing a creation race ("already exists") counts as success.
//! Each missing bucket is offered to an ordered list of strategies; only a
//! required bucket that no strategy could create fails the call.

use crate::{
    models::bucket::{BucketPolicy, BucketSpec, required_buckets},
    services::object_store::{ObjectStore, ObjectStoreError},
};
use async_trait::async_trait;
use std::{collections::HashSet, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("required bucket `{bucket}` could not be created: {}", .failures.join("; "))]
    Exhausted {
        bucket: String,
        failures: Vec<String>,
    },
}

/// One way of creating a bucket.
#[async_trait]
pub trait ProvisioningStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create(&self, spec: &BucketSpec, policy: &BucketPolicy) -> Result<(), ObjectStoreError>;
}

/// Create the bucket through the caller's own store handle.
pub struct DirectCreate {
    store: Arc<dyn ObjectStore>,
}

impl DirectCreate {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ProvisioningStrategy for DirectCreate {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn create(&self, spec: &BucketSpec, _policy: &BucketPolicy) -> Result<(), ObjectStoreError> {
        self.store.create_bucket(&spec.name, spec.public).await.map(|_| ())
    }
}

/// Create the bucket through an elevated handle, the way a server-side
/// provisioning endpoint would, attaching the policy in the same step.
pub struct ServiceRoleCreate {
    admin: Arc<dyn ObjectStore>,
}

impl ServiceRoleCreate {
    pub fn new(admin: Arc<dyn ObjectStore>) -> Self {
        Self { admin }
    }
}

#[async_trait]
impl ProvisioningStrategy for ServiceRoleCreate {
    fn name(&self) -> &'static str {
        "service-role"
    }

    async fn create(&self, spec: &BucketSpec, policy: &BucketPolicy) -> Result<(), ObjectStoreError> {
        self.admin.create_bucket(&spec.name, spec.public).await?;
        if let Err(err) = self.admin.attach_policy(&spec.name, policy).await {
            warn!(bucket = %spec.name, error = %err, "service-role policy attachment failed");
        }
        Ok(())
    }
}

/// Outcome of one provisioning pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub existing: Vec<String>,
    pub created: Vec<String>,
    /// Optional buckets no strategy could create.
    pub degraded: Vec<String>,
}

impl ProvisionReport {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

pub struct BucketProvisioner {
    store: Arc<dyn ObjectStore>,
    strategies: Vec<Box<dyn ProvisioningStrategy>>,
    buckets: Vec<BucketSpec>,
    policy: BucketPolicy,
}

impl BucketProvisioner {
    pub fn new(store: Arc<dyn ObjectStore>, strategies: Vec<Box<dyn ProvisioningStrategy>>) -> Self {
        Self {
            store,
            strategies,
            buckets: required_buckets(),
            policy: BucketPolicy::default(),
        }
    }

    /// Direct creation first, then the elevated handle.
    pub fn with_default_strategies(store: Arc<dyn ObjectStore>, admin: Arc<dyn ObjectStore>) -> Self {
        let strategies: Vec<Box<dyn ProvisioningStrategy>> = vec![
            Box::new(DirectCreate::new(store.clone())),
            Box::new(ServiceRoleCreate::new(admin)),
        ];
        Self::new(store, strategies)
    }

    pub fn with_buckets(mut self, buckets: Vec<BucketSpec>) -> Self {
        self.buckets = buckets;
        self
    }

    pub fn buckets(&self) -> &[BucketSpec] {
        &self.buckets
    }

    /// True when every required bucket exists afterwards.
    pub async fn ensure_buckets(&self) -> bool {
        match self.provision().await {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "bucket provisioning failed");
                false
            }
        }
    }

    pub async fn provision(&self) -> Result<ProvisionReport, ProvisioningError> {
        let existing: HashSet<String> = match self.store.list_buckets().await {
            Ok(buckets) => buckets.into_iter().map(|b| b.name).collect(),
            Err(err) => {
                // Listing is often what breaks on a misconfigured store; try creating anyway.
                warn!(error = %err, "listing buckets failed, attempting creation");
                HashSet::new()
            }
        };

        let mut report = ProvisionReport::default();
        for spec in &self.buckets {
            if existing.contains(&spec.name) {
                debug!(bucket = %spec.name, "bucket already present");
                report.existing.push(spec.name.clone());
                continue;
            }

            match self.create_with_strategies(spec).await {
                Ok(()) => {
                    self.attach_policy(spec).await;
                    report.created.push(spec.name.clone());
                }
                Err(failures) if spec.required => {
                    return Err(ProvisioningError::Exhausted {
                        bucket: spec.name.clone(),
                        failures,
                    });
                }
                Err(failures) => {
                    warn!(bucket = %spec.name, failures = ?failures, "optional bucket unavailable");
                    report.degraded.push(spec.name.clone());
                }
            }
        }

        Ok(report)
    }

    async fn create_with_strategies(&self, spec: &BucketSpec) -> Result<(), Vec<String>> {
        let mut failures = Vec::new();
        for strategy in &self.strategies {
            match strategy.create(spec, &self.policy).await {
                Ok(()) => {
                    info!(bucket = %spec.name, strategy = strategy.name(), "created bucket");
                    return Ok(());
                }
                Err(ObjectStoreError::BucketAlreadyExists(_)) => {
                    debug!(bucket = %spec.name, strategy = strategy.name(), "bucket created concurrently");
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        bucket = %spec.name,
                        strategy = strategy.name(),
                        error = %err,
                        "bucket creation strategy failed"
                    );
                    failures.push(format!("{}: {}", strategy.name(), err));
                }
            }
        }
        Err(failures)
    }

    /// Policy attachment never fails provisioning.
    async fn attach_policy(&self, spec: &BucketSpec) {
        if let Err(err) = self.store.attach_policy(&spec.name, &self.policy).await {
            warn!(bucket = %spec.name, error = %err, "could not attach bucket policy");
        }
    }
}
