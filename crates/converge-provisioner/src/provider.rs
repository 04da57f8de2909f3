//! Provider capability interfaces.
//!
//! The engine never talks to a cloud API directly. Each resource kind is
//! backed by an implementation of [`ResourceApi`] for its typed spec, and
//! asynchronous provider jobs are observed through [`OperationApi`]. The
//! caller builds one [`Providers`] at startup and hands it to the engine.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use converge_storage::BoxFuture;
use converge_storage::BlobStore;

use crate::error::ProvisionerError;
use crate::payload::{Identity, Payload};
use crate::resources::{
    address::AddressSpec, backend_service::BackendServiceSpec, bucket::BucketSpec,
    forwarding_rule::ForwardingRuleSpec, https_proxy::HttpsProxySpec,
    scheduler_job::SchedulerJobSpec, serverless_neg::ServerlessNegSpec,
    service::{ServiceSpec, ServiceStatus}, sql_database::SqlDatabaseSpec,
    sql_instance::SqlInstanceSpec, sql_user::SqlUserSpec, ssl_certificate::SslCertificateSpec,
    url_map::UrlMapSpec,
};

/// Reference to a long-running provider job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl OperationHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Running,
    Done,
    /// Terminal failure with the provider's message.
    Failed(String),
}

/// What the provider returned for an accepted mutation.
#[derive(Debug, Clone, Default)]
pub struct Submitted {
    /// Set when the mutation continues asynchronously.
    pub operation: Option<OperationHandle>,
    /// Resource generation the mutation produced, when the provider tracks
    /// one (used to discard stale readiness reads).
    pub generation: Option<i64>,
    /// Provider-assigned attributes known at submission time.
    pub outputs: Payload,
}

impl Submitted {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn pending(operation: OperationHandle) -> Self {
        Self {
            operation: Some(operation),
            ..Self::default()
        }
    }
}

/// Read/Create/Update/Delete for one resource kind with typed spec `S`.
pub trait ResourceApi<S>: Send + Sync {
    /// Observe the remote object. `Ok(None)` when it does not exist.
    fn read<'a>(&'a self, id: &'a Identity) -> BoxFuture<'a, Result<Option<S>, ProvisionerError>>;

    fn create<'a>(&'a self, wanted: &'a S) -> BoxFuture<'a, Result<Submitted, ProvisionerError>>;

    /// Apply `wanted` in place. `changed` names the fields that differ.
    fn update<'a>(
        &'a self,
        wanted: &'a S,
        changed: &'a [String],
        id: &'a Identity,
    ) -> BoxFuture<'a, Result<Submitted, ProvisionerError>> {
        let _ = (wanted, id);
        Box::pin(async move {
            Err(ProvisionerError::Unimplemented(format!(
                "in-place update of {}",
                changed.join(", ")
            )))
        })
    }

    fn delete<'a>(&'a self, id: &'a Identity) -> BoxFuture<'a, Result<Submitted, ProvisionerError>>;
}

/// Job-status endpoint for asynchronous mutations.
pub trait OperationApi: Send + Sync {
    fn status<'a>(
        &'a self,
        operation: &'a OperationHandle,
    ) -> BoxFuture<'a, Result<OperationStatus, ProvisionerError>>;
}

/// Buckets also expose their contents as a blob store.
pub trait BucketApi: ResourceApi<BucketSpec> {
    fn objects(&self, bucket: &str) -> Result<Arc<dyn BlobStore>, ProvisionerError>;
}

/// Serverless services report revision readiness.
pub trait ServiceApi: ResourceApi<ServiceSpec> {
    fn status<'a>(&'a self, id: &'a Identity)
    -> BoxFuture<'a, Result<ServiceStatus, ProvisionerError>>;
}

/// Edge cache invalidation for a URL map.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate<'a>(
        &'a self,
        url_map: &'a str,
        host: &'a str,
        path: &'a str,
    ) -> BoxFuture<'a, Result<Submitted, ProvisionerError>>;
}

/// Every provider capability the engine can use.
///
/// Constructed once at process start and shared by reference.
#[derive(Clone)]
pub struct Providers {
    pub operations: Arc<dyn OperationApi>,
    pub cache: Arc<dyn CacheInvalidator>,
    pub buckets: Arc<dyn BucketApi>,
    pub services: Arc<dyn ServiceApi>,
    pub sql_instances: Arc<dyn ResourceApi<SqlInstanceSpec>>,
    pub sql_databases: Arc<dyn ResourceApi<SqlDatabaseSpec>>,
    pub sql_users: Arc<dyn ResourceApi<SqlUserSpec>>,
    pub serverless_negs: Arc<dyn ResourceApi<ServerlessNegSpec>>,
    pub backend_services: Arc<dyn ResourceApi<BackendServiceSpec>>,
    pub url_maps: Arc<dyn ResourceApi<UrlMapSpec>>,
    pub ssl_certificates: Arc<dyn ResourceApi<SslCertificateSpec>>,
    pub https_proxies: Arc<dyn ResourceApi<HttpsProxySpec>>,
    pub addresses: Arc<dyn ResourceApi<AddressSpec>>,
    pub forwarding_rules: Arc<dyn ResourceApi<ForwardingRuleSpec>>,
    pub scheduler_jobs: Arc<dyn ResourceApi<SchedulerJobSpec>>,
}
