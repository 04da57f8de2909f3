//! In-memory provider fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use converge_provisioner::EngineConfig;
use converge_provisioner::error::ProvisionerError;
use converge_provisioner::payload::Identity;
use converge_provisioner::progress::{ProgressEvent, ProgressSink};
use converge_provisioner::provider::{
    BoxFuture, BucketApi, CacheInvalidator, OperationApi, OperationHandle, OperationStatus,
    Providers, ResourceApi, ServiceApi, Submitted,
};
use converge_provisioner::readiness::Condition;
use converge_provisioner::resources::bucket::BucketSpec;
use converge_provisioner::resources::service::{ServiceSpec, ServiceStatus};
use converge_provisioner::resources::sql_instance::SqlInstanceSpec;
use converge_provisioner::resources::address::AddressSpec;
use converge_storage::{BlobStore, MemoryStore};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Every provider call, in order, as `"{verb} {kind}/{name}"`.
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Async jobs that finish after a set number of polls.
#[derive(Default)]
pub struct FakeOperations {
    next: AtomicUsize,
    /// Remaining `Running` answers, or the failure to report.
    jobs: Mutex<HashMap<String, Result<usize, String>>>,
    pub polls: AtomicUsize,
}

impl FakeOperations {
    pub fn start(&self, polls: usize) -> OperationHandle {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        let handle = OperationHandle::new(format!("operation-{n}"));
        self.jobs
            .lock()
            .unwrap()
            .insert(handle.name.clone(), Ok(polls));
        handle
    }

    pub fn start_failing(&self, message: &str) -> OperationHandle {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        let handle = OperationHandle::new(format!("operation-{n}"));
        self.jobs
            .lock()
            .unwrap()
            .insert(handle.name.clone(), Err(message.to_string()));
        handle
    }
}

impl OperationApi for FakeOperations {
    fn status<'a>(
        &'a self,
        operation: &'a OperationHandle,
    ) -> BoxFuture<'a, Result<OperationStatus, ProvisionerError>> {
        Box::pin(async move {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get_mut(&operation.name) {
                None => Err(ProvisionerError::NotFound {
                    kind: "operation".into(),
                    name: operation.name.clone(),
                }),
                Some(Err(message)) => Ok(OperationStatus::Failed(message.clone())),
                Some(Ok(0)) => Ok(OperationStatus::Done),
                Some(Ok(remaining)) => {
                    *remaining -= 1;
                    Ok(OperationStatus::Running)
                }
            }
        })
    }
}

/// Provider for one kind, keeping objects by name.
pub struct FakeApi<S> {
    kind: &'static str,
    log: CallLog,
    pub objects: Mutex<BTreeMap<String, S>>,
    /// `"{verb} {name}"` calls that fail with a provider error.
    failures: Mutex<BTreeMap<String, String>>,
    /// Mutations run as async jobs taking this many polls.
    async_jobs: Option<(Arc<FakeOperations>, usize)>,
    failing_jobs: Mutex<BTreeMap<String, String>>,
    updatable: bool,
    fill: Option<fn(&mut S)>,
}

fn name_of<S: Serialize>(spec: &S) -> String {
    serde_json::to_value(spec)
        .ok()
        .and_then(|v| v.get("name").and_then(|n| n.as_str()).map(String::from))
        .unwrap_or_default()
}

impl<S> FakeApi<S>
where
    S: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    pub fn new(kind: &'static str, log: CallLog) -> Self {
        Self {
            kind,
            log,
            objects: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(BTreeMap::new()),
            async_jobs: None,
            failing_jobs: Mutex::new(BTreeMap::new()),
            updatable: true,
            fill: None,
        }
    }

    pub fn with_async_jobs(mut self, operations: Arc<FakeOperations>, polls: usize) -> Self {
        self.async_jobs = Some((operations, polls));
        self
    }

    /// Provider-assigned attributes set on every create.
    pub fn with_fill(mut self, fill: fn(&mut S)) -> Self {
        self.fill = Some(fill);
        self
    }

    pub fn without_update(mut self) -> Self {
        self.updatable = false;
        self
    }

    /// Make the next `verb` (`create`, `update`, `delete`) of `name` fail.
    pub fn fail(&self, verb: &str, name: &str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(format!("{verb} {name}"), message.to_string());
    }

    /// Make the async job of the next `verb` of `name` fail.
    pub fn fail_job(&self, verb: &str, name: &str, message: &str) {
        self.failing_jobs
            .lock()
            .unwrap()
            .insert(format!("{verb} {name}"), message.to_string());
    }

    pub fn get(&self, name: &str) -> Option<S> {
        self.objects.lock().unwrap().get(name).cloned()
    }

    pub fn insert(&self, spec: S) {
        let name = name_of(&spec);
        self.objects.lock().unwrap().insert(name, spec);
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    fn record(&self, verb: &str, name: &str) -> Result<Submitted, ProvisionerError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{verb} {}/{name}", self.kind));
        if let Some(message) = self.failures.lock().unwrap().remove(&format!("{verb} {name}")) {
            return Err(ProvisionerError::Provider(message));
        }
        let failing = self
            .failing_jobs
            .lock()
            .unwrap()
            .remove(&format!("{verb} {name}"));
        Ok(match (&self.async_jobs, failing) {
            (Some((operations, _)), Some(message)) => {
                Submitted::pending(operations.start_failing(&message))
            }
            (Some((operations, polls)), None) => Submitted::pending(operations.start(*polls)),
            (None, _) => Submitted::done(),
        })
    }
}

impl<S> ResourceApi<S> for FakeApi<S>
where
    S: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    fn read<'a>(&'a self, id: &'a Identity) -> BoxFuture<'a, Result<Option<S>, ProvisionerError>> {
        Box::pin(async move {
            let name = id.str("name").unwrap_or_default();
            Ok(self.get(name))
        })
    }

    fn create<'a>(&'a self, wanted: &'a S) -> BoxFuture<'a, Result<Submitted, ProvisionerError>> {
        Box::pin(async move {
            let name = name_of(wanted);
            let submitted = self.record("create", &name)?;
            let mut stored = wanted.clone();
            if let Some(fill) = self.fill {
                fill(&mut stored);
            }
            self.objects.lock().unwrap().insert(name, stored);
            Ok(submitted)
        })
    }

    fn update<'a>(
        &'a self,
        wanted: &'a S,
        changed: &'a [String],
        _id: &'a Identity,
    ) -> BoxFuture<'a, Result<Submitted, ProvisionerError>> {
        Box::pin(async move {
            if !self.updatable {
                return Err(ProvisionerError::Unimplemented(format!(
                    "in-place update of {}",
                    changed.join(", ")
                )));
            }
            let name = name_of(wanted);
            let submitted = self.record("update", &name)?;
            self.objects.lock().unwrap().insert(name, wanted.clone());
            Ok(submitted)
        })
    }

    fn delete<'a>(&'a self, id: &'a Identity) -> BoxFuture<'a, Result<Submitted, ProvisionerError>> {
        Box::pin(async move {
            let name = id.str("name").unwrap_or_default().to_string();
            let submitted = self.record("delete", &name)?;
            match self.objects.lock().unwrap().remove(&name) {
                Some(_) => Ok(submitted),
                None => Err(ProvisionerError::NotFound {
                    kind: self.kind.to_string(),
                    name,
                }),
            }
        })
    }
}

/// Buckets with an in-memory object store each.
pub struct FakeBuckets {
    pub api: FakeApi<BucketSpec>,
    pub contents: Mutex<BTreeMap<String, Arc<MemoryStore>>>,
}

impl FakeBuckets {
    pub fn contents(&self, bucket: &str) -> Arc<MemoryStore> {
        self.contents
            .lock()
            .unwrap()
            .entry(bucket.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::new()))
            .clone()
    }
}

impl ResourceApi<BucketSpec> for FakeBuckets {
    fn read<'a>(
        &'a self,
        id: &'a Identity,
    ) -> BoxFuture<'a, Result<Option<BucketSpec>, ProvisionerError>> {
        self.api.read(id)
    }

    fn create<'a>(
        &'a self,
        wanted: &'a BucketSpec,
    ) -> BoxFuture<'a, Result<Submitted, ProvisionerError>> {
        self.api.create(wanted)
    }

    fn update<'a>(
        &'a self,
        wanted: &'a BucketSpec,
        changed: &'a [String],
        id: &'a Identity,
    ) -> BoxFuture<'a, Result<Submitted, ProvisionerError>> {
        self.api.update(wanted, changed, id)
    }

    fn delete<'a>(&'a self, id: &'a Identity) -> BoxFuture<'a, Result<Submitted, ProvisionerError>> {
        Box::pin(async move {
            let name = id.str("name").unwrap_or_default();
            if !self.contents(name).is_empty() {
                return Err(ProvisionerError::Provider(format!("bucket {name} is not empty")));
            }
            self.api.delete(id).await
        })
    }
}

impl BucketApi for FakeBuckets {
    fn objects(&self, bucket: &str) -> Result<Arc<dyn BlobStore>, ProvisionerError> {
        Ok(self.contents(bucket))
    }
}

/// Serverless services whose digest follows the image.
pub struct FakeServices {
    pub api: FakeApi<ServiceSpec>,
    generation: AtomicI64,
    condition: Mutex<Condition>,
    /// Generation reported by the next `stale_polls` status reads lags.
    stale_polls: AtomicUsize,
    pub status_reads: AtomicUsize,
}

pub fn digest_of(image: &str) -> String {
    format!("sha256:{}", image.replace([':', '/'], "-"))
}

impl FakeServices {
    pub fn set_condition(&self, condition: Condition) {
        *self.condition.lock().unwrap() = condition;
    }

    pub fn lag_polls(&self, n: usize) {
        self.stale_polls.store(n, Ordering::SeqCst);
    }

    fn resolve(&self, wanted: &ServiceSpec) -> ServiceSpec {
        let mut stored = wanted.clone();
        stored.image_digest = Some(digest_of(&wanted.image));
        stored.url = Some(format!("https://{}.run.example", wanted.name));
        stored
    }
}

impl ResourceApi<ServiceSpec> for FakeServices {
    fn read<'a>(
        &'a self,
        id: &'a Identity,
    ) -> BoxFuture<'a, Result<Option<ServiceSpec>, ProvisionerError>> {
        self.api.read(id)
    }

    fn create<'a>(
        &'a self,
        wanted: &'a ServiceSpec,
    ) -> BoxFuture<'a, Result<Submitted, ProvisionerError>> {
        Box::pin(async move {
            let resolved = self.resolve(wanted);
            let mut submitted = self.api.create(&resolved).await?;
            submitted.generation = Some(self.generation.fetch_add(1, Ordering::SeqCst) + 1);
            Ok(submitted)
        })
    }

    fn update<'a>(
        &'a self,
        wanted: &'a ServiceSpec,
        changed: &'a [String],
        id: &'a Identity,
    ) -> BoxFuture<'a, Result<Submitted, ProvisionerError>> {
        Box::pin(async move {
            let resolved = self.resolve(wanted);
            let mut submitted = self.api.update(&resolved, changed, id).await?;
            submitted.generation = Some(self.generation.fetch_add(1, Ordering::SeqCst) + 1);
            Ok(submitted)
        })
    }

    fn delete<'a>(&'a self, id: &'a Identity) -> BoxFuture<'a, Result<Submitted, ProvisionerError>> {
        self.api.delete(id)
    }
}

impl ServiceApi for FakeServices {
    fn status<'a>(
        &'a self,
        id: &'a Identity,
    ) -> BoxFuture<'a, Result<ServiceStatus, ProvisionerError>> {
        Box::pin(async move {
            self.status_reads.fetch_add(1, Ordering::SeqCst);
            let name = id.str("name").unwrap_or_default();
            let spec = self.api.get(name).ok_or_else(|| ProvisionerError::NotFound {
                kind: "serverless_service".into(),
                name: name.to_string(),
            })?;
            let generation = self.generation.load(Ordering::SeqCst);
            let stale = self
                .stale_polls
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            Ok(ServiceStatus {
                observed_generation: Some(if stale { generation - 1 } else { generation }),
                ready: self.condition.lock().unwrap().clone(),
                image_digest: spec.image_digest,
                url: spec.url,
            })
        })
    }
}

/// Records every invalidation request.
#[derive(Default)]
pub struct FakeCache {
    pub requests: Mutex<Vec<(String, String, String)>>,
}

impl FakeCache {
    pub fn requests(&self) -> Vec<(String, String, String)> {
        let mut out = self.requests.lock().unwrap().clone();
        out.sort();
        out
    }
}

impl CacheInvalidator for FakeCache {
    fn invalidate<'a>(
        &'a self,
        url_map: &'a str,
        host: &'a str,
        path: &'a str,
    ) -> BoxFuture<'a, Result<Submitted, ProvisionerError>> {
        Box::pin(async move {
            self.requests
                .lock()
                .unwrap()
                .push((url_map.to_string(), host.to_string(), path.to_string()));
            Ok(Submitted::done())
        })
    }
}

/// One fake per provider capability, sharing a call log.
pub struct Fakes {
    pub log: CallLog,
    pub operations: Arc<FakeOperations>,
    pub cache: Arc<FakeCache>,
    pub buckets: Arc<FakeBuckets>,
    pub services: Arc<FakeServices>,
    pub sql_instances: Arc<FakeApi<SqlInstanceSpec>>,
    pub sql_databases: Arc<FakeApi<converge_provisioner::resources::sql_database::SqlDatabaseSpec>>,
    pub sql_users: Arc<FakeApi<converge_provisioner::resources::sql_user::SqlUserSpec>>,
    pub serverless_negs:
        Arc<FakeApi<converge_provisioner::resources::serverless_neg::ServerlessNegSpec>>,
    pub backend_services:
        Arc<FakeApi<converge_provisioner::resources::backend_service::BackendServiceSpec>>,
    pub url_maps: Arc<FakeApi<converge_provisioner::resources::url_map::UrlMapSpec>>,
    pub ssl_certificates:
        Arc<FakeApi<converge_provisioner::resources::ssl_certificate::SslCertificateSpec>>,
    pub https_proxies: Arc<FakeApi<converge_provisioner::resources::https_proxy::HttpsProxySpec>>,
    pub addresses: Arc<FakeApi<AddressSpec>>,
    pub forwarding_rules:
        Arc<FakeApi<converge_provisioner::resources::forwarding_rule::ForwardingRuleSpec>>,
    pub scheduler_jobs:
        Arc<FakeApi<converge_provisioner::resources::scheduler_job::SchedulerJobSpec>>,
}

fn fill_instance(spec: &mut SqlInstanceSpec) {
    spec.connection_name = Some(format!("demo:{}:{}", spec.region, spec.name));
    spec.ip_address = Some("10.0.0.3".to_string());
}

fn fill_address(spec: &mut AddressSpec) {
    spec.ip_address = Some("203.0.113.10".to_string());
}

impl Fakes {
    pub fn new() -> Self {
        let log: CallLog = Arc::default();
        let operations = Arc::new(FakeOperations::default());
        Self {
            operations: operations.clone(),
            cache: Arc::new(FakeCache::default()),
            buckets: Arc::new(FakeBuckets {
                api: FakeApi::new("bucket", log.clone()),
                contents: Mutex::new(BTreeMap::new()),
            }),
            services: Arc::new(FakeServices {
                api: FakeApi::new("serverless_service", log.clone()),
                generation: AtomicI64::new(0),
                condition: Mutex::new(Condition::True),
                stale_polls: AtomicUsize::new(0),
                status_reads: AtomicUsize::new(0),
            }),
            sql_instances: Arc::new(
                FakeApi::new("sql_instance", log.clone())
                    .with_async_jobs(operations, 2)
                    .with_fill(fill_instance),
            ),
            sql_databases: Arc::new(FakeApi::new("sql_database", log.clone())),
            sql_users: Arc::new(FakeApi::new("sql_user", log.clone())),
            serverless_negs: Arc::new(FakeApi::new("serverless_neg", log.clone())),
            backend_services: Arc::new(FakeApi::new("backend_service", log.clone())),
            url_maps: Arc::new(FakeApi::new("url_map", log.clone())),
            ssl_certificates: Arc::new(FakeApi::new("ssl_certificate", log.clone())),
            https_proxies: Arc::new(FakeApi::new("https_proxy", log.clone())),
            addresses: Arc::new(FakeApi::new("address", log.clone()).with_fill(fill_address)),
            forwarding_rules: Arc::new(FakeApi::new("forwarding_rule", log.clone())),
            scheduler_jobs: Arc::new(FakeApi::new("scheduler_job", log.clone())),
            log,
        }
    }

    pub fn providers(&self) -> Providers {
        Providers {
            operations: self.operations.clone(),
            cache: self.cache.clone(),
            buckets: self.buckets.clone(),
            services: self.services.clone(),
            sql_instances: self.sql_instances.clone(),
            sql_databases: self.sql_databases.clone(),
            sql_users: self.sql_users.clone(),
            serverless_negs: self.serverless_negs.clone(),
            backend_services: self.backend_services.clone(),
            url_maps: self.url_maps.clone(),
            ssl_certificates: self.ssl_certificates.clone(),
            https_proxies: self.https_proxies.clone(),
            addresses: self.addresses.clone(),
            forwarding_rules: self.forwarding_rules.clone(),
            scheduler_jobs: self.scheduler_jobs.clone(),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.log.lock().unwrap().clear();
    }

    /// Position of `call` in the log.
    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }
}

/// Log to the test output, filtered by `RUST_LOG` (default `warn`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Engine settings for tests: fast polling, no local state copy.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        operation_poll_interval_ms: 1,
        readiness_poll_interval_ms: 1,
        lock_poll_interval_ms: 1,
        local_state_dir: None,
        ..EngineConfig::default()
    }
}

pub fn fast_settings() -> converge_provisioner::ApplySettings {
    converge_provisioner::ApplySettings {
        concurrency: 5,
        operation_poll_interval: Duration::from_millis(1),
        readiness_poll_interval: Duration::from_millis(1),
    }
}

/// A progress sink and the events it collected.
pub fn collecting_sink() -> (ProgressSink, Arc<Mutex<Vec<ProgressEvent>>>) {
    let events: Arc<Mutex<Vec<ProgressEvent>>> = Arc::default();
    let sink_events = events.clone();
    let sink: ProgressSink = Arc::new(move |event: &ProgressEvent| {
        sink_events.lock().unwrap().push(event.clone());
    });
    (sink, events)
}
