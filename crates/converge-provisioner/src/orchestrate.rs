//! Engine orchestration: lock, load, plan, apply, persist, unlock.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use converge_core::{ResourceKey, keys};
use converge_storage::{BlobStore, LockManager, StorageError};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::apply::{self, ApplyEnv, ApplyOutcome};
use crate::config::EngineConfig;
use crate::error::ProvisionerError;
use crate::instance_lock::InstanceLocks;
use crate::persistence::StatePersistence;
use crate::plan::{ActionKind, Plan, PlanAction};
use crate::progress::{ProgressSink, StepReporter};
use crate::provider::Providers;
use crate::registry::Registry;
use crate::resource;
use crate::resources::backend_service;
use crate::routing::{self, Invalidation};
use crate::state::ProvisionerState;
use crate::workspace::{Topology, Workspace};

/// Progress `object_kind` reported for cache invalidations.
pub const INVALIDATION_KIND: &str = "cache_invalidation";

/// What one apply run did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyReport {
    pub plan: Plan,
    /// Resources whose served content changed.
    pub content_changed: Vec<ResourceKey>,
    /// Cache invalidations issued, per URL map.
    pub invalidations: BTreeMap<String, Vec<CacheFlush>>,
}

/// One issued cache invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheFlush {
    pub host: String,
    pub path: String,
}

impl From<Invalidation> for CacheFlush {
    fn from(i: Invalidation) -> Self {
        Self {
            host: i.host,
            path: i.path,
        }
    }
}

/// Reconciles topologies against providers, with state kept in a shared
/// blob store.
pub struct Engine {
    providers: Providers,
    registry: Registry,
    store: Arc<dyn BlobStore>,
    config: EngineConfig,
    progress: Option<ProgressSink>,
    owner: Option<String>,
}

impl Engine {
    pub fn new(providers: Providers, store: Arc<dyn BlobStore>) -> Self {
        Self {
            providers,
            registry: Registry::standard(),
            store,
            config: EngineConfig::default(),
            progress: None,
            owner: None,
        }
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Lock owner string. Defaults to `user@host`.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn persistence(&self, project: &str, environment: &str) -> Result<StatePersistence, ProvisionerError> {
        let persistence = StatePersistence::new(self.store.clone(), project, environment)?;
        Ok(match &self.config.local_state_dir {
            Some(dir) => persistence.with_local_dir(dir),
            None => persistence,
        })
    }

    async fn prepare(
        &self,
        topology: &Topology,
        persistence: &StatePersistence,
    ) -> Result<(ProvisionerState, Workspace), ProvisionerError> {
        let state = persistence.load().await?;
        if state.project != topology.project || state.environment != topology.environment {
            return Err(ProvisionerError::State(format!(
                "state at {} belongs to {}/{}",
                persistence.key, state.project, state.environment
            )));
        }
        let mut workspace = Workspace::assemble(&self.registry, &self.providers, &state, topology)?;
        if self.config.refresh {
            workspace.refresh(self.config.concurrency).await?;
        }
        Ok((state, workspace))
    }

    /// Compute the plan for `topology` without changing anything.
    ///
    /// Takes no lock: the plan may be stale by the time it is applied.
    pub async fn plan(&self, topology: &Topology) -> Result<Plan, ProvisionerError> {
        let persistence = self.persistence(&topology.project, &topology.environment)?;
        let (_, workspace) = self.prepare(topology, &persistence).await?;
        workspace.plan()
    }

    /// Converge the environment to `topology`.
    pub async fn deploy(
        &self,
        topology: &Topology,
        cancel: &CancellationToken,
    ) -> Result<ApplyReport, ProvisionerError> {
        let locks = self.lock_manager(&topology.project, &topology.environment);
        let handles = locks
            .acquire(&[keys::STATE_LOCK], self.config.lock_wait(), cancel)
            .await
            .map_err(lock_error)?;

        let result = self.deploy_locked(topology, cancel).await;

        match (result, locks.release_all(handles).await) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(release_err)) => Err(release_err.into()),
            (Err(e), release) => {
                if let Err(release_err) = release {
                    tracing::warn!(error = %release_err, "failed to release state lock");
                }
                Err(e)
            }
        }
    }

    /// Delete everything recorded for one project environment.
    pub async fn destroy(
        &self,
        project: &str,
        environment: &str,
        cancel: &CancellationToken,
    ) -> Result<ApplyReport, ProvisionerError> {
        self.deploy(&Topology::new(project, environment), cancel).await
    }

    fn lock_manager(&self, project: &str, environment: &str) -> LockManager {
        let locks = LockManager::new(self.store.clone(), project, environment)
            .with_poll_interval(self.config.lock_poll_interval());
        match &self.owner {
            Some(owner) => locks.with_owner(owner.clone()),
            None => locks,
        }
    }

    async fn deploy_locked(
        &self,
        topology: &Topology,
        cancel: &CancellationToken,
    ) -> Result<ApplyReport, ProvisionerError> {
        let persistence = self.persistence(&topology.project, &topology.environment)?;
        let (mut state, mut workspace) = self.prepare(topology, &persistence).await?;
        let plan = workspace.plan()?;
        let summary = plan.summary();
        tracing::info!(
            project = %topology.project,
            environment = %topology.environment,
            create = summary.create,
            update = summary.update,
            recreate = summary.recreate,
            delete = summary.delete,
            unchanged = summary.unchanged,
            "plan ready"
        );
        if !plan.has_changes() {
            tracing::info!("all resources in sync, no changes needed");
        }

        let env = Arc::new(ApplyEnv {
            operations: self.providers.operations.clone(),
            instance_locks: Arc::new(InstanceLocks::new()),
            settings: self.config.apply_settings(),
            cancel: cancel.clone(),
            progress: self.progress.clone(),
        });

        let changed =
            execute_plan(&mut workspace, &plan, &env, &mut state, &persistence).await?;

        // Records what refresh observed even when nothing was applied.
        workspace.capture(&mut state)?;
        persistence.flush(&state).await?;

        let invalidations = self.invalidate_caches(&workspace, &changed, &env).await?;

        Ok(ApplyReport {
            plan,
            content_changed: changed.into_iter().collect(),
            invalidations,
        })
    }

    /// Invalidate the edge cache for every route whose caching backend
    /// (or anything behind it) served changed content.
    async fn invalidate_caches(
        &self,
        workspace: &Workspace,
        changed: &BTreeSet<ResourceKey>,
        env: &Arc<ApplyEnv>,
    ) -> Result<BTreeMap<String, Vec<CacheFlush>>, ProvisionerError> {
        let mut issued = BTreeMap::new();
        if changed.is_empty() {
            return Ok(issued);
        }

        for url_map in workspace.iter().filter(|r| resource::is_wanted(*r)) {
            let Some(table) = url_map.routing_table() else {
                continue;
            };
            let stale: BTreeSet<String> = routing::backends(table)
                .into_iter()
                .filter(|name| {
                    let key = ResourceKey::new(backend_service::KIND, name.clone());
                    workspace.get(&key).is_some_and(|b| b.caching())
                        && !workspace.closure(&key).is_disjoint(changed)
                })
                .collect();
            let requests = routing::invalidations(table, &stale);
            if requests.is_empty() {
                continue;
            }

            let map_name = url_map.name().to_string();
            tracing::info!(url_map = %map_name, count = requests.len(), "invalidating cache");
            let reporter = StepReporter::new(
                self.progress.clone(),
                &map_name,
                INVALIDATION_KIND,
                requests.len(),
            );
            reporter.begin_operation(0, requests.len());

            let result = stream::iter(requests.iter())
                .map(|request| {
                    let map_name = map_name.as_str();
                    let reporter = &reporter;
                    async move {
                        let submitted = self
                            .providers
                            .cache
                            .invalidate(map_name, &request.host, &request.path)
                            .await?;
                        if let Some(operation) = &submitted.operation {
                            apply::wait_for_operation(
                                env.operations.as_ref(),
                                operation,
                                env.settings.operation_poll_interval,
                                &env.cancel,
                            )
                            .await?;
                        }
                        tracing::debug!(host = %request.host, path = %request.path, "cache invalidated");
                        reporter.advance(1);
                        Ok::<_, ProvisionerError>(())
                    }
                })
                .buffer_unordered(env.settings.concurrency.max(1))
                .try_collect::<Vec<()>>()
                .await;

            if let Err(e) = result {
                reporter.fail();
                return Err(e);
            }
            reporter.finish_operation();
            issued.insert(map_name, requests.into_iter().map(CacheFlush::from).collect());
        }
        Ok(issued)
    }
}

fn lock_error(e: StorageError) -> ProvisionerError {
    match e {
        StorageError::LockHeld {
            name,
            owner,
            generation,
        } => ProvisionerError::Conflict {
            key: name,
            owner,
            generation,
        },
        StorageError::Cancelled => ProvisionerError::Cancelled,
        other => other.into(),
    }
}

/// Apply `plan` to `workspace`.
///
/// Creates, updates and recreates run level by level, bottom-up, with the
/// resources of one level applied concurrently. Pure deletions follow in
/// reverse level order. State is captured and flushed after every level,
/// including the one that failed, so partial progress survives.
///
/// Returns the resources whose served content changed.
pub async fn execute_plan(
    workspace: &mut Workspace,
    plan: &Plan,
    env: &Arc<ApplyEnv>,
    state: &mut ProvisionerState,
    persistence: &StatePersistence,
) -> Result<BTreeSet<ResourceKey>, ProvisionerError> {
    let levels = workspace.levels()?;
    let actions: BTreeMap<&ResourceKey, &PlanAction> = plan
        .actions
        .iter()
        .filter(|a| !a.is_noop())
        .map(|a| (&a.key, a))
        .collect();

    let forward = levels.iter().map(|level| (level, false));
    let backward = levels.iter().rev().map(|level| (level, true));

    let mut changed = BTreeSet::new();
    for (level, deletions) in forward.chain(backward) {
        let batch: BTreeMap<&ResourceKey, &PlanAction> = level
            .iter()
            .filter_map(|key| actions.get(key).map(|a| (key, *a)))
            .filter(|(_, a)| (a.action == ActionKind::Delete) == deletions)
            .collect();
        if batch.is_empty() {
            continue;
        }

        let result = run_batch(workspace, &batch, env, &mut changed).await;

        let persisted = match workspace.capture(state) {
            Ok(()) => persistence.flush(state).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            if let Err(persist_err) = persisted {
                tracing::warn!(error = %persist_err, "failed to persist state after apply failure");
            }
            return Err(e);
        }
        persisted?;
    }

    Ok(changed)
}

/// Execute `batch` with bounded concurrency. Once one action fails, no
/// further actions are started; those already running finish.
async fn run_batch(
    workspace: &mut Workspace,
    batch: &BTreeMap<&ResourceKey, &PlanAction>,
    env: &Arc<ApplyEnv>,
    changed: &mut BTreeSet<ResourceKey>,
) -> Result<(), ProvisionerError> {
    let selected: BTreeSet<&ResourceKey> = batch.keys().copied().collect();
    let failed = AtomicBool::new(false);
    let failed = &failed;

    let results: Vec<(ResourceKey, Option<Result<ApplyOutcome, ProvisionerError>>)> =
        stream::iter(workspace.select_mut(&selected))
            .map(|resource| {
                let key = resource.key();
                let action = batch.get(&key).copied();
                async move {
                    let Some(action) = action else {
                        return (key, None);
                    };
                    if failed.load(Ordering::SeqCst) {
                        return (key, None);
                    }
                    let result = apply::execute_action(resource.as_mut(), action, env).await;
                    if result.is_err() {
                        failed.store(true, Ordering::SeqCst);
                    }
                    (key, Some(result))
                }
            })
            .buffer_unordered(env.settings.concurrency.max(1))
            .collect()
            .await;

    let mut first_err = None;
    for (key, result) in results {
        match result {
            Some(Ok(outcome)) => {
                if outcome.content_changed {
                    changed.insert(key);
                }
            }
            Some(Err(e)) => {
                tracing::warn!(addr = %key, error = %e, "apply failed");
                first_err.get_or_insert(e);
            }
            None => {
                tracing::debug!(addr = %key, "skipped after earlier failure");
            }
        }
    }
    first_err.map_or(Ok(()), Err)
}
