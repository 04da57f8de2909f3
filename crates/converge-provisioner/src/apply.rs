//! Apply executor.
//!
//! Executes a [`PlanAction`]'s operations strictly in order against the
//! resource, reporting progress after every unit and copying applied values
//! into current state after every successful operation. A failure stops the
//! action; operations that already succeeded keep their state updates.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::ProvisionerError;
use crate::instance_lock::InstanceLocks;
use crate::payload::{Identity, Payload};
use crate::plan::{OperationKind, PlanAction, PlanOperation};
use crate::progress::{ProgressSink, StepReporter};
use crate::provider::{OperationApi, OperationHandle, OperationStatus, ResourceApi, Submitted};
use crate::resource::Resource;

/// Timing and width of apply-time work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplySettings {
    /// Width of bounded worker pools.
    pub concurrency: usize,
    pub operation_poll_interval: Duration,
    pub readiness_poll_interval: Duration,
}

impl Default for ApplySettings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            operation_poll_interval: Duration::from_secs(2),
            readiness_poll_interval: Duration::from_secs(5),
        }
    }
}

/// Shared by every action of one apply run.
pub struct ApplyEnv {
    pub operations: Arc<dyn OperationApi>,
    pub instance_locks: Arc<InstanceLocks>,
    pub settings: ApplySettings,
    pub cancel: CancellationToken,
    pub progress: Option<ProgressSink>,
}

/// What a resource hands to one operation.
pub struct ApplyContext {
    pub env: Arc<ApplyEnv>,
    pub reporter: StepReporter,
}

impl ApplyContext {
    pub fn cancel(&self) -> &CancellationToken {
        &self.env.cancel
    }

    pub fn settings(&self) -> &ApplySettings {
        &self.env.settings
    }

    /// Block until a provider job finishes.
    pub async fn wait(&self, operation: &OperationHandle) -> Result<(), ProvisionerError> {
        wait_for_operation(
            self.env.operations.as_ref(),
            operation,
            self.env.settings.operation_poll_interval,
            &self.env.cancel,
        )
        .await
    }
}

/// Result of one operation beyond the payload itself.
#[derive(Debug, Clone, Default)]
pub struct ApplyOutcome {
    /// Provider-assigned field values to record as current.
    pub outputs: Payload,
    /// Served content changed (new files, new image digest).
    pub content_changed: bool,
}

impl ApplyOutcome {
    pub fn with_outputs(outputs: Payload) -> Self {
        Self {
            outputs,
            content_changed: false,
        }
    }

    fn merge(&mut self, other: ApplyOutcome) {
        for (k, v) in other.outputs.iter() {
            self.outputs.insert(k, v.clone());
        }
        self.content_changed |= other.content_changed;
    }
}

/// Poll `operation` every `interval` until it reaches a terminal state.
///
/// A failed job surfaces the provider's message verbatim.
pub async fn wait_for_operation(
    api: &dyn OperationApi,
    operation: &OperationHandle,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<(), ProvisionerError> {
    loop {
        if cancel.is_cancelled() {
            return Err(ProvisionerError::Cancelled);
        }
        match api.status(operation).await? {
            OperationStatus::Done => return Ok(()),
            OperationStatus::Failed(message) => {
                return Err(ProvisionerError::OperationFailed {
                    operation: operation.name.clone(),
                    message,
                });
            }
            OperationStatus::Running => {
                tracing::debug!(operation = %operation.name, "operation still running");
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(ProvisionerError::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// The common create/update/delete path: decode the payload into the
/// provider's typed spec, submit, and wait for any asynchronous job.
///
/// For updates the payload is laid over `current` so the provider sees the
/// complete desired object. Deleting an object that is already gone counts
/// as success.
pub async fn submit<S, A>(
    api: &A,
    op: &PlanOperation,
    current: &Payload,
    identity: &Identity,
    ctx: &ApplyContext,
) -> Result<Submitted, ProvisionerError>
where
    S: DeserializeOwned + Send + Sync,
    A: ResourceApi<S> + ?Sized,
{
    let submitted = match op.kind {
        OperationKind::Create => {
            let spec: S = op.payload.to_typed()?;
            api.create(&spec).await?
        }
        OperationKind::Update => {
            let spec: S = op.payload.overlay_on(current).to_typed()?;
            let identity_fields: BTreeSet<&str> = identity.keys().collect();
            let changed = op.changed_fields(&identity_fields);
            api.update(&spec, &changed, identity).await?
        }
        OperationKind::Delete => match api.delete(&op.payload).await {
            Ok(submitted) => submitted,
            Err(e) if e.is_not_found() => {
                tracing::debug!("object already absent");
                Submitted::done()
            }
            Err(e) => return Err(e),
        },
    };

    if let Some(operation) = &submitted.operation {
        match ctx.wait(operation).await {
            Err(e) if op.kind == OperationKind::Delete && e.is_not_found() => {}
            other => other?,
        }
    }

    Ok(submitted)
}

/// Copy an operation's effect into current values.
fn absorb(
    resource: &mut dyn Resource,
    op: &PlanOperation,
    outcome: &ApplyOutcome,
) -> Result<(), ProvisionerError> {
    for field in resource.fields_mut() {
        match op.kind {
            OperationKind::Delete => field.load_current(None)?,
            OperationKind::Create | OperationKind::Update => {
                if let Some(v) = outcome.outputs.get(field.name()) {
                    field.load_current(Some(v.clone()))?;
                } else if !field.is_output() {
                    if let Some(v) = op.payload.get(field.name()) {
                        field.load_current(Some(v.clone()))?;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Execute every operation of `action` in order.
pub async fn execute_action(
    resource: &mut dyn Resource,
    action: &PlanAction,
    env: &Arc<ApplyEnv>,
) -> Result<ApplyOutcome, ProvisionerError> {
    let kind = resource.kind();
    let name = resource.name().to_string();
    let reporter = StepReporter::new(env.progress.clone(), &name, kind, action.total_steps());
    let mut outcome = ApplyOutcome::default();

    for (index, op) in action.operations.iter().enumerate() {
        reporter.begin_operation(index, op.steps);

        if env.cancel.is_cancelled() {
            reporter.fail();
            return Err(ProvisionerError::Cancelled);
        }

        tracing::info!(addr = %action.key, step = index, "{} resource", op.kind.verb());

        let ctx = ApplyContext {
            env: env.clone(),
            reporter: reporter.clone(),
        };
        let result = match resource.apply(op, &ctx).await {
            Ok(result) => result,
            Err(e) => {
                reporter.fail();
                tracing::warn!(addr = %action.key, error = %e, "apply step failed");
                return Err(e.with_resource(kind, &name));
            }
        };

        if let Err(e) = absorb(resource, op, &result) {
            reporter.fail();
            return Err(e);
        }
        outcome.merge(result);
        reporter.finish_operation();
    }

    Ok(outcome)
}
