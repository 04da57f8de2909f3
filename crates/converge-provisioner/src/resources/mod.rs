//! Standard resource kinds.
//!
//! Each kind maps a typed spec onto [`Field`]s and forwards mutations to the
//! provider trait object it was constructed with. Every kind keeps the
//! remote object's name in an identity field called `name` (held in the
//! struct as `id`). The shared read/apply plumbing lives here.

pub mod address;
pub mod backend_service;
pub mod bucket;
pub mod forwarding_rule;
pub mod https_proxy;
pub mod scheduler_job;
pub mod serverless_neg;
pub mod service;
pub mod sql_database;
pub mod sql_instance;
pub mod sql_user;
pub mod ssl_certificate;
pub mod url_map;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::apply::{self, ApplyContext, ApplyOutcome};
use crate::error::ProvisionerError;
use crate::field::Field;
use crate::payload::Payload;
use crate::plan::{OperationKind, PlanOperation};
use crate::provider::{ResourceApi, Submitted};
use crate::resource::{self, Resource};

/// Set or clear a field's wanted slot from optional configuration.
pub(crate) fn want<T: Clone + PartialEq>(
    field: &mut Field<T>,
    value: Option<T>,
) -> Result<(), ProvisionerError> {
    match value {
        Some(v) => field.set_wanted(v)?,
        None => field.clear_wanted(),
    }
    Ok(())
}

/// Read the remote object through `api` and record what was observed.
///
/// Nothing to address (no identity yet) and a not-found object both record
/// absence.
pub(crate) async fn read_with<S, A>(
    resource: &mut dyn Resource,
    api: &A,
) -> Result<(), ProvisionerError>
where
    S: Serialize + Send,
    A: ResourceApi<S> + ?Sized,
{
    let id = resource::identity(resource)?;
    if id.is_empty() {
        return resource::observe(resource, None);
    }
    let observed = match api.read(&id).await {
        Ok(observed) => observed,
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e.with_resource(resource.kind(), resource.name())),
    };
    tracing::debug!(addr = %resource.key(), exists = observed.is_some(), "read resource");
    let observed = observed.map(|spec| Payload::from_typed(&spec)).transpose()?;
    resource::observe(resource, observed)
}

/// Submit one plan operation through `api`.
pub(crate) async fn submit_with<S, A>(
    resource: &dyn Resource,
    api: &A,
    op: &PlanOperation,
    ctx: &ApplyContext,
) -> Result<Submitted, ProvisionerError>
where
    S: DeserializeOwned + Send + Sync,
    A: ResourceApi<S> + ?Sized,
{
    let current = resource::current_payload(resource)?;
    let identity = resource::identity(resource)?;
    apply::submit::<S, A>(api, op, &current, &identity, ctx).await
}

/// The whole apply for kinds with nothing beyond the provider call.
pub(crate) async fn apply_with<S, A>(
    resource: &dyn Resource,
    api: &A,
    op: &PlanOperation,
    ctx: &ApplyContext,
) -> Result<ApplyOutcome, ProvisionerError>
where
    S: DeserializeOwned + Send + Sync,
    A: ResourceApi<S> + ?Sized,
{
    let submitted = submit_with::<S, A>(resource, api, op, ctx).await?;
    Ok(ApplyOutcome::with_outputs(submitted.outputs))
}

/// Like [`apply_with`], then read the object back to pick up the listed
/// provider-assigned fields.
pub(crate) async fn apply_reading_outputs<S, A>(
    resource: &dyn Resource,
    api: &A,
    op: &PlanOperation,
    ctx: &ApplyContext,
    outputs: &[&str],
) -> Result<ApplyOutcome, ProvisionerError>
where
    S: Serialize + DeserializeOwned + Send + Sync,
    A: ResourceApi<S> + ?Sized,
{
    let mut outcome = apply_with::<S, A>(resource, api, op, ctx).await?;
    if op.kind == OperationKind::Delete {
        return Ok(outcome);
    }
    let id = resource::identity(resource)?;
    if let Some(observed) = api.read(&id).await? {
        let observed = Payload::from_typed(&observed)?;
        for (k, v) in observed.select(outputs.iter().copied()).iter() {
            outcome.outputs.insert(k, v.clone());
        }
    }
    Ok(outcome)
}

/// Normalizer for unordered string lists.
#[allow(clippy::ptr_arg)]
pub(crate) fn sorted(values: &Vec<String>) -> Vec<String> {
    let mut out = values.clone();
    out.sort();
    out.dedup();
    out
}
