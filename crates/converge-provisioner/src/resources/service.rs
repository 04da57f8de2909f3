use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::apply::{ApplyContext, ApplyOutcome};
use crate::error::ProvisionerError;
use crate::field::{AnyField, Field};
use crate::plan::{OperationKind, PlanOperation};
use crate::provider::{BoxFuture, ServiceApi};
use crate::readiness::{self, Condition, Observation};
use crate::resource::{self, FieldRef, Resource, Tier};
use crate::resources::{self as kinds, sql_instance};

pub const KIND: &str = "serverless_service";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Scaling {
    #[serde(default)]
    pub min_instances: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_instances: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub region: String,
    pub image: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cpu: Option<String>,
    #[serde(default)]
    pub memory: Option<String>,
    #[serde(default)]
    pub scaling: Option<Scaling>,
    /// SQL instances the service connects to.
    #[serde(default)]
    pub sql_instances: Vec<String>,
    /// Resolved digest of the running image.
    #[serde(default)]
    pub image_digest: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Revision status of a service.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceStatus {
    pub observed_generation: Option<i64>,
    pub ready: Condition,
    pub image_digest: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServiceConfig {
    region: String,
    image: String,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    cpu: Option<String>,
    #[serde(default)]
    memory: Option<String>,
    #[serde(default)]
    scaling: Option<Scaling>,
    #[serde(default)]
    sql_instances: Vec<String>,
}

fn scaling_or_default(scaling: &Option<Scaling>) -> Option<Scaling> {
    Some(scaling.clone().unwrap_or_default())
}

pub struct Service {
    name: String,
    api: Arc<dyn ServiceApi>,
    id: Field<String>,
    region: Field<String>,
    image: Field<String>,
    env: Field<BTreeMap<String, String>>,
    cpu: Field<Option<String>>,
    memory: Field<Option<String>>,
    scaling: Field<Option<Scaling>>,
    sql_instances: Field<Vec<String>>,
    image_digest: Field<Option<String>>,
    url: Field<Option<String>>,
    /// Digest of the instance removed by the delete half of a replacement.
    replaced_digest: Option<String>,
}

impl Service {
    pub fn new(name: &str, api: Arc<dyn ServiceApi>) -> Self {
        Self {
            name: name.to_string(),
            api,
            id: Field::new("name"),
            region: Field::force_new("region"),
            image: Field::new("image"),
            env: Field::new("env"),
            cpu: Field::new("cpu"),
            memory: Field::new("memory"),
            scaling: Field::new("scaling").normalized_by(scaling_or_default),
            sql_instances: Field::new("sql_instances").normalized_by(kinds::sorted),
            image_digest: Field::output("image_digest"),
            url: Field::output("url"),
            replaced_digest: None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.url.current_opt().and_then(|u| u.as_deref())
    }

    async fn create_or_update(
        &mut self,
        op: &PlanOperation,
        ctx: &ApplyContext,
    ) -> Result<ApplyOutcome, ProvisionerError> {
        let api = self.api.clone();
        let submitted = kinds::submit_with::<ServiceSpec, dyn ServiceApi>(&*self, api.as_ref(), op, ctx).await?;

        let id = resource::identity(&*self)?;
        let poll = || {
            let api = api.clone();
            let id = id.clone();
            async move {
                let status = api.status(&id).await?;
                Ok(Observation {
                    observed_generation: status.observed_generation,
                    condition: status.ready,
                })
            }
        };
        readiness::wait_until_ready(
            KIND,
            &self.name,
            submitted.generation,
            ctx.settings().readiness_poll_interval,
            ctx.cancel(),
            poll,
        )
        .await?;

        let status = api.status(&id).await?;
        let replaced = self.replaced_digest.take();
        let previous = self.image_digest.current_opt().cloned().flatten().or(replaced);
        let content_changed = match (&previous, &status.image_digest) {
            (Some(before), Some(after)) => before != after,
            _ => false,
        };
        if content_changed {
            tracing::info!(service = %self.name, digest = ?status.image_digest, "new image digest");
        }

        let mut outputs = submitted.outputs;
        outputs.insert("image_digest", serde_json::to_value(&status.image_digest)?);
        outputs.insert("url", serde_json::to_value(&status.url)?);
        Ok(ApplyOutcome {
            outputs,
            content_changed,
        })
    }
}

impl Resource for Service {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> Tier {
        Tier::App
    }

    fn fields(&self) -> Vec<FieldRef<'_>> {
        let instances = self
            .sql_instances
            .any()
            .into_iter()
            .flatten()
            .map(|i| converge_core::ResourceKey::new(sql_instance::KIND, i.clone()));
        vec![
            FieldRef::identity(&self.id),
            FieldRef::attr(&self.region),
            FieldRef::attr(&self.image),
            FieldRef::attr(&self.env),
            FieldRef::attr(&self.cpu),
            FieldRef::attr(&self.memory),
            FieldRef::attr(&self.scaling),
            FieldRef::attr(&self.sql_instances).referencing(instances),
            FieldRef::attr(&self.image_digest),
            FieldRef::attr(&self.url),
        ]
    }

    fn fields_mut(&mut self) -> Vec<&mut dyn AnyField> {
        vec![
            &mut self.id,
            &mut self.region,
            &mut self.image,
            &mut self.env,
            &mut self.cpu,
            &mut self.memory,
            &mut self.scaling,
            &mut self.sql_instances,
            &mut self.image_digest,
            &mut self.url,
        ]
    }

    fn configure(&mut self, desired: &Value) -> Result<(), ProvisionerError> {
        let config: ServiceConfig = resource::parse_config(&self.key(), desired)?;
        self.id.set_wanted(self.name.clone())?;
        self.region.set_wanted(config.region)?;
        self.image.set_wanted(config.image)?;
        self.env.set_wanted(config.env)?;
        self.cpu.set_wanted(config.cpu)?;
        self.memory.set_wanted(config.memory)?;
        self.scaling.set_wanted(config.scaling)?;
        self.sql_instances.set_wanted(config.sql_instances)?;
        Ok(())
    }

    fn read(&mut self) -> BoxFuture<'_, Result<(), ProvisionerError>> {
        Box::pin(async move {
            let api = self.api.clone();
            kinds::read_with::<ServiceSpec, dyn ServiceApi>(self, api.as_ref()).await
        })
    }

    fn apply<'a>(
        &'a mut self,
        op: &'a PlanOperation,
        ctx: &'a ApplyContext,
    ) -> BoxFuture<'a, Result<ApplyOutcome, ProvisionerError>> {
        Box::pin(async move {
            match op.kind {
                OperationKind::Create | OperationKind::Update => self.create_or_update(op, ctx).await,
                OperationKind::Delete => {
                    self.replaced_digest = self.image_digest.current_opt().cloned().flatten();
                    let api = self.api.clone();
                    kinds::apply_with::<ServiceSpec, dyn ServiceApi>(&*self, api.as_ref(), op, ctx).await
                }
            }
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
