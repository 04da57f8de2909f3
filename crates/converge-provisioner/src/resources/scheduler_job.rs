use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::apply::{ApplyContext, ApplyOutcome};
use crate::error::ProvisionerError;
use crate::field::{AnyField, Field};
use crate::plan::PlanOperation;
use crate::provider::{BoxFuture, ResourceApi};
use crate::resource::{self, FieldRef, Resource, Tier};
use crate::resources as kinds;

pub const KIND: &str = "scheduler_job";

/// Cron-triggered HTTP call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerJobSpec {
    pub name: String,
    pub region: String,
    pub schedule: String,
    #[serde(default)]
    pub time_zone: Option<String>,
    pub target: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SchedulerJobConfig {
    region: String,
    schedule: String,
    #[serde(default)]
    time_zone: Option<String>,
    target: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    body: Option<String>,
}

fn time_zone_or_default(tz: &Option<String>) -> Option<String> {
    Some(tz.clone().unwrap_or_else(|| "Etc/UTC".to_string()))
}

fn method_or_default(method: &Option<String>) -> Option<String> {
    Some(
        method
            .as_deref()
            .unwrap_or("POST")
            .to_ascii_uppercase(),
    )
}

pub struct SchedulerJob {
    name: String,
    api: Arc<dyn ResourceApi<SchedulerJobSpec>>,
    id: Field<String>,
    region: Field<String>,
    schedule: Field<String>,
    time_zone: Field<Option<String>>,
    target: Field<String>,
    method: Field<Option<String>>,
    headers: Field<BTreeMap<String, String>>,
    body: Field<Option<String>>,
}

impl SchedulerJob {
    pub fn new(name: &str, api: Arc<dyn ResourceApi<SchedulerJobSpec>>) -> Self {
        Self {
            name: name.to_string(),
            api,
            id: Field::new("name"),
            region: Field::force_new("region"),
            schedule: Field::new("schedule"),
            time_zone: Field::new("time_zone").normalized_by(time_zone_or_default),
            target: Field::new("target"),
            method: Field::new("method").normalized_by(method_or_default),
            headers: Field::new("headers"),
            body: Field::new("body"),
        }
    }
}

impl Resource for SchedulerJob {
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
        vec![
            FieldRef::identity(&self.id),
            FieldRef::attr(&self.region),
            FieldRef::attr(&self.schedule),
            FieldRef::attr(&self.time_zone),
            FieldRef::attr(&self.target),
            FieldRef::attr(&self.method),
            FieldRef::attr(&self.headers),
            FieldRef::attr(&self.body),
        ]
    }

    fn fields_mut(&mut self) -> Vec<&mut dyn AnyField> {
        vec![
            &mut self.id,
            &mut self.region,
            &mut self.schedule,
            &mut self.time_zone,
            &mut self.target,
            &mut self.method,
            &mut self.headers,
            &mut self.body,
        ]
    }

    fn configure(&mut self, desired: &Value) -> Result<(), ProvisionerError> {
        let config: SchedulerJobConfig = resource::parse_config(&self.key(), desired)?;
        self.id.set_wanted(self.name.clone())?;
        self.region.set_wanted(config.region)?;
        self.schedule.set_wanted(config.schedule)?;
        self.time_zone.set_wanted(config.time_zone)?;
        self.target.set_wanted(config.target)?;
        self.method.set_wanted(config.method)?;
        self.headers.set_wanted(config.headers)?;
        self.body.set_wanted(config.body)?;
        Ok(())
    }

    fn read(&mut self) -> BoxFuture<'_, Result<(), ProvisionerError>> {
        Box::pin(async move {
            let api = self.api.clone();
            kinds::read_with::<SchedulerJobSpec, _>(self, api.as_ref()).await
        })
    }

    fn apply<'a>(
        &'a mut self,
        op: &'a PlanOperation,
        ctx: &'a ApplyContext,
    ) -> BoxFuture<'a, Result<ApplyOutcome, ProvisionerError>> {
        Box::pin(async move {
            let api = self.api.clone();
            kinds::apply_with::<SchedulerJobSpec, _>(&*self, api.as_ref(), op, ctx).await
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
