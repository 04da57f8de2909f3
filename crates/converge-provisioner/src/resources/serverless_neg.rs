use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::apply::{ApplyContext, ApplyOutcome};
use crate::error::ProvisionerError;
use crate::field::{AnyField, Field};
use crate::plan::PlanOperation;
use crate::provider::{BoxFuture, ResourceApi};
use crate::resource::{self, FieldRef, Resource, Tier};
use crate::resources::{self as kinds, service};

pub const KIND: &str = "serverless_neg";

/// Network endpoint group pointing the load balancer at one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerlessNegSpec {
    pub name: String,
    pub region: String,
    pub service: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerlessNegConfig {
    region: String,
    service: String,
}

pub struct ServerlessNeg {
    name: String,
    api: Arc<dyn ResourceApi<ServerlessNegSpec>>,
    id: Field<String>,
    region: Field<String>,
    service: Field<String>,
}

impl ServerlessNeg {
    pub fn new(name: &str, api: Arc<dyn ResourceApi<ServerlessNegSpec>>) -> Self {
        Self {
            name: name.to_string(),
            api,
            id: Field::new("name"),
            region: Field::force_new("region"),
            service: Field::force_new("service"),
        }
    }
}

impl Resource for ServerlessNeg {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> Tier {
        Tier::LoadBalancer
    }

    fn fields(&self) -> Vec<FieldRef<'_>> {
        vec![
            FieldRef::identity(&self.id),
            FieldRef::attr(&self.region),
            FieldRef::reference(&self.service, service::KIND),
        ]
    }

    fn fields_mut(&mut self) -> Vec<&mut dyn AnyField> {
        vec![&mut self.id, &mut self.region, &mut self.service]
    }

    fn configure(&mut self, desired: &Value) -> Result<(), ProvisionerError> {
        let config: ServerlessNegConfig = resource::parse_config(&self.key(), desired)?;
        self.id.set_wanted(self.name.clone())?;
        self.region.set_wanted(config.region)?;
        self.service.set_wanted(config.service)?;
        Ok(())
    }

    fn read(&mut self) -> BoxFuture<'_, Result<(), ProvisionerError>> {
        Box::pin(async move {
            let api = self.api.clone();
            kinds::read_with::<ServerlessNegSpec, _>(self, api.as_ref()).await
        })
    }

    fn apply<'a>(
        &'a mut self,
        op: &'a PlanOperation,
        ctx: &'a ApplyContext,
    ) -> BoxFuture<'a, Result<ApplyOutcome, ProvisionerError>> {
        Box::pin(async move {
            let api = self.api.clone();
            kinds::apply_with::<ServerlessNegSpec, _>(&*self, api.as_ref(), op, ctx).await
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
