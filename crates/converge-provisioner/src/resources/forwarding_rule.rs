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
use crate::resources::{self as kinds, address, https_proxy};

pub const KIND: &str = "forwarding_rule";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingRuleSpec {
    pub name: String,
    pub address: String,
    pub target: String,
    pub port_range: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ForwardingRuleConfig {
    address: String,
    target: String,
    #[serde(default = "default_port_range")]
    port_range: String,
}

fn default_port_range() -> String {
    "443".to_string()
}

pub struct ForwardingRule {
    name: String,
    api: Arc<dyn ResourceApi<ForwardingRuleSpec>>,
    id: Field<String>,
    address: Field<String>,
    target: Field<String>,
    port_range: Field<String>,
}

impl ForwardingRule {
    pub fn new(name: &str, api: Arc<dyn ResourceApi<ForwardingRuleSpec>>) -> Self {
        Self {
            name: name.to_string(),
            api,
            id: Field::new("name"),
            address: Field::force_new("address"),
            target: Field::new("target"),
            port_range: Field::force_new("port_range"),
        }
    }
}

impl Resource for ForwardingRule {
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
            FieldRef::reference(&self.address, address::KIND),
            FieldRef::reference(&self.target, https_proxy::KIND),
            FieldRef::attr(&self.port_range),
        ]
    }

    fn fields_mut(&mut self) -> Vec<&mut dyn AnyField> {
        vec![
            &mut self.id,
            &mut self.address,
            &mut self.target,
            &mut self.port_range,
        ]
    }

    fn configure(&mut self, desired: &Value) -> Result<(), ProvisionerError> {
        let config: ForwardingRuleConfig = resource::parse_config(&self.key(), desired)?;
        self.id.set_wanted(self.name.clone())?;
        self.address.set_wanted(config.address)?;
        self.target.set_wanted(config.target)?;
        self.port_range.set_wanted(config.port_range)?;
        Ok(())
    }

    fn read(&mut self) -> BoxFuture<'_, Result<(), ProvisionerError>> {
        Box::pin(async move {
            let api = self.api.clone();
            kinds::read_with::<ForwardingRuleSpec, _>(self, api.as_ref()).await
        })
    }

    fn apply<'a>(
        &'a mut self,
        op: &'a PlanOperation,
        ctx: &'a ApplyContext,
    ) -> BoxFuture<'a, Result<ApplyOutcome, ProvisionerError>> {
        Box::pin(async move {
            let api = self.api.clone();
            kinds::apply_with::<ForwardingRuleSpec, _>(&*self, api.as_ref(), op, ctx).await
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
