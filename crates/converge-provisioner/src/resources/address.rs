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
use crate::resources as kinds;

pub const KIND: &str = "address";

/// Reserved global IP address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSpec {
    pub name: String,
    #[serde(default)]
    pub ip_version: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct AddressConfig {
    #[serde(default)]
    ip_version: Option<String>,
}

fn ip_version_or_default(version: &Option<String>) -> Option<String> {
    Some(version.clone().unwrap_or_else(|| "IPV4".to_string()))
}

pub struct Address {
    name: String,
    api: Arc<dyn ResourceApi<AddressSpec>>,
    id: Field<String>,
    ip_version: Field<Option<String>>,
    ip_address: Field<Option<String>>,
}

impl Address {
    pub fn new(name: &str, api: Arc<dyn ResourceApi<AddressSpec>>) -> Self {
        Self {
            name: name.to_string(),
            api,
            id: Field::new("name"),
            ip_version: Field::force_new("ip_version").normalized_by(ip_version_or_default),
            ip_address: Field::output("ip_address"),
        }
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.current_opt().and_then(|ip| ip.as_deref())
    }
}

impl Resource for Address {
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
            FieldRef::attr(&self.ip_version),
            FieldRef::attr(&self.ip_address),
        ]
    }

    fn fields_mut(&mut self) -> Vec<&mut dyn AnyField> {
        vec![&mut self.id, &mut self.ip_version, &mut self.ip_address]
    }

    fn configure(&mut self, desired: &Value) -> Result<(), ProvisionerError> {
        let config: AddressConfig = if desired.is_null() {
            AddressConfig::default()
        } else {
            resource::parse_config(&self.key(), desired)?
        };
        self.id.set_wanted(self.name.clone())?;
        self.ip_version.set_wanted(config.ip_version)?;
        Ok(())
    }

    fn read(&mut self) -> BoxFuture<'_, Result<(), ProvisionerError>> {
        Box::pin(async move {
            let api = self.api.clone();
            kinds::read_with::<AddressSpec, _>(self, api.as_ref()).await
        })
    }

    fn apply<'a>(
        &'a mut self,
        op: &'a PlanOperation,
        ctx: &'a ApplyContext,
    ) -> BoxFuture<'a, Result<ApplyOutcome, ProvisionerError>> {
        Box::pin(async move {
            let api = self.api.clone();
            kinds::apply_reading_outputs::<AddressSpec, _>(&*self, api.as_ref(), op, ctx, &["ip_address"])
                .await
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
