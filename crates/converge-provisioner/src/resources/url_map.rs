use std::any::Any;
use std::sync::Arc;

use converge_core::ResourceKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::apply::{ApplyContext, ApplyOutcome};
use crate::error::ProvisionerError;
use crate::field::{AnyField, Field};
use crate::plan::PlanOperation;
use crate::provider::{BoxFuture, ResourceApi};
use crate::resource::{self, FieldRef, Resource, Tier};
use crate::resources::{self as kinds, backend_service};
use crate::routing::{self, Route, UrlMapping};

pub const KIND: &str = "url_map";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlMapSpec {
    pub name: String,
    #[serde(default)]
    pub host_rules: Vec<UrlMapping>,
    /// Backend for hosts no rule names.
    pub default_service: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UrlMapConfig {
    routes: Vec<Route>,
    #[serde(default)]
    default_service: Option<String>,
}

pub struct UrlMap {
    name: String,
    api: Arc<dyn ResourceApi<UrlMapSpec>>,
    id: Field<String>,
    host_rules: Field<Vec<UrlMapping>>,
    default_service: Field<String>,
}

impl UrlMap {
    pub fn new(name: &str, api: Arc<dyn ResourceApi<UrlMapSpec>>) -> Self {
        Self {
            name: name.to_string(),
            api,
            id: Field::new("name"),
            host_rules: Field::new("host_rules"),
            default_service: Field::new("default_service"),
        }
    }
}

impl Resource for UrlMap {
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
        let backends = self
            .host_rules
            .any()
            .map(|table| routing::backends(table))
            .unwrap_or_default()
            .into_iter()
            .map(|b| ResourceKey::new(backend_service::KIND, b));
        vec![
            FieldRef::identity(&self.id),
            FieldRef::attr(&self.host_rules).referencing(backends),
            FieldRef::reference(&self.default_service, backend_service::KIND),
        ]
    }

    fn fields_mut(&mut self) -> Vec<&mut dyn AnyField> {
        vec![&mut self.id, &mut self.host_rules, &mut self.default_service]
    }

    fn configure(&mut self, desired: &Value) -> Result<(), ProvisionerError> {
        let config: UrlMapConfig = resource::parse_config(&self.key(), desired)?;
        let table = routing::compose(&config.routes)?;
        let default_service = config
            .default_service
            .or_else(|| table.first().map(|m| m.default_service.clone()))
            .ok_or_else(|| ProvisionerError::InvalidConfig {
                key: self.key().to_string(),
                message: "a url map needs at least one route or a default_service".to_string(),
            })?;
        self.id.set_wanted(self.name.clone())?;
        self.host_rules.set_wanted(table)?;
        self.default_service.set_wanted(default_service)?;
        Ok(())
    }

    fn read(&mut self) -> BoxFuture<'_, Result<(), ProvisionerError>> {
        Box::pin(async move {
            let api = self.api.clone();
            kinds::read_with::<UrlMapSpec, _>(self, api.as_ref()).await
        })
    }

    fn apply<'a>(
        &'a mut self,
        op: &'a PlanOperation,
        ctx: &'a ApplyContext,
    ) -> BoxFuture<'a, Result<ApplyOutcome, ProvisionerError>> {
        Box::pin(async move {
            let api = self.api.clone();
            kinds::apply_with::<UrlMapSpec, _>(&*self, api.as_ref(), op, ctx).await
        })
    }

    fn routing_table(&self) -> Option<&[UrlMapping]> {
        self.host_rules.any().map(Vec::as_slice)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
