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
use crate::resources::{self as kinds, ssl_certificate, url_map};

pub const KIND: &str = "https_proxy";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpsProxySpec {
    pub name: String,
    pub url_map: String,
    #[serde(default)]
    pub ssl_certificates: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HttpsProxyConfig {
    url_map: String,
    ssl_certificates: Vec<String>,
}

pub struct HttpsProxy {
    name: String,
    api: Arc<dyn ResourceApi<HttpsProxySpec>>,
    id: Field<String>,
    url_map: Field<String>,
    ssl_certificates: Field<Vec<String>>,
}

impl HttpsProxy {
    pub fn new(name: &str, api: Arc<dyn ResourceApi<HttpsProxySpec>>) -> Self {
        Self {
            name: name.to_string(),
            api,
            id: Field::new("name"),
            url_map: Field::new("url_map"),
            ssl_certificates: Field::new("ssl_certificates").normalized_by(kinds::sorted),
        }
    }
}

impl Resource for HttpsProxy {
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
        let certificates = self
            .ssl_certificates
            .any()
            .into_iter()
            .flatten()
            .map(|c| ResourceKey::new(ssl_certificate::KIND, c.clone()));
        vec![
            FieldRef::identity(&self.id),
            FieldRef::reference(&self.url_map, url_map::KIND),
            FieldRef::attr(&self.ssl_certificates).referencing(certificates),
        ]
    }

    fn fields_mut(&mut self) -> Vec<&mut dyn AnyField> {
        vec![&mut self.id, &mut self.url_map, &mut self.ssl_certificates]
    }

    fn configure(&mut self, desired: &Value) -> Result<(), ProvisionerError> {
        let config: HttpsProxyConfig = resource::parse_config(&self.key(), desired)?;
        self.id.set_wanted(self.name.clone())?;
        self.url_map.set_wanted(config.url_map)?;
        self.ssl_certificates.set_wanted(config.ssl_certificates)?;
        Ok(())
    }

    fn read(&mut self) -> BoxFuture<'_, Result<(), ProvisionerError>> {
        Box::pin(async move {
            let api = self.api.clone();
            kinds::read_with::<HttpsProxySpec, _>(self, api.as_ref()).await
        })
    }

    fn apply<'a>(
        &'a mut self,
        op: &'a PlanOperation,
        ctx: &'a ApplyContext,
    ) -> BoxFuture<'a, Result<ApplyOutcome, ProvisionerError>> {
        Box::pin(async move {
            let api = self.api.clone();
            kinds::apply_with::<HttpsProxySpec, _>(&*self, api.as_ref(), op, ctx).await
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
