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

pub const KIND: &str = "ssl_certificate";

/// Provider-managed certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SslCertificateSpec {
    pub name: String,
    pub domains: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SslCertificateConfig {
    domains: Vec<String>,
}

pub struct SslCertificate {
    name: String,
    api: Arc<dyn ResourceApi<SslCertificateSpec>>,
    id: Field<String>,
    domains: Field<Vec<String>>,
}

impl SslCertificate {
    pub fn new(name: &str, api: Arc<dyn ResourceApi<SslCertificateSpec>>) -> Self {
        Self {
            name: name.to_string(),
            api,
            id: Field::new("name"),
            // Managed certificates cannot change their domains in place.
            domains: Field::force_new("domains").normalized_by(kinds::sorted),
        }
    }
}

impl Resource for SslCertificate {
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
        vec![FieldRef::identity(&self.id), FieldRef::attr(&self.domains)]
    }

    fn fields_mut(&mut self) -> Vec<&mut dyn AnyField> {
        vec![&mut self.id, &mut self.domains]
    }

    fn configure(&mut self, desired: &Value) -> Result<(), ProvisionerError> {
        let config: SslCertificateConfig = resource::parse_config(&self.key(), desired)?;
        if config.domains.is_empty() {
            return Err(ProvisionerError::InvalidConfig {
                key: self.key().to_string(),
                message: "at least one domain is required".to_string(),
            });
        }
        self.id.set_wanted(self.name.clone())?;
        self.domains.set_wanted(kinds::sorted(&config.domains))?;
        Ok(())
    }

    fn read(&mut self) -> BoxFuture<'_, Result<(), ProvisionerError>> {
        Box::pin(async move {
            let api = self.api.clone();
            kinds::read_with::<SslCertificateSpec, _>(self, api.as_ref()).await
        })
    }

    fn apply<'a>(
        &'a mut self,
        op: &'a PlanOperation,
        ctx: &'a ApplyContext,
    ) -> BoxFuture<'a, Result<ApplyOutcome, ProvisionerError>> {
        Box::pin(async move {
            let api = self.api.clone();
            kinds::apply_with::<SslCertificateSpec, _>(&*self, api.as_ref(), op, ctx).await
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
