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
use crate::resources::{self as kinds, bucket, serverless_neg};

pub const KIND: &str = "backend_service";

/// Edge caching policy. Unset members take the provider defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CdnPolicy {
    #[serde(default)]
    pub cache_mode: Option<String>,
    #[serde(default)]
    pub default_ttl: Option<u32>,
    #[serde(default)]
    pub max_ttl: Option<u32>,
    #[serde(default)]
    pub client_ttl: Option<u32>,
    #[serde(default)]
    pub negative_caching: Option<bool>,
    #[serde(default)]
    pub serve_while_stale: Option<u32>,
}

impl CdnPolicy {
    /// Every member filled in with what the provider assumes when unset.
    pub fn with_defaults(&self) -> Self {
        Self {
            cache_mode: Some(
                self.cache_mode
                    .clone()
                    .unwrap_or_else(|| "CACHE_ALL_STATIC".to_string()),
            ),
            default_ttl: Some(self.default_ttl.unwrap_or(3600)),
            max_ttl: Some(self.max_ttl.unwrap_or(86400)),
            client_ttl: Some(self.client_ttl.unwrap_or(3600)),
            negative_caching: Some(self.negative_caching.unwrap_or(false)),
            serve_while_stale: Some(self.serve_while_stale.unwrap_or(0)),
        }
    }
}

fn cdn_with_defaults(cdn: &Option<CdnPolicy>) -> Option<CdnPolicy> {
    cdn.as_ref().map(CdnPolicy::with_defaults)
}

/// Backend behind the load balancer: either a serverless NEG or a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendServiceSpec {
    pub name: String,
    #[serde(default)]
    pub neg: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub cdn: Option<CdnPolicy>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BackendServiceConfig {
    #[serde(default)]
    neg: Option<String>,
    #[serde(default)]
    bucket: Option<String>,
    #[serde(default)]
    cdn: Option<CdnPolicy>,
}

pub struct BackendService {
    name: String,
    api: Arc<dyn ResourceApi<BackendServiceSpec>>,
    id: Field<String>,
    neg: Field<Option<String>>,
    bucket: Field<Option<String>>,
    cdn: Field<Option<CdnPolicy>>,
}

impl BackendService {
    pub fn new(name: &str, api: Arc<dyn ResourceApi<BackendServiceSpec>>) -> Self {
        Self {
            name: name.to_string(),
            api,
            id: Field::new("name"),
            neg: Field::new("neg"),
            bucket: Field::new("bucket"),
            cdn: Field::new("cdn").normalized_by(cdn_with_defaults),
        }
    }
}

fn optional_ref<'a>(field: &'a Field<Option<String>>, kind: &str) -> FieldRef<'a> {
    let target = field
        .any()
        .cloned()
        .flatten()
        .map(|name| converge_core::ResourceKey::new(kind, name));
    FieldRef::attr(field).referencing(target)
}

impl Resource for BackendService {
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
            optional_ref(&self.neg, serverless_neg::KIND),
            optional_ref(&self.bucket, bucket::KIND),
            FieldRef::attr(&self.cdn),
        ]
    }

    fn fields_mut(&mut self) -> Vec<&mut dyn AnyField> {
        vec![&mut self.id, &mut self.neg, &mut self.bucket, &mut self.cdn]
    }

    fn configure(&mut self, desired: &Value) -> Result<(), ProvisionerError> {
        let config: BackendServiceConfig = resource::parse_config(&self.key(), desired)?;
        if config.neg.is_some() == config.bucket.is_some() {
            return Err(ProvisionerError::InvalidConfig {
                key: self.key().to_string(),
                message: "exactly one of neg or bucket must be set".to_string(),
            });
        }
        self.id.set_wanted(self.name.clone())?;
        self.neg.set_wanted(config.neg)?;
        self.bucket.set_wanted(config.bucket)?;
        self.cdn.set_wanted(config.cdn)?;
        Ok(())
    }

    fn read(&mut self) -> BoxFuture<'_, Result<(), ProvisionerError>> {
        Box::pin(async move {
            let api = self.api.clone();
            kinds::read_with::<BackendServiceSpec, _>(self, api.as_ref()).await
        })
    }

    fn apply<'a>(
        &'a mut self,
        op: &'a PlanOperation,
        ctx: &'a ApplyContext,
    ) -> BoxFuture<'a, Result<ApplyOutcome, ProvisionerError>> {
        Box::pin(async move {
            let api = self.api.clone();
            kinds::apply_with::<BackendServiceSpec, _>(&*self, api.as_ref(), op, ctx).await
        })
    }

    fn caching(&self) -> bool {
        matches!(self.cdn.any(), Some(Some(_)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
