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
use crate::resources::{self as kinds, sql_instance};

pub const KIND: &str = "sql_user";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlUserSpec {
    pub name: String,
    pub instance: String,
    /// Never returned by reads; only sent on create and password changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SqlUserConfig {
    instance: String,
    #[serde(default)]
    password: Option<String>,
}

pub struct SqlUser {
    name: String,
    api: Arc<dyn ResourceApi<SqlUserSpec>>,
    id: Field<String>,
    instance: Field<String>,
    password: Field<Option<String>>,
}

impl SqlUser {
    pub fn new(name: &str, api: Arc<dyn ResourceApi<SqlUserSpec>>) -> Self {
        Self {
            name: name.to_string(),
            api,
            id: Field::new("name"),
            instance: Field::new("instance"),
            password: Field::new("password"),
        }
    }
}

impl Resource for SqlUser {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> Tier {
        Tier::Dependency
    }

    fn fields(&self) -> Vec<FieldRef<'_>> {
        vec![
            FieldRef::identity(&self.id),
            FieldRef::identity_reference(&self.instance, sql_instance::KIND),
            FieldRef::attr(&self.password),
        ]
    }

    fn fields_mut(&mut self) -> Vec<&mut dyn AnyField> {
        vec![&mut self.id, &mut self.instance, &mut self.password]
    }

    fn configure(&mut self, desired: &Value) -> Result<(), ProvisionerError> {
        let config: SqlUserConfig = resource::parse_config(&self.key(), desired)?;
        self.id.set_wanted(self.name.clone())?;
        self.instance.set_wanted(config.instance)?;
        // Without a configured password the existing one is left alone.
        kinds::want(&mut self.password, config.password.map(Some))?;
        Ok(())
    }

    fn read(&mut self) -> BoxFuture<'_, Result<(), ProvisionerError>> {
        Box::pin(async move {
            // The password is absent from reads, so its current value is
            // left as last applied.
            let api = self.api.clone();
            kinds::read_with::<SqlUserSpec, _>(self, api.as_ref()).await
        })
    }

    fn apply<'a>(
        &'a mut self,
        op: &'a PlanOperation,
        ctx: &'a ApplyContext,
    ) -> BoxFuture<'a, Result<ApplyOutcome, ProvisionerError>> {
        Box::pin(async move {
            let instance = self.instance.any().cloned().unwrap_or_default();
            let _guard = ctx.env.instance_locks.lock(&instance).await;
            let api = self.api.clone();
            kinds::apply_with::<SqlUserSpec, _>(&*self, api.as_ref(), op, ctx).await
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
