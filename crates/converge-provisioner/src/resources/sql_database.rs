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

pub const KIND: &str = "sql_database";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlDatabaseSpec {
    pub name: String,
    pub instance: String,
    #[serde(default)]
    pub charset: Option<String>,
    #[serde(default)]
    pub collation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SqlDatabaseConfig {
    instance: String,
    #[serde(default)]
    charset: Option<String>,
    #[serde(default)]
    collation: Option<String>,
}

fn charset_or_default(charset: &Option<String>) -> Option<String> {
    Some(charset.clone().unwrap_or_else(|| "UTF8".to_string()))
}

pub struct SqlDatabase {
    name: String,
    api: Arc<dyn ResourceApi<SqlDatabaseSpec>>,
    id: Field<String>,
    instance: Field<String>,
    charset: Field<Option<String>>,
    collation: Field<Option<String>>,
}

impl SqlDatabase {
    pub fn new(name: &str, api: Arc<dyn ResourceApi<SqlDatabaseSpec>>) -> Self {
        Self {
            name: name.to_string(),
            api,
            id: Field::new("name"),
            instance: Field::new("instance"),
            charset: Field::new("charset").normalized_by(charset_or_default),
            collation: Field::force_new("collation"),
        }
    }
}

impl Resource for SqlDatabase {
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
            FieldRef::attr(&self.charset),
            FieldRef::attr(&self.collation),
        ]
    }

    fn fields_mut(&mut self) -> Vec<&mut dyn AnyField> {
        vec![
            &mut self.id,
            &mut self.instance,
            &mut self.charset,
            &mut self.collation,
        ]
    }

    fn configure(&mut self, desired: &Value) -> Result<(), ProvisionerError> {
        let config: SqlDatabaseConfig = resource::parse_config(&self.key(), desired)?;
        self.id.set_wanted(self.name.clone())?;
        self.instance.set_wanted(config.instance)?;
        self.charset.set_wanted(config.charset)?;
        self.collation.set_wanted(config.collation)?;
        Ok(())
    }

    fn read(&mut self) -> BoxFuture<'_, Result<(), ProvisionerError>> {
        Box::pin(async move {
            let api = self.api.clone();
            kinds::read_with::<SqlDatabaseSpec, _>(self, api.as_ref()).await
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
            kinds::apply_with::<SqlDatabaseSpec, _>(&*self, api.as_ref(), op, ctx).await
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
