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

pub const KIND: &str = "sql_instance";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlInstanceSpec {
    pub name: String,
    pub region: String,
    pub database_version: String,
    pub tier: String,
    #[serde(default)]
    pub database_flags: BTreeMap<String, String>,
    #[serde(default)]
    pub backups_enabled: bool,
    #[serde(default)]
    pub connection_name: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SqlInstanceConfig {
    region: String,
    database_version: String,
    tier: String,
    #[serde(default)]
    database_flags: BTreeMap<String, String>,
    #[serde(default = "default_backups")]
    backups_enabled: bool,
}

fn default_backups() -> bool {
    true
}

/// A managed SQL server. Databases and users on it serialize their
/// mutations through the instance lock named after it.
pub struct SqlInstance {
    name: String,
    api: Arc<dyn ResourceApi<SqlInstanceSpec>>,
    id: Field<String>,
    region: Field<String>,
    database_version: Field<String>,
    tier: Field<String>,
    database_flags: Field<BTreeMap<String, String>>,
    backups_enabled: Field<bool>,
    connection_name: Field<Option<String>>,
    ip_address: Field<Option<String>>,
}

impl SqlInstance {
    pub fn new(name: &str, api: Arc<dyn ResourceApi<SqlInstanceSpec>>) -> Self {
        Self {
            name: name.to_string(),
            api,
            id: Field::new("name"),
            region: Field::force_new("region"),
            database_version: Field::force_new("database_version"),
            tier: Field::new("tier"),
            database_flags: Field::new("database_flags"),
            backups_enabled: Field::new("backups_enabled"),
            connection_name: Field::output("connection_name"),
            ip_address: Field::output("ip_address"),
        }
    }

    pub fn connection_name(&self) -> Option<&str> {
        self.connection_name.current_opt().and_then(|c| c.as_deref())
    }
}

impl Resource for SqlInstance {
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
            FieldRef::attr(&self.region),
            FieldRef::attr(&self.database_version),
            FieldRef::attr(&self.tier),
            FieldRef::attr(&self.database_flags),
            FieldRef::attr(&self.backups_enabled),
            FieldRef::attr(&self.connection_name),
            FieldRef::attr(&self.ip_address),
        ]
    }

    fn fields_mut(&mut self) -> Vec<&mut dyn AnyField> {
        vec![
            &mut self.id,
            &mut self.region,
            &mut self.database_version,
            &mut self.tier,
            &mut self.database_flags,
            &mut self.backups_enabled,
            &mut self.connection_name,
            &mut self.ip_address,
        ]
    }

    fn configure(&mut self, desired: &Value) -> Result<(), ProvisionerError> {
        let config: SqlInstanceConfig = resource::parse_config(&self.key(), desired)?;
        self.id.set_wanted(self.name.clone())?;
        self.region.set_wanted(config.region)?;
        self.database_version.set_wanted(config.database_version)?;
        self.tier.set_wanted(config.tier)?;
        self.database_flags.set_wanted(config.database_flags)?;
        self.backups_enabled.set_wanted(config.backups_enabled)?;
        Ok(())
    }

    fn read(&mut self) -> BoxFuture<'_, Result<(), ProvisionerError>> {
        Box::pin(async move {
            let api = self.api.clone();
            kinds::read_with::<SqlInstanceSpec, _>(self, api.as_ref()).await
        })
    }

    fn apply<'a>(
        &'a mut self,
        op: &'a PlanOperation,
        ctx: &'a ApplyContext,
    ) -> BoxFuture<'a, Result<ApplyOutcome, ProvisionerError>> {
        Box::pin(async move {
            let _guard = ctx.env.instance_locks.lock(&self.name).await;
            let api = self.api.clone();
            kinds::apply_reading_outputs::<SqlInstanceSpec, _>(
                &*self,
                api.as_ref(),
                op,
                ctx,
                &["connection_name", "ip_address"],
            )
            .await
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
