use std::any::Any;
use std::collections::BTreeSet;

use converge_core::ResourceKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::apply::{ApplyContext, ApplyOutcome};
use crate::error::ProvisionerError;
use crate::field::{AnyField, Field};
use crate::payload::{Identity, Payload};
use crate::plan::PlanOperation;
use crate::provider::BoxFuture;
use crate::routing::UrlMapping;

/// Coarse apply order: dependencies, then apps, then the load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Dependency,
    App,
    LoadBalancer,
}

/// How the planner should treat one field of a resource.
pub struct FieldRef<'a> {
    pub field: &'a dyn AnyField,
    /// Addresses the remote object. Identity fields travel with every
    /// operation and a change to one forces recreation.
    pub identity: bool,
    /// Resources this field points at.
    pub refs: Vec<ResourceKey>,
}

impl<'a> FieldRef<'a> {
    pub fn identity(field: &'a dyn AnyField) -> Self {
        Self {
            field,
            identity: true,
            refs: Vec::new(),
        }
    }

    pub fn attr(field: &'a dyn AnyField) -> Self {
        Self {
            field,
            identity: false,
            refs: Vec::new(),
        }
    }

    /// A field holding the name of another resource of `kind`.
    pub fn reference(field: &'a Field<String>, kind: &str) -> Self {
        let refs = field
            .any()
            .map(|name| vec![ResourceKey::new(kind, name.clone())])
            .unwrap_or_default();
        Self {
            field,
            identity: false,
            refs,
        }
    }

    /// Like [`FieldRef::reference`] but also part of the identity.
    pub fn identity_reference(field: &'a Field<String>, kind: &str) -> Self {
        Self {
            identity: true,
            ..Self::reference(field, kind)
        }
    }

    pub fn referencing(mut self, refs: impl IntoIterator<Item = ResourceKey>) -> Self {
        self.refs.extend(refs);
        self
    }

    pub fn name(&self) -> &'static str {
        self.field.name()
    }
}

/// Trait implemented by each managed resource kind.
///
/// A resource owns its [`Field`]s and a handle to its provider API. The
/// generic planner, executor and state persistence operate on the fields
/// through [`Resource::fields`] and [`Resource::fields_mut`]; kind-specific
/// behaviour lives in `configure`, `read` and `apply`.
///
/// Methods return boxed futures for dyn compatibility.
pub trait Resource: Send + Sync {
    /// The registry type tag (e.g. "bucket", "sql_instance").
    fn kind(&self) -> &'static str;

    fn name(&self) -> &str;

    fn key(&self) -> ResourceKey {
        ResourceKey::new(self.kind(), self.name())
    }

    fn tier(&self) -> Tier;

    /// Every field with its planning role.
    fn fields(&self) -> Vec<FieldRef<'_>>;

    fn fields_mut(&mut self) -> Vec<&mut dyn AnyField>;

    /// Set wanted values from the desired configuration of this resource.
    fn configure(&mut self, desired: &Value) -> Result<(), ProvisionerError>;

    /// Populate current values from the provider.
    fn read(&mut self) -> BoxFuture<'_, Result<(), ProvisionerError>>;

    /// Perform one plan operation against the provider.
    ///
    /// The executor copies the operation payload into current values after
    /// this returns successfully, so implementations only need to record
    /// provider-assigned outputs (via [`ApplyOutcome`]) and any partial
    /// progress they want kept on failure.
    fn apply<'a>(
        &'a mut self,
        op: &'a PlanOperation,
        ctx: &'a ApplyContext,
    ) -> BoxFuture<'a, Result<ApplyOutcome, ProvisionerError>>;

    /// Extra progress units of a Create beyond the provider call itself.
    fn create_units(&self) -> usize {
        0
    }

    /// Progress units of an Update touching `changed`.
    fn update_units(&self, changed: &[&str]) -> usize {
        let _ = changed;
        1
    }

    /// Whether responses served through this resource are edge-cached.
    fn caching(&self) -> bool {
        false
    }

    /// Host/path routing table, for resources that route traffic.
    fn routing_table(&self) -> Option<&[UrlMapping]> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// Resources this one depends on, from its reference fields.
pub fn dependencies(resource: &dyn Resource) -> BTreeSet<ResourceKey> {
    let own = resource.key();
    resource
        .fields()
        .into_iter()
        .flat_map(|f| f.refs)
        .filter(|k| *k != own)
        .collect()
}

/// The remote object exists (as far as current state knows).
pub fn exists(resource: &dyn Resource) -> bool {
    resource
        .fields()
        .iter()
        .any(|f| f.identity && !f.field.is_new())
}

/// The resource is part of the desired topology.
pub fn is_wanted(resource: &dyn Resource) -> bool {
    resource
        .fields()
        .iter()
        .any(|f| f.identity && f.field.has_wanted())
}

/// Current values of every field that has one.
pub fn current_payload(resource: &dyn Resource) -> Result<Payload, ProvisionerError> {
    let mut payload = Payload::new();
    for f in resource.fields() {
        if let Some(v) = f.field.current_value()? {
            payload.insert(f.name(), v);
        }
    }
    Ok(payload)
}

/// Identity fields, preferring current values and falling back to wanted
/// for objects that were never observed.
pub fn identity(resource: &dyn Resource) -> Result<Identity, ProvisionerError> {
    let mut id = Identity::new();
    for f in resource.fields().into_iter().filter(|f| f.identity) {
        let value = match f.field.current_value()? {
            Some(v) => Some(v),
            None => f.field.wanted_value()?,
        };
        if let Some(v) = value {
            id.insert(f.name(), v);
        }
    }
    Ok(id)
}

/// Record an observation. `None` clears every current value; otherwise
/// each field named in the observation takes the observed value.
pub fn observe(resource: &mut dyn Resource, observed: Option<Payload>) -> Result<(), ProvisionerError> {
    match observed {
        None => {
            for f in resource.fields_mut() {
                f.load_current(None)?;
            }
        }
        Some(observed) => {
            for f in resource.fields_mut() {
                if let Some(v) = observed.get(f.name()) {
                    f.load_current(Some(v.clone()))?;
                }
            }
        }
    }
    Ok(())
}

/// Parse the desired configuration of one resource into its typed form.
pub fn parse_config<C: serde::de::DeserializeOwned>(
    key: &ResourceKey,
    desired: &Value,
) -> Result<C, ProvisionerError> {
    serde_json::from_value(desired.clone()).map_err(|e| ProvisionerError::InvalidConfig {
        key: key.to_string(),
        message: e.to_string(),
    })
}
