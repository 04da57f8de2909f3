//! Per-resource planning.
//!
//! [`plan_resource`] turns one resource's current and wanted fields into a
//! [`PlanAction`]. Rules, first match wins:
//!
//! 1. not wanted, absent: nothing to do
//! 2. not wanted, present: delete (identity fields only)
//! 3. wanted, absent: create (every wanted field)
//! 4. a force-new or identity field differs: delete, then create
//! 5. otherwise update with only the changed fields, or nothing

use std::collections::BTreeSet;

use converge_core::ResourceKey;
use serde::{Deserialize, Serialize};

use crate::error::ProvisionerError;
use crate::payload::Payload;
use crate::resource::{self, FieldRef, Resource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    None,
    Create,
    Update,
    Recreate,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn verb(self) -> &'static str {
        match self {
            Self::Create => "creating",
            Self::Update => "updating",
            Self::Delete => "deleting",
        }
    }
}

/// One steppable provider mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanOperation {
    pub kind: OperationKind,
    /// Progress units this operation accounts for.
    pub steps: usize,
    pub payload: Payload,
}

impl PlanOperation {
    /// Field names carried for this operation, minus identity fields.
    pub fn changed_fields(&self, identity: &BTreeSet<&str>) -> Vec<String> {
        self.payload
            .keys()
            .filter(|k| !identity.contains(k))
            .map(String::from)
            .collect()
    }
}

/// A resource's reconciliation decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanAction {
    pub key: ResourceKey,
    pub action: ActionKind,
    pub description: String,
    pub operations: Vec<PlanOperation>,
}

impl PlanAction {
    pub fn none(key: ResourceKey) -> Self {
        Self {
            description: format!("{key} is up to date"),
            key,
            action: ActionKind::None,
            operations: Vec::new(),
        }
    }

    pub fn total_steps(&self) -> usize {
        self.operations.iter().map(|op| op.steps).sum()
    }

    pub fn is_noop(&self) -> bool {
        self.action == ActionKind::None
    }
}

/// Facts from already-planned resources that dependents must react to.
#[derive(Debug, Clone, Default)]
pub struct PlanHints {
    replaced: BTreeSet<ResourceKey>,
}

impl PlanHints {
    /// Remember `action` if it replaces the remote object.
    pub fn record(&mut self, action: &PlanAction) {
        if matches!(action.action, ActionKind::Create | ActionKind::Recreate) {
            self.replaced.insert(action.key.clone());
        }
    }

    pub fn is_replaced(&self, key: &ResourceKey) -> bool {
        self.replaced.contains(key)
    }
}

/// The aggregate plan, in execution order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub actions: Vec<PlanAction>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub recreate: usize,
    pub delete: usize,
    pub unchanged: usize,
}

impl Plan {
    pub fn has_changes(&self) -> bool {
        self.actions.iter().any(|a| !a.is_noop())
    }

    pub fn total_steps(&self) -> usize {
        self.actions.iter().map(PlanAction::total_steps).sum()
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&PlanAction> {
        self.actions.iter().find(|a| &a.key == key)
    }

    pub fn summary(&self) -> PlanSummary {
        let mut s = PlanSummary::default();
        for a in &self.actions {
            match a.action {
                ActionKind::None => s.unchanged += 1,
                ActionKind::Create => s.create += 1,
                ActionKind::Update => s.update += 1,
                ActionKind::Recreate => s.recreate += 1,
                ActionKind::Delete => s.delete += 1,
            }
        }
        s
    }
}

fn identity_from_current(fields: &[FieldRef<'_>]) -> Result<Payload, ProvisionerError> {
    let mut payload = Payload::new();
    for f in fields.iter().filter(|f| f.identity) {
        if let Some(v) = f.field.current_value()? {
            payload.insert(f.name(), v);
        }
    }
    Ok(payload)
}

fn full_wanted(fields: &[FieldRef<'_>]) -> Result<Payload, ProvisionerError> {
    let mut payload = Payload::new();
    for f in fields.iter().filter(|f| !f.field.is_output()) {
        if let Some(v) = f.field.wanted_value()? {
            payload.insert(f.name(), v);
        }
    }
    Ok(payload)
}

/// Decide what to do with one resource.
pub fn plan_resource(
    resource: &dyn Resource,
    hints: &PlanHints,
) -> Result<PlanAction, ProvisionerError> {
    let key = resource.key();
    let fields = resource.fields();
    let wanted = resource::is_wanted(resource);
    let exists = resource::exists(resource);

    let delete = || -> Result<PlanOperation, ProvisionerError> {
        Ok(PlanOperation {
            kind: OperationKind::Delete,
            steps: 1,
            payload: identity_from_current(&fields)?,
        })
    };
    let create = || -> Result<PlanOperation, ProvisionerError> {
        Ok(PlanOperation {
            kind: OperationKind::Create,
            steps: 1 + resource.create_units(),
            payload: full_wanted(&fields)?,
        })
    };

    match (wanted, exists) {
        (false, false) => return Ok(PlanAction::none(key)),
        (false, true) => {
            return Ok(PlanAction {
                description: format!("delete {key}"),
                key,
                action: ActionKind::Delete,
                operations: vec![delete()?],
            });
        }
        (true, false) => {
            return Ok(PlanAction {
                description: format!("create {key}"),
                key,
                action: ActionKind::Create,
                operations: vec![create()?],
            });
        }
        (true, true) => {}
    }

    let mut changed: Vec<&FieldRef<'_>> = Vec::new();
    let mut forcing: Vec<&'static str> = Vec::new();
    let mut propagated: Vec<&'static str> = Vec::new();

    for f in fields.iter().filter(|f| !f.field.is_output()) {
        let upstream_replaced = f.refs.iter().any(|r| hints.is_replaced(r));
        // Identity fields without a wanted value (e.g. derived) never differ.
        let differs = f.field.is_changed();
        if !differs && !upstream_replaced {
            continue;
        }
        if upstream_replaced && !differs {
            propagated.push(f.name());
        }
        if f.identity || f.field.is_force_new() {
            forcing.push(f.name());
        }
        if !f.identity {
            changed.push(f);
        }
    }

    if !forcing.is_empty() {
        return Ok(PlanAction {
            description: format!("recreate {key}: {} changed", forcing.join(", ")),
            key,
            action: ActionKind::Recreate,
            operations: vec![delete()?, create()?],
        });
    }

    if changed.is_empty() {
        return Ok(PlanAction::none(key));
    }

    let mut payload = identity_from_current(&fields)?;
    for f in &changed {
        match f.field.wanted_value()? {
            Some(v) => payload.insert(f.name(), v),
            // A propagated reference without configuration keeps its value.
            None => {
                if let Some(v) = f.field.current_value()? {
                    payload.insert(f.name(), v);
                }
            }
        }
    }

    let names: Vec<&str> = changed.iter().map(|f| f.name()).collect();
    let mut description = format!("update {key}: {}", names.join(", "));
    if !propagated.is_empty() {
        description.push_str(&format!(
            " (dependency replaced: {})",
            propagated.join(", ")
        ));
    }

    Ok(PlanAction {
        description,
        key,
        action: ActionKind::Update,
        operations: vec![PlanOperation {
            kind: OperationKind::Update,
            steps: resource.update_units(&names).max(1),
            payload,
        }],
    })
}
