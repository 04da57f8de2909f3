//! The set of resources one engine run reconciles.
//!
//! A [`Workspace`] is assembled from persisted records (which restore
//! current values) and from the desired [`Topology`] (which sets wanted
//! values). A resource that appears only in state keeps wanted unset and
//! therefore plans as a deletion.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use converge_core::ResourceKey;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProvisionerError;
use crate::plan::{self, Plan, PlanHints};
use crate::provider::Providers;
use crate::registry::Registry;
use crate::resource::{self, Resource, Tier};
use crate::state::ProvisionerState;

/// Desired state of one project environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub project: String,
    pub environment: String,
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
}

/// One desired resource: its kind tag, name and kind-specific settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub desired: Value,
}

impl ResourceSpec {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, desired: Value) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            desired,
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.kind.clone(), self.name.clone())
    }
}

impl Topology {
    pub fn new(project: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            environment: environment.into(),
            resources: Vec::new(),
        }
    }

    pub fn with(mut self, kind: &str, name: &str, desired: Value) -> Self {
        self.resources.push(ResourceSpec::new(kind, name, desired));
        self
    }
}

/// Resources keyed by `kind.name`.
#[derive(Default)]
pub struct Workspace {
    resources: BTreeMap<ResourceKey, Box<dyn Resource>>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore every record in `state`, then configure every resource in
    /// `topology`.
    pub fn assemble(
        registry: &Registry,
        providers: &Providers,
        state: &ProvisionerState,
        topology: &Topology,
    ) -> Result<Self, ProvisionerError> {
        let mut workspace = Self::new();

        for record in &state.resources {
            let mut resource = registry.construct(&record.kind, &record.name, providers)?;
            record.restore(resource.as_mut())?;
            workspace.insert(resource);
        }

        let mut configured = BTreeSet::new();
        for spec in &topology.resources {
            let key = spec.key();
            if !configured.insert(key.clone()) {
                return Err(ProvisionerError::InvalidConfig {
                    key: key.to_string(),
                    message: "declared more than once".to_string(),
                });
            }
            let resource = match workspace.resources.entry(key) {
                Entry::Occupied(existing) => existing.into_mut(),
                Entry::Vacant(slot) => {
                    slot.insert(registry.construct(&spec.kind, &spec.name, providers)?)
                }
            };
            resource.configure(&spec.desired)?;
        }

        workspace.check_references()?;
        tracing::debug!(
            resources = workspace.len(),
            configured = configured.len(),
            "workspace assembled"
        );
        Ok(workspace)
    }

    pub fn insert(&mut self, resource: Box<dyn Resource>) {
        self.resources.insert(resource.key(), resource);
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&dyn Resource> {
        self.resources.get(key).map(|r| r.as_ref())
    }

    pub fn get_mut(&mut self, key: &ResourceKey) -> Option<&mut (dyn Resource + 'static)> {
        self.resources.get_mut(key).map(|r| r.as_mut())
    }

    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.resources.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Resource> {
        self.resources.values().map(|r| r.as_ref())
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Every wanted resource may only point at other wanted resources.
    fn check_references(&self) -> Result<(), ProvisionerError> {
        for resource in self.iter().filter(|r| resource::is_wanted(*r)) {
            for dep in resource::dependencies(resource) {
                let wanted = self.get(&dep).is_some_and(resource::is_wanted);
                if !wanted {
                    return Err(ProvisionerError::InvalidConfig {
                        key: resource.key().to_string(),
                        message: format!("references {dep}, which is not declared"),
                    });
                }
            }
        }
        Ok(())
    }

    /// Group resources into levels that can be applied in sequence.
    ///
    /// Every resource lands in a later level than everything it references.
    /// Levels are ordered by tier first (dependencies, apps, load balancer),
    /// then by depth; references to resources outside the workspace are
    /// ignored.
    pub fn levels(&self) -> Result<Vec<Vec<ResourceKey>>, ProvisionerError> {
        let deps: BTreeMap<&ResourceKey, BTreeSet<ResourceKey>> = self
            .resources
            .iter()
            .map(|(key, r)| {
                let within = resource::dependencies(r.as_ref())
                    .into_iter()
                    .filter(|d| self.resources.contains_key(d))
                    .collect();
                (key, within)
            })
            .collect();

        // Kahn's algorithm, tracking each node's (tier, depth) rank.
        let mut rank: BTreeMap<&ResourceKey, (Tier, usize)> = BTreeMap::new();
        let mut remaining: BTreeMap<&ResourceKey, usize> =
            deps.iter().map(|(k, d)| (*k, d.len())).collect();
        let mut ready: Vec<&ResourceKey> = remaining
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(k, _)| *k)
            .collect();

        while let Some(key) = ready.pop() {
            remaining.remove(key);
            let own_tier = self.resources[key].tier();
            let (tier, depth) = deps[key]
                .iter()
                .filter_map(|d| rank.get(d))
                .fold((own_tier, 0), |(t, depth), (dt, dd)| {
                    (t.max(*dt), depth.max(dd + 1))
                });
            rank.insert(key, (tier, depth));

            for (dependent, its_deps) in &deps {
                if its_deps.contains(key) {
                    if let Some(n) = remaining.get_mut(dependent) {
                        *n -= 1;
                        if *n == 0 {
                            ready.push(*dependent);
                        }
                    }
                }
            }
        }

        if !remaining.is_empty() {
            let names: Vec<String> = remaining.keys().map(|k| k.to_string()).collect();
            return Err(ProvisionerError::DependencyCycle(names.join(", ")));
        }

        let mut grouped: BTreeMap<(Tier, usize), Vec<ResourceKey>> = BTreeMap::new();
        for (key, r) in rank {
            grouped.entry(r).or_default().push(key.clone());
        }
        Ok(grouped
            .into_values()
            .map(|mut keys| {
                keys.sort();
                keys
            })
            .collect())
    }

    /// Read every resource from its provider, `concurrency` at a time.
    pub async fn refresh(&mut self, concurrency: usize) -> Result<(), ProvisionerError> {
        tracing::info!(resources = self.len(), "refreshing resources");
        stream::iter(self.resources.values_mut())
            .map(|resource| resource.read())
            .buffer_unordered(concurrency.max(1))
            .try_collect::<Vec<()>>()
            .await?;
        Ok(())
    }

    /// Plan every resource, level by level, feeding each level's
    /// replacements to the next.
    pub fn plan(&self) -> Result<Plan, ProvisionerError> {
        let mut hints = PlanHints::default();
        let mut out = Plan::default();
        for level in self.levels()? {
            let mut planned = Vec::with_capacity(level.len());
            for key in &level {
                let action = plan::plan_resource(self.resources[key].as_ref(), &hints)?;
                if !action.is_noop() {
                    tracing::info!(addr = %key, action = ?action.action, "{}", action.description);
                }
                planned.push(action);
            }
            // Siblings in one level never reference each other.
            for action in &planned {
                hints.record(action);
            }
            out.actions.extend(planned);
        }
        Ok(out)
    }

    /// Snapshot every existing resource into `state`.
    pub fn capture(&self, state: &mut ProvisionerState) -> Result<(), ProvisionerError> {
        state.capture(self.iter())
    }

    /// `key` and everything it transitively references.
    pub fn closure(&self, key: &ResourceKey) -> BTreeSet<ResourceKey> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![key.clone()];
        while let Some(next) = stack.pop() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(r) = self.get(&next) {
                stack.extend(resource::dependencies(r));
            }
        }
        seen
    }

    /// Split-borrow the resources named in `keys` for concurrent use.
    pub(crate) fn select_mut<'a>(
        &'a mut self,
        keys: &BTreeSet<&ResourceKey>,
    ) -> Vec<&'a mut Box<dyn Resource>> {
        self.resources
            .iter_mut()
            .filter(|(k, _)| keys.contains(k))
            .map(|(_, r)| r)
            .collect()
    }
}
