use converge_core::ResourceKey;
use serde::{Deserialize, Serialize};

use crate::error::ProvisionerError;
use crate::payload::Payload;
use crate::resource::{self, Resource};

/// Current layout of [`ProvisionerState`].
pub const STATE_VERSION: u32 = 1;

/// Current layout of a [`ResourceRecord`]'s `data`.
pub const RECORD_SCHEMA_VERSION: u32 = 1;

/// Persisted state for one project environment, stored at
/// `state/{project}/{environment}/state.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionerState {
    pub version: u32,
    pub project: String,
    pub environment: String,
    /// When the last apply recorded this state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<jiff::Timestamp>,
    /// One record per resource that exists remotely, ordered by key.
    #[serde(default)]
    pub resources: Vec<ResourceRecord>,
}

/// Snapshot of one resource's current field values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub kind: String,
    pub name: String,
    pub schema_version: u32,
    pub data: Payload,
}

impl ResourceRecord {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.kind.clone(), self.name.clone())
    }

    /// Snapshot a resource. `None` if it does not exist remotely.
    pub fn capture(resource: &dyn Resource) -> Result<Option<Self>, ProvisionerError> {
        if !resource::exists(resource) {
            return Ok(None);
        }
        Ok(Some(Self {
            kind: resource.kind().to_string(),
            name: resource.name().to_string(),
            schema_version: RECORD_SCHEMA_VERSION,
            data: resource::current_payload(resource)?,
        }))
    }

    /// Load this record's values into a freshly constructed resource.
    pub fn restore(&self, resource: &mut dyn Resource) -> Result<(), ProvisionerError> {
        if self.schema_version > RECORD_SCHEMA_VERSION {
            return Err(ProvisionerError::State(format!(
                "{} was written with record schema {} (this build understands up to {})",
                self.key(),
                self.schema_version,
                RECORD_SCHEMA_VERSION
            )));
        }
        resource::observe(resource, Some(self.data.clone()))
    }
}

impl ProvisionerState {
    pub fn new(project: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            version: STATE_VERSION,
            project: project.into(),
            environment: environment.into(),
            updated_at: None,
            resources: Vec::new(),
        }
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&ResourceRecord> {
        self.resources
            .iter()
            .find(|r| r.kind == key.kind && r.name == key.name)
    }

    /// Rebuild the record list from `resources`.
    pub fn capture<'a>(
        &mut self,
        resources: impl IntoIterator<Item = &'a dyn Resource>,
    ) -> Result<(), ProvisionerError> {
        let mut records = Vec::new();
        for resource in resources {
            if let Some(record) = ResourceRecord::capture(resource)? {
                records.push(record);
            }
        }
        records.sort_by_key(ResourceRecord::key);
        self.resources = records;
        self.updated_at = Some(jiff::Timestamp::now());
        Ok(())
    }

    /// Reject state written by a newer build.
    pub fn check_version(&self) -> Result<(), ProvisionerError> {
        if self.version > STATE_VERSION {
            return Err(ProvisionerError::State(format!(
                "state version {} is newer than supported version {STATE_VERSION}",
                self.version
            )));
        }
        Ok(())
    }
}
