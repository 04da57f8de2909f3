use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::apply::ApplySettings;
use crate::error::ProvisionerError;

/// Layout version written by [`EngineConfig::save`]. A layout change needs a
/// step in [`migrate`].
const CURRENT_VERSION: u32 = 1;

const APP_DIR: &str = "converge";

/// Engine tuning, stored as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hand-written files may leave this out; they are read as the
    /// current layout.
    #[serde(default)]
    pub config_version: u32,
    /// Width of every bounded worker pool (refresh, apply, file sync,
    /// cache invalidation).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_operation_poll_interval_ms")]
    pub operation_poll_interval_ms: u64,
    #[serde(default = "default_readiness_poll_interval_ms")]
    pub readiness_poll_interval_ms: u64,
    #[serde(default = "default_lock_poll_interval_ms")]
    pub lock_poll_interval_ms: u64,
    /// How long to wait for a held state lock. Unset fails immediately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_wait_secs: Option<u64>,
    /// Where to keep a local copy of state. Unset disables it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_state_dir: Option<PathBuf>,
    /// Read every resource from its provider before planning.
    #[serde(default = "default_refresh")]
    pub refresh: bool,
}

fn default_concurrency() -> usize {
    5
}

fn default_operation_poll_interval_ms() -> u64 {
    2_000
}

fn default_readiness_poll_interval_ms() -> u64 {
    5_000
}

fn default_lock_poll_interval_ms() -> u64 {
    1_000
}

fn default_refresh() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            config_version: CURRENT_VERSION,
            concurrency: default_concurrency(),
            operation_poll_interval_ms: default_operation_poll_interval_ms(),
            readiness_poll_interval_ms: default_readiness_poll_interval_ms(),
            lock_poll_interval_ms: default_lock_poll_interval_ms(),
            lock_wait_secs: None,
            local_state_dir: default_local_state_dir(),
            refresh: default_refresh(),
        }
    }
}

/// `{data_dir}/converge/state`, if the platform has a data directory.
pub fn default_local_state_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join(APP_DIR).join("state"))
}

/// `{config_dir}/converge/engine.json`.
pub fn default_path() -> Result<PathBuf, ProvisionerError> {
    let base = dirs::config_dir()
        .ok_or_else(|| ProvisionerError::Config("no config directory found".to_string()))?;
    Ok(base.join(APP_DIR).join("engine.json"))
}

impl EngineConfig {
    /// Load from `path`, migrating older layouts. A missing file yields the
    /// defaults.
    pub fn load(path: &Path) -> Result<Self, ProvisionerError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no engine config, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, ProvisionerError> {
        let json: Value = serde_json::from_str(contents)?;
        let on_disk_version = json
            .get("config_version")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;

        let migrated = migrate(json, on_disk_version)?;
        let config: EngineConfig = serde_json::from_value(migrated)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ProvisionerError> {
        if self.concurrency == 0 {
            return Err(ProvisionerError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("operation_poll_interval_ms", self.operation_poll_interval_ms),
            ("readiness_poll_interval_ms", self.readiness_poll_interval_ms),
            ("lock_poll_interval_ms", self.lock_poll_interval_ms),
        ] {
            if value == 0 {
                return Err(ProvisionerError::Config(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }

    /// Write to `path` atomically (tmp + rename).
    pub fn save(&self, path: &Path) -> Result<(), ProvisionerError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let mut stamped = self.clone();
        stamped.config_version = CURRENT_VERSION;
        let json = serde_json::to_string_pretty(&stamped)?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json.as_bytes())?;
        std::fs::rename(&tmp_path, path)?;

        tracing::info!(path = %path.display(), "engine config saved");
        Ok(())
    }

    pub fn operation_poll_interval(&self) -> Duration {
        Duration::from_millis(self.operation_poll_interval_ms)
    }

    pub fn readiness_poll_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_interval_ms)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }

    pub fn lock_wait(&self) -> Option<Duration> {
        self.lock_wait_secs.map(Duration::from_secs)
    }

    pub fn apply_settings(&self) -> ApplySettings {
        ApplySettings {
            concurrency: self.concurrency.max(1),
            operation_poll_interval: self.operation_poll_interval(),
            readiness_poll_interval: self.readiness_poll_interval(),
        }
    }
}

/// Bring raw JSON from `from_version` up to [`CURRENT_VERSION`], one step
/// per version.
fn migrate(mut json: Value, from_version: u32) -> Result<Value, ProvisionerError> {
    if from_version > CURRENT_VERSION {
        return Err(ProvisionerError::Config(format!(
            "config_version {from_version} is newer than this build supports ({CURRENT_VERSION})"
        )));
    }
    let obj = json
        .as_object_mut()
        .ok_or_else(|| ProvisionerError::Config("config is not a JSON object".to_string()))?;

    if from_version < 1 {
        obj.insert("config_version".to_string(), Value::from(1));
    }

    Ok(json)
}
