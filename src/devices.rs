//! Device catalog and capability flags.
//!
//! The catalog is a JSON document mapping device ids to capability sets:
//!
//! ```json
//! {
//!   "photon":   { "wifi": true,  "cellular": false },
//!   "electron": { "wifi": false, "cellular": true },
//!   "argon":    { "wifi": true,  "mesh": true }
//! }
//! ```
//!
//! It is loaded once per build and only read afterwards. [`FeatureFlagStage`]
//! turns a variant's `device` into one `has-<capability>` boolean per
//! capability known anywhere in the catalog, so templates can test any flag
//! without checking for its presence first.

use crate::config::{ConfigError, read_json_file};
use crate::pipeline::{Stage, StageError};
use crate::types::{FileSet, keys};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

pub type Capabilities = BTreeMap<String, bool>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceCatalog {
    devices: BTreeMap<String, Capabilities>,
}

impl DeviceCatalog {
    /// Load from a JSON file; a missing file yields an empty catalog.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let catalog: Self = read_json_file(path)?.unwrap_or_default();
        tracing::debug!(devices = catalog.len(), "device catalog loaded");
        Ok(catalog)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn contains(&self, device: &str) -> bool {
        self.devices.contains_key(device)
    }

    /// Every capability named by any device.
    pub fn capabilities(&self) -> BTreeSet<&str> {
        self.devices
            .values()
            .flat_map(|caps| caps.keys().map(String::as_str))
            .collect()
    }

    /// `has-<capability>` flags for a device, covering every known capability.
    ///
    /// Returns `None` for a device not in the catalog.
    pub fn flags_for(&self, device: &str) -> Option<BTreeMap<String, bool>> {
        let own = self.devices.get(device)?;
        Some(
            self.capabilities()
                .into_iter()
                .map(|cap| (flag_key(cap), own.get(cap).copied().unwrap_or(false)))
                .collect(),
        )
    }
}

pub fn flag_key(capability: &str) -> String {
    format!("has-{capability}")
}

/// Inject capability flags into every record that carries a `device`.
pub fn annotate(mut files: FileSet, catalog: &DeviceCatalog) -> Result<FileSet, StageError> {
    for record in files.iter_mut() {
        let Some(device) = record.metadata.get(keys::DEVICE) else {
            continue;
        };
        let Some(device) = device.as_str() else {
            return Err(StageError::record(&record.path, "`device` must be a string"));
        };
        let flags = catalog
            .flags_for(device)
            .ok_or_else(|| ConfigError::UnknownDevice {
                device: device.to_string(),
                path: record.path.clone(),
            })?;
        for (key, value) in flags {
            record.metadata.insert(key, Value::Bool(value));
        }
    }
    Ok(files)
}

/// Runs after device fan-out.
pub struct FeatureFlagStage {
    catalog: Arc<DeviceCatalog>,
}

impl FeatureFlagStage {
    pub fn new(catalog: Arc<DeviceCatalog>) -> Self {
        Self { catalog }
    }
}

impl Stage for FeatureFlagStage {
    fn name(&self) -> &str {
        "feature-flags"
    }

    fn transform(&self, files: FileSet) -> Result<FileSet, StageError> {
        annotate(files, &self.catalog)
    }
}
