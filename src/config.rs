//! Project configuration module.
//!
//! Handles loading, validating, and merging the project's `config.toml`, plus
//! the two JSON side files every build reads once: the device catalog and the
//! redirect map.
//!
//! ## Config File Location
//!
//! ```text
//! project/
//! ├── config.toml              # Build settings (optional)
//! ├── devices.json             # Device catalog: id → { capability: bool }
//! ├── redirects.json           # Static redirects: from → to
//! └── src/                     # Source documents
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! title = "Documentation"
//! source = "src"
//! destination = "build"
//! devices = "devices.json"
//! redirects = "redirects.json"
//!
//! [search]
//! enabled = true
//! path = "search-index.json"
//! flag = "lunr"
//! filters = ["trimmer", "drop-empty", "stop-words"]
//!
//! [search.fields]
//! title = 10
//! contents = 1
//!
//! [processing]
//! max_workers = 100
//! max_excluded = 25
//!
//! [collections.guide]
//! pattern = "guide/:section/*.md"
//! sort_by = "order"
//! static_order = ["getting-started", "advanced"]
//! ```
//!
//! Config files are sparse: user values are merged over the stock defaults,
//! and unknown keys are rejected to catch typos early.

use crate::collections::CollectionSpec;
use crate::search::FILTER_NAMES;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the project configuration file.
pub const CONFIG_FILENAME: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("malformed {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("unknown device `{device}` referenced by {path}")]
    UnknownDevice { device: String, path: String },
    #[error("{count} source files were excluded (limit {limit})")]
    TooManyExclusions { count: usize, limit: usize },
}

/// Project configuration loaded from `config.toml`.
///
/// All fields have defaults; a project without a config file builds `src/`
/// into `build/` with search indexing on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Site title shown in the page layout.
    pub title: String,
    /// Source directory, relative to the project root.
    pub source: String,
    /// Destination directory, relative to the project root.
    pub destination: String,
    /// Device catalog JSON, relative to the project root.
    pub devices: String,
    /// Redirect map JSON, relative to the project root.
    pub redirects: String,
    /// Search index assembly.
    pub search: SearchConfig,
    /// Worker pool and failure tolerance.
    pub processing: ProcessingConfig,
    /// Named navigation collections.
    pub collections: BTreeMap<String, CollectionSpec>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: "Documentation".to_string(),
            source: "src".to_string(),
            destination: "build".to_string(),
            devices: "devices.json".to_string(),
            redirects: "redirects.json".to_string(),
            search: SearchConfig::default(),
            processing: ProcessingConfig::default(),
            collections: BTreeMap::new(),
        }
    }
}

impl SiteConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.trim().is_empty() || self.destination.trim().is_empty() {
            return Err(ConfigError::Validation(
                "source and destination must not be empty".into(),
            ));
        }
        if self.source == self.destination {
            return Err(ConfigError::Validation(
                "source and destination must differ".into(),
            ));
        }
        if self.processing.max_workers == 0 {
            return Err(ConfigError::Validation(
                "processing.max_workers must be at least 1".into(),
            ));
        }
        if self.search.path.trim().is_empty() {
            return Err(ConfigError::Validation("search.path must not be empty".into()));
        }
        if self.search.fields.is_empty() {
            return Err(ConfigError::Validation(
                "search.fields must not be empty".into(),
            ));
        }
        if let Some((field, _)) = self
            .search
            .fields
            .iter()
            .find(|(_, w)| !w.is_finite() || **w <= 0.0)
        {
            return Err(ConfigError::Validation(format!(
                "search.fields.{field} must be a positive weight"
            )));
        }
        if let Some(name) = self
            .search
            .filters
            .iter()
            .find(|f| !FILTER_NAMES.contains(&f.as_str()))
        {
            return Err(ConfigError::Validation(format!(
                "unknown search filter `{name}` (expected one of {FILTER_NAMES:?})"
            )));
        }
        if let Some((name, _)) = self
            .collections
            .iter()
            .find(|(_, spec)| spec.pattern.trim().is_empty())
        {
            return Err(ConfigError::Validation(format!(
                "collections.{name}.pattern must not be empty"
            )));
        }
        Ok(())
    }

    pub fn source_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.source)
    }

    pub fn destination_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.destination)
    }

    pub fn devices_path(&self, root: &Path) -> PathBuf {
        root.join(&self.devices)
    }

    pub fn redirects_path(&self, root: &Path) -> PathBuf {
        root.join(&self.redirects)
    }
}

/// Search index settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    /// Build the index at all. The `SEARCH_INDEX` environment toggle overrides this.
    pub enabled: bool,
    /// Output path of the index artifact inside the destination tree.
    pub path: String,
    /// Metadata key marking a document as indexable.
    pub flag: String,
    /// Token filters applied in order during tokenization.
    pub filters: Vec<String>,
    /// Field name → weight. `contents` is the rendered body; anything else is metadata.
    pub fields: BTreeMap<String, f64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "search-index.json".to_string(),
            flag: "lunr".to_string(),
            filters: vec![
                "trimmer".to_string(),
                "drop-empty".to_string(),
                "stop-words".to_string(),
            ],
            fields: BTreeMap::from([("contents".to_string(), 1.0), ("title".to_string(), 10.0)]),
        }
    }
}

/// Worker pool and failure tolerance settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Upper bound on concurrent per-file workers.
    pub max_workers: usize,
    /// Source files that may be excluded for malformed frontmatter before
    /// the build is aborted.
    pub max_excluded: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_workers: 100,
            max_excluded: 25,
        }
    }
}

/// Worker threads actually spawned: `max_workers`, capped at the core count.
pub fn effective_workers(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_workers.clamp(1, cores)
}

// =============================================================================
// Layered loading
// =============================================================================

/// `SiteConfig::default()` as a TOML table, the layer `config.toml` sits on.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(SiteConfig::default()).expect("SiteConfig defaults are plain TOML")
}

/// Lay `overlay` over `base`. Tables merge per key, anything else is replaced.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    use toml::Value::Table;

    match (base, overlay) {
        (Table(mut merged), Table(layer)) => {
            for (key, value) in layer {
                let value = if let Some(existing) = merged.remove(&key) {
                    merge_toml(existing, value)
                } else {
                    value
                };
                merged.insert(key, value);
            }
            Table(merged)
        }
        (_, replacement) => replacement,
    }
}

/// The user's `config.toml` as an untyped table, or `None` without one.
pub fn load_raw_config(root: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let path = root.join(CONFIG_FILENAME);
    if !path.is_file() {
        tracing::debug!(path = %path.display(), "no config.toml, building with defaults");
        return Ok(None);
    }
    let text = fs::read_to_string(&path)?;
    Ok(Some(toml::from_str(&text)?))
}

/// Deserialize `base` with `overlay` laid over it and check the result.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<SiteConfig, ConfigError> {
    let layered = overlay.into_iter().fold(base, merge_toml);
    let config = SiteConfig::deserialize(layered)?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(root: &Path) -> Result<SiteConfig, ConfigError> {
    resolve_config(stock_defaults_value(), load_raw_config(root)?)
}

/// Read a JSON side file, treating a missing file as `None`.
pub(crate) fn read_json_file<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, ConfigError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "side file not found");
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| ConfigError::Malformed {
            path: path.to_path_buf(),
            source,
        })
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# docpipe configuration
# =====================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

# Site title used by the page layout.
title = "Documentation"

# Source and destination directories, relative to this file.
source = "src"
destination = "build"

# Device catalog: { "<device-id>": { "<capability>": true|false } }.
# Documents listing `devices = [...]` in their frontmatter are fanned out
# into one variant per device; every id must appear in this catalog.
devices = "devices.json"

# Static redirects: { "<from-path>": "<to-path>" }.
redirects = "redirects.json"

# ---------------------------------------------------------------------------
# Search index
# ---------------------------------------------------------------------------
[search]
# Set SEARCH_INDEX=0 in the environment to skip the index for one build.
enabled = true

# Artifact path inside the destination tree.
path = "search-index.json"

# Frontmatter key that marks a document as indexable (`lunr = true`).
flag = "lunr"

# Token filters, applied in order: trimmer, drop-empty, stop-words.
filters = ["trimmer", "drop-empty", "stop-words"]

# Field weights. `contents` is the rendered page body; any other name is
# read from frontmatter.
[search.fields]
contents = 1.0
title = 10.0

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum concurrent per-file workers.
max_workers = 100

# Files with malformed frontmatter are skipped with a warning; more than
# this many aborts the build.
max_excluded = 25

# ---------------------------------------------------------------------------
# Collections (prev/next navigation)
# ---------------------------------------------------------------------------
# [collections.guide]
# pattern = "guide/:section/*.md"   # `:section` groups members by directory
# sort_by = "order"                 # frontmatter key, ascending, missing last
# static_order = ["getting-started", "advanced"]
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = SiteConfig::default();
        assert_eq!(config.source, "src");
        assert_eq!(config.destination, "build");
        assert!(config.search.enabled);
        assert_eq!(config.search.fields["title"], 10.0);
        assert_eq!(config.processing.max_workers, 100);
        assert!(config.collections.is_empty());
    }

    #[test]
    fn parse_partial_config() {
        let toml = r##"
destination = "public"

[search.fields]
tags = 5
"##;
        let config = resolve_config(stock_defaults_value(), Some(toml::from_str(toml).unwrap()))
            .unwrap();
        assert_eq!(config.destination, "public");
        assert_eq!(config.source, "src");
        // Weight tables merge key-by-key
        assert_eq!(config.search.fields["tags"], 5.0);
        assert_eq!(config.search.fields["title"], 10.0);
    }

    #[test]
    fn parse_collections() {
        let toml = r##"
[collections.guide]
pattern = "guide/:section/*.md"
sort_by = "order"
static_order = ["getting-started", "advanced"]

[collections.tutorials]
pattern = "tutorials/*.md"
"##;
        let config: SiteConfig = toml::from_str(toml).unwrap();
        let guide = &config.collections["guide"];
        assert_eq!(guide.pattern, "guide/:section/*.md");
        assert_eq!(guide.static_order, vec!["getting-started", "advanced"]);
        assert_eq!(config.collections["tutorials"].sort_by, "order");
    }

    // =========================================================================
    // load_config tests
    // =========================================================================

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config, SiteConfig::default());
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILENAME),
            "title = \"Device Docs\"\n[processing]\nmax_workers = 8\n",
        )
        .unwrap();

        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.title, "Device Docs");
        assert_eq!(config.processing.max_workers, 8);
        assert_eq!(config.processing.max_excluded, 25);
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILENAME), "this is not valid toml [[[").unwrap();
        assert!(matches!(load_config(tmp.path()), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn unknown_key_rejected() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILENAME), "[search]\nenabeld = false\n").unwrap();
        assert!(matches!(load_config(tmp.path()), Err(ConfigError::Toml(_))));
    }

    // =========================================================================
    // Validation tests
    // =========================================================================

    #[test]
    fn validate_default_config_passes() {
        assert!(SiteConfig::default().validate().is_ok());
    }

    #[test]
    fn effective_workers_clamped_to_cores() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let config = ProcessingConfig {
            max_workers: 99999,
            ..ProcessingConfig::default()
        };
        assert_eq!(effective_workers(&config), cores);
        let one = ProcessingConfig {
            max_workers: 1,
            ..ProcessingConfig::default()
        };
        assert_eq!(effective_workers(&one), 1);
    }

    #[test]
    fn validate_zero_workers() {
        let mut config = SiteConfig::default();
        config.processing.max_workers = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validate_same_source_and_destination() {
        let mut config = SiteConfig::default();
        config.destination = "src".into();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validate_unknown_filter() {
        let mut config = SiteConfig::default();
        config.search.filters.push("stemmer".into());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stemmer"));
    }

    #[test]
    fn validate_non_positive_weight() {
        let mut config = SiteConfig::default();
        config.search.fields.insert("body".into(), 0.0);
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    // =========================================================================
    // Side files
    // =========================================================================

    #[test]
    fn json_side_file_missing_is_none() {
        let tmp = TempDir::new().unwrap();
        let value: Option<BTreeMap<String, String>> =
            read_json_file(&tmp.path().join("redirects.json")).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn json_side_file_malformed_names_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("devices.json");
        fs::write(&path, "{ not json").unwrap();
        let err = read_json_file::<BTreeMap<String, String>>(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { .. }));
        assert!(err.to_string().contains("devices.json"));
    }

    // =========================================================================
    // Stock config
    // =========================================================================

    #[test]
    fn stock_config_toml_roundtrips_to_defaults() {
        let config: SiteConfig = toml::from_str(stock_config_toml()).unwrap();
        assert_eq!(config, SiteConfig::default());
    }

    #[test]
    fn stock_defaults_value_has_all_sections() {
        let val = stock_defaults_value();
        assert!(val.get("search").is_some());
        assert!(val.get("processing").is_some());
        assert!(val.get("collections").is_some());
    }
}
