//! Per-device content fan-out.
//!
//! A document that declares target devices is split into one variant per
//! device, and its original path becomes a redirect to the canonical variant:
//!
//! ```text
//! reference/firmware.md  devices = ["photon", "electron"]
//!
//! reference/firmware.md           → redirect stub → /reference/firmware/photon/
//! reference/firmware/photon.md    device = "photon"
//! reference/firmware/electron.md  device = "electron"
//! ```
//!
//! `index` documents keep their name: `setup/index.md` fans out to
//! `setup/photon/index.md` so the variant URLs stay `/setup/photon/`.
//!
//! The stage works in two phases. [`plan`] inspects the whole FileSet and
//! validates every device id against the catalog and every derived path
//! against existing keys; only if all of that succeeds does [`commit`] touch
//! the FileSet. A failed fan-out leaves no partial output behind.
//!
//! The canonical variant is `default_device` when the document names one,
//! otherwise the first listed device. Duplicate ids keep their first
//! occurrence. Records that already carry `device` are variants and are
//! never forked again.

use crate::config::ConfigError;
use crate::devices::DeviceCatalog;
use crate::pipeline::{Stage, StageError};
use crate::redirect::redirect_stub;
use crate::types::{FileRecord, FileSet, keys, split_extension, url_for};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Everything needed to fork one document.
#[derive(Debug, Clone, PartialEq)]
pub struct ForkPlan {
    pub source: String,
    pub canonical: String,
    pub stub: FileRecord,
    pub variants: Vec<FileRecord>,
}

/// Path of the `device` variant of `path`.
pub fn derived_path(path: &str, device: &str) -> String {
    let (stem, ext) = split_extension(path);
    let Some(ext) = ext else {
        return format!("{path}/{device}");
    };
    let (parent, name) = match stem.rsplit_once('/') {
        Some((parent, name)) => (Some(parent), name),
        None => (None, stem),
    };
    match (parent, name) {
        (Some(parent), "index") => format!("{parent}/{device}/index.{ext}"),
        (None, "index") => format!("{device}/index.{ext}"),
        _ => format!("{stem}/{device}.{ext}"),
    }
}

/// The de-duplicated device list a record declares, or `None` if it doesn't fork.
pub fn requested_devices(record: &FileRecord) -> Result<Option<Vec<String>>, StageError> {
    if record.metadata.contains_key(keys::DEVICE) {
        return Ok(None);
    }
    let ids: Vec<&str> = match record.metadata.get(keys::DEVICES) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(one)) => vec![one.as_str()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str().ok_or_else(|| {
                    StageError::record(&record.path, "`devices` entries must be device ids")
                })
            })
            .collect::<Result<_, _>>()?,
        Some(_) => {
            return Err(StageError::record(
                &record.path,
                "`devices` must be a list of device ids",
            ));
        }
    };

    let mut seen = BTreeSet::new();
    let devices: Vec<String> = ids
        .into_iter()
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect();
    Ok((!devices.is_empty()).then_some(devices))
}

fn canonical_device<'a>(record: &FileRecord, devices: &'a [String]) -> Result<&'a str, StageError> {
    match record.metadata.get(keys::DEFAULT_DEVICE) {
        None => Ok(devices[0].as_str()),
        Some(Value::String(d)) => devices
            .iter()
            .find(|id| *id == d)
            .map(String::as_str)
            .ok_or_else(|| {
                StageError::Config(ConfigError::Validation(format!(
                    "{}: default_device `{d}` is not one of its devices",
                    record.path
                )))
            }),
        Some(_) => Err(StageError::record(&record.path, "`default_device` must be a device id")),
    }
}

fn plan_record(
    record: &FileRecord,
    devices: &[String],
    catalog: &DeviceCatalog,
) -> Result<ForkPlan, StageError> {
    if let Some(unknown) = devices.iter().find(|d| !catalog.contains(d)) {
        return Err(ConfigError::UnknownDevice {
            device: unknown.clone(),
            path: record.path.clone(),
        }
        .into());
    }
    let canonical = derived_path(&record.path, canonical_device(record, devices)?);

    let variants = devices
        .iter()
        .map(|device| {
            let mut variant = record.clone();
            variant.path = derived_path(&record.path, device);
            variant
                .metadata
                .insert(keys::DEVICE.to_string(), Value::String(device.clone()));
            variant
        })
        .collect();

    let mut stub = redirect_stub(&record.path, &url_for(&canonical));
    if let Some(title) = record.metadata.get(keys::TITLE) {
        stub.metadata.insert(keys::TITLE.to_string(), title.clone());
    }

    Ok(ForkPlan {
        source: record.path.clone(),
        canonical,
        stub,
        variants,
    })
}

/// Phase one: validate every forked document without touching the FileSet.
pub fn plan(files: &FileSet, catalog: &DeviceCatalog) -> Result<Vec<ForkPlan>, StageError> {
    let mut plans = Vec::new();
    for record in files.iter() {
        if let Some(devices) = requested_devices(record)? {
            plans.push(plan_record(record, &devices, catalog)?);
        }
    }

    let mut claimed = BTreeSet::new();
    for variant in plans.iter().flat_map(|p| &p.variants) {
        if files.contains(&variant.path) || !claimed.insert(variant.path.as_str()) {
            return Err(StageError::record(
                &variant.path,
                "device variant collides with an existing path",
            ));
        }
    }
    Ok(plans)
}

/// Phase two: replace each source with its stub and insert its variants.
pub fn commit(mut files: FileSet, plans: Vec<ForkPlan>) -> FileSet {
    for plan in plans {
        debug!(
            path = %plan.source,
            variants = plan.variants.len(),
            canonical = %plan.canonical,
            "forked document"
        );
        files.insert(plan.stub);
        for variant in plan.variants {
            files.insert(variant);
        }
    }
    files
}

pub fn fanout(files: FileSet, catalog: &DeviceCatalog) -> Result<FileSet, StageError> {
    let plans = plan(&files, catalog)?;
    Ok(commit(files, plans))
}

pub struct DeviceFanoutStage {
    catalog: Arc<DeviceCatalog>,
}

impl DeviceFanoutStage {
    pub fn new(catalog: Arc<DeviceCatalog>) -> Self {
        Self { catalog }
    }
}

impl Stage for DeviceFanoutStage {
    fn name(&self) -> &str {
        "device-fanout"
    }

    fn transform(&self, files: FileSet) -> Result<FileSet, StageError> {
        fanout(files, &self.catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use serde_json::json;

    #[test]
    fn derived_paths() {
        assert_eq!(
            derived_path("reference/firmware.md", "photon"),
            "reference/firmware/photon.md"
        );
        assert_eq!(derived_path("reference/firmware", "photon"), "reference/firmware/photon");
        assert_eq!(derived_path("setup/index.md", "argon"), "setup/argon/index.md");
        assert_eq!(derived_path("index.md", "argon"), "argon/index.md");
    }

    #[test]
    fn forks_into_variants_and_redirect() {
        let files = fileset(vec![
            doc(
                "reference/firmware.md",
                json!({"title": "Firmware", "devices": ["photon", "electron"]}),
            ),
            doc("other.md", json!({})),
        ]);

        let out = fanout(files, &sample_catalog()).unwrap();

        // the original is now a stub; both variants are new records
        assert_eq!(out.len(), 2 + 2);
        let stub = find(&out, "reference/firmware.md");
        assert_eq!(stub.metadata["redirect"], json!("/reference/firmware/photon/"));
        assert_eq!(stub.metadata["title"], json!("Firmware"));
        assert!(stub.metadata.get("devices").is_none());

        let electron = find(&out, "reference/firmware/electron.md");
        assert_eq!(electron.metadata["device"], json!("electron"));
        assert_eq!(electron.contents, b"body");
        assert_eq!(find(&out, "other.md").metadata.len(), 0);
    }

    #[test]
    fn content_documents_grow_by_devices_minus_one() {
        let files = fileset(vec![
            doc("a.md", json!({"devices": ["photon", "electron", "argon"]})),
            doc("b.md", json!({"devices": ["argon"]})),
        ]);
        let out = fanout(files, &sample_catalog()).unwrap();

        let documents = out.iter().filter(|r| !r.is_redirect()).count();
        let stubs = out.iter().filter(|r| r.is_redirect()).count();
        assert_eq!(documents, 2 + (3 - 1) + (1 - 1));
        assert_eq!(stubs, 2);
        assert_eq!(out.len(), 2 + 3 + 1);
    }

    #[test]
    fn explicit_default_device_wins() {
        let files = fileset(vec![doc(
            "a.md",
            json!({"devices": ["photon", "electron"], "default_device": "electron"}),
        )]);
        let out = fanout(files, &sample_catalog()).unwrap();
        assert_eq!(find(&out, "a.md").metadata["redirect"], json!("/a/electron/"));
    }

    #[test]
    fn default_device_must_be_listed() {
        let files = fileset(vec![doc(
            "a.md",
            json!({"devices": ["photon"], "default_device": "argon"}),
        )]);
        assert!(matches!(
            fanout(files, &sample_catalog()),
            Err(StageError::Config(ConfigError::Validation(_)))
        ));
    }

    #[test]
    fn duplicate_ids_keep_first() {
        let files = fileset(vec![doc(
            "a.md",
            json!({"devices": ["electron", "photon", "electron"]}),
        )]);
        let out = fanout(files, &sample_catalog()).unwrap();

        assert_eq!(out.len(), 1 + 2);
        assert_eq!(find(&out, "a.md").metadata["redirect"], json!("/a/electron/"));
    }

    #[test]
    fn unknown_device_fails_without_partial_output() {
        let files = fileset(vec![
            doc("a.md", json!({"devices": ["photon"]})),
            doc("b.md", json!({"devices": ["photon", "toaster"]})),
        ]);

        let err = plan(&files, &sample_catalog()).unwrap_err();

        match err {
            StageError::Config(ConfigError::UnknownDevice { device, path }) => {
                assert_eq!(device, "toaster");
                assert_eq!(path, "b.md");
            }
            other => panic!("expected unknown device, got {other:?}"),
        }
        // plan() only borrows; nothing was forked
        assert_eq!(files.len(), 2);
        assert!(!files.contains("a/photon.md"));
    }

    #[test]
    fn empty_or_absent_devices_untouched() {
        let files = fileset(vec![
            doc("a.md", json!({"devices": []})),
            doc("b.md", json!({"title": "B"})),
        ]);
        let out = fanout(files.clone(), &sample_catalog()).unwrap();
        assert_eq!(out, files);
    }

    #[test]
    fn variants_are_not_forked_again() {
        let files = fileset(vec![doc("a.md", json!({"devices": ["photon", "argon"]}))]);
        let once = fanout(files, &sample_catalog()).unwrap();
        let twice = fanout(once.clone(), &sample_catalog()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn collision_with_existing_path_is_error() {
        let files = fileset(vec![
            doc("a.md", json!({"devices": ["photon"]})),
            doc("a/photon.md", json!({})),
        ]);
        assert!(matches!(
            fanout(files, &sample_catalog()),
            Err(StageError::Record { .. })
        ));
    }

    #[test]
    fn malformed_devices_is_record_error() {
        let files = fileset(vec![doc("a.md", json!({"devices": 3}))]);
        assert!(matches!(
            fanout(files, &sample_catalog()),
            Err(StageError::Record { .. })
        ));
    }
}
