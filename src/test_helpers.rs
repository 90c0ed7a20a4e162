//! Shared test utilities.
//!
//! Record builders for in-memory FileSets, lookups that panic with the list
//! of available paths on a miss, and a copy of the sample project for tests
//! that touch the filesystem.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let files = fileset(vec![
//!     doc("reference/firmware.md", json!({"devices": ["photon", "electron"]})),
//! ]);
//! let out = fanout(files, &sample_catalog()).unwrap();
//! assert_eq!(find(&out, "reference/firmware/photon.md").metadata["device"], "photon");
//! ```

use std::path::Path;
use tempfile::TempDir;

pub use serde_json::json;
use serde_json::Value;

use crate::devices::DeviceCatalog;
use crate::types::{FileRecord, FileSet};

// =========================================================================
// Fixture setup
// =========================================================================

/// A private copy of the sample project in `fixtures/content/`, safe to edit.
pub fn setup_fixtures() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/content");
    copy_dir_recursive(&fixtures, tmp.path()).unwrap();
    tmp
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            std::fs::create_dir_all(&dst_path)?;
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

// =========================================================================
// Record builders
// =========================================================================

/// A record with contents `body` and metadata taken from a JSON object.
pub fn doc(path: &str, metadata: Value) -> FileRecord {
    let record = FileRecord::new(path, "body");
    match metadata {
        Value::Object(map) => record.with_metadata(map.into_iter().collect()),
        Value::Null => record,
        other => panic!("metadata for '{path}' must be a JSON object, got {other}"),
    }
}

pub fn fileset(records: Vec<FileRecord>) -> FileSet {
    records.into_iter().collect()
}

/// The three-device catalog used throughout the unit tests.
pub fn sample_catalog() -> DeviceCatalog {
    DeviceCatalog::from_json(
        r#"{
            "photon":   { "wifi": true,  "cellular": false },
            "electron": { "wifi": false, "cellular": true },
            "argon":    { "wifi": true,  "mesh": true }
        }"#,
    )
    .unwrap()
}

// =========================================================================
// FileSet lookups, panicking with the available paths on a miss
// =========================================================================

/// Find a record by path. Panics if not found.
pub fn find<'a>(files: &'a FileSet, path: &str) -> &'a FileRecord {
    files.get(path).unwrap_or_else(|| {
        let paths: Vec<&str> = files.paths().collect();
        panic!("record '{path}' not found. Available: {paths:?}")
    })
}

/// `collections.<name>` of a record. Panics if the record isn't a member.
pub fn position<'a>(files: &'a FileSet, path: &str, collection: &str) -> &'a Value {
    find(files, path)
        .metadata
        .get("collections")
        .and_then(|c| c.get(collection))
        .unwrap_or_else(|| panic!("'{path}' is not a member of collection '{collection}'"))
}
