//! Shared types threaded through every pipeline stage.
//!
//! A build is a fold over a single [`FileSet`]: every stage receives the whole
//! set by value and returns the next one. Records are keyed by normalized
//! relative path (`guide/intro.md`, never `./guide//intro.md`), and the map is
//! ordered so iteration, and therefore every stage's output, is reproducible.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Frontmatter-derived and pipeline-injected keys of a record.
pub type Metadata = BTreeMap<String, Value>;

/// Metadata keys read or written by more than one stage.
pub mod keys {
    /// Target device list declared in frontmatter.
    pub const DEVICES: &str = "devices";
    /// Device of a fanned-out variant.
    pub const DEVICE: &str = "device";
    /// Explicit canonical variant for a forked document.
    pub const DEFAULT_DEVICE: &str = "default_device";
    /// Public URL a redirect stub points at.
    pub const REDIRECT: &str = "redirect";
    pub const TITLE: &str = "title";
    pub const TEMPLATE: &str = "template";
    pub const PERMALINK: &str = "permalink";
    /// Names of the collections a record belongs to.
    pub const COLLECTION: &str = "collection";
    /// Per-collection position: `{ name: { index, previous, next, group } }`.
    pub const COLLECTIONS: &str = "collections";
    pub const BRANCH: &str = "branch";
    pub const ENVIRONMENT: &str = "environment";
}

/// A single document or asset in the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Normalized relative path; always equal to the record's key in a [`FileSet`].
    pub path: String,
    pub contents: Vec<u8>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl FileRecord {
    pub fn new(path: impl AsRef<str>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: normalize_path(path.as_ref()),
            contents: contents.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Contents decoded as UTF-8, lossy for binary assets.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.contents)
    }

    /// String-valued metadata lookup.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn is_redirect(&self) -> bool {
        self.metadata.contains_key(keys::REDIRECT)
    }

    pub fn has_extension(&self, ext: &str) -> bool {
        split_extension(&self.path).1 == Some(ext)
    }
}

/// The in-memory document tree: normalized path → record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileSet {
    files: BTreeMap<String, FileRecord>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(&normalize_path(path))
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(&normalize_path(path))
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut FileRecord> {
        self.files.get_mut(&normalize_path(path))
    }

    /// Insert a record under its (normalized) path, returning any record it replaced.
    pub fn insert(&mut self, mut record: FileRecord) -> Option<FileRecord> {
        record.path = normalize_path(&record.path);
        self.files.insert(record.path.clone(), record)
    }

    pub fn remove(&mut self, path: &str) -> Option<FileRecord> {
        self.files.remove(&normalize_path(path))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FileRecord> {
        self.files.values_mut()
    }
}

impl FromIterator<FileRecord> for FileSet {
    fn from_iter<I: IntoIterator<Item = FileRecord>>(iter: I) -> Self {
        let mut set = FileSet::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}

impl IntoIterator for FileSet {
    type Item = FileRecord;
    type IntoIter = std::collections::btree_map::IntoValues<String, FileRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.into_values()
    }
}

/// Normalize a path into FileSet key form.
///
/// Backslashes become slashes, empty and `.` segments are dropped, and `..`
/// pops the previous segment (never escaping the root).
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// Split `dir/name.ext` into (`dir/name`, `Some("ext")`).
///
/// Only the last segment is considered, and dotfiles have no extension.
pub fn split_extension(path: &str) -> (&str, Option<&str>) {
    let name_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[name_start..].rfind('.') {
        Some(dot) if dot > 0 => {
            let at = name_start + dot;
            (&path[..at], Some(&path[at + 1..]))
        }
        _ => (path, None),
    }
}

/// Public URL of a record path, consistent with the permalink layout.
///
/// - `guide/intro.md` → `/guide/intro/`
/// - `guide/intro/index.html` → `/guide/intro/`
/// - `index.md` → `/`
/// - `img/logo.png` → `/img/logo.png`
pub fn url_for(path: &str) -> String {
    let path = normalize_path(path);
    let (stem, ext) = split_extension(&path);
    if !matches!(ext, Some("md") | Some("html")) {
        return format!("/{path}");
    }
    let stem = if stem == "index" {
        ""
    } else {
        stem.strip_suffix("/index").unwrap_or(stem)
    };
    if stem.is_empty() {
        "/".to_string()
    } else {
        format!("/{stem}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_strips_noise() {
        assert_eq!(normalize_path("./guide//intro.md"), "guide/intro.md");
        assert_eq!(normalize_path("/guide/intro.md"), "guide/intro.md");
        assert_eq!(normalize_path("guide\\intro.md"), "guide/intro.md");
    }

    #[test]
    fn normalize_never_escapes_root() {
        assert_eq!(normalize_path("../../etc/passwd"), "etc/passwd");
        assert_eq!(normalize_path("a/b/../c"), "a/c");
    }

    #[test]
    fn split_extension_last_segment_only() {
        assert_eq!(split_extension("a.b/c"), ("a.b/c", None));
        assert_eq!(split_extension("a/c.md"), ("a/c", Some("md")));
        assert_eq!(split_extension("a/.hidden"), ("a/.hidden", None));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", Some("gz")));
    }

    #[test]
    fn url_for_documents() {
        assert_eq!(url_for("guide/intro.md"), "/guide/intro/");
        assert_eq!(url_for("guide/intro.html"), "/guide/intro/");
        assert_eq!(url_for("guide/intro/index.html"), "/guide/intro/");
        assert_eq!(url_for("index.md"), "/");
        assert_eq!(url_for("reference/firmware/photon.md"), "/reference/firmware/photon/");
    }

    #[test]
    fn url_for_assets_keeps_extension() {
        assert_eq!(url_for("img/logo.png"), "/img/logo.png");
        assert_eq!(url_for("old/page"), "/old/page");
    }

    #[test]
    fn insert_normalizes_key_and_record_path() {
        let mut set = FileSet::new();
        set.insert(FileRecord::new("x", "a").with_metadata(Metadata::new()));
        let mut record = FileRecord::new("ignored", "b");
        record.path = "./docs//a.md".to_string();
        set.insert(record);

        assert!(set.contains("docs/a.md"));
        assert_eq!(set.get("docs/a.md").unwrap().path, "docs/a.md");
        assert_eq!(set.paths().collect::<Vec<_>>(), vec!["docs/a.md", "x"]);
    }

    #[test]
    fn insert_returns_replaced_record() {
        let mut set = FileSet::new();
        assert!(set.insert(FileRecord::new("a.md", "one")).is_none());
        let old = set.insert(FileRecord::new("a.md", "two")).unwrap();
        assert_eq!(old.contents, b"one");
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn meta_helpers() {
        let mut meta = Metadata::new();
        meta.insert(keys::TITLE.into(), json!("Intro"));
        meta.insert(keys::REDIRECT.into(), json!("/x/"));
        let record = FileRecord::new("a.md", "").with_metadata(meta);

        assert_eq!(record.meta_str(keys::TITLE), Some("Intro"));
        assert!(record.is_redirect());
        assert!(record.has_extension("md"));
    }
}
