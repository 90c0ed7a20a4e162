//! Redirect stubs and the static redirect map.
//!
//! A redirect stub is a tiny HTML page whose only payload is "go to X": a
//! meta refresh, a canonical link, a script fallback, and a plain link. The
//! target URL is also recorded under the `redirect` metadata key so later
//! stages can recognise stubs and leave them alone.
//!
//! Stubs come from two places: device fan-out (the original path of a forked
//! document) and [`RedirectStage`], which applies a static `from → to` map
//! loaded from `redirects.json`.

use crate::config::{ConfigError, read_json_file};
use crate::pipeline::{Stage, StageError};
use crate::types::{FileRecord, FileSet, Metadata, keys, normalize_path, split_extension, url_for};
use maud::{DOCTYPE, PreEscaped, html};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Render the fixed redirect page for `target`.
pub fn render_redirect(target: &str) -> String {
    // JSON string literals are valid JS; `<` is escaped so the target can't close the script.
    let js_target = serde_json::to_string(target)
        .unwrap_or_else(|_| "\"/\"".to_string())
        .replace('<', "\\u003c");

    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                title { "Redirecting…" }
                link rel="canonical" href=(target);
                meta name="robots" content="noindex";
                meta http-equiv="refresh" content={ "0; url=" (target) };
                script { (PreEscaped(format!("location.replace({js_target});"))) }
            }
            body {
                p {
                    "This page has moved to "
                    a href=(target) { (target) }
                    "."
                }
            }
        }
    }
    .into_string()
}

/// Build a stub record at `path` pointing at `target`.
pub fn redirect_stub(path: &str, target: &str) -> FileRecord {
    let mut metadata = Metadata::new();
    metadata.insert(keys::REDIRECT.to_string(), Value::String(target.to_string()));
    FileRecord::new(path, render_redirect(target)).with_metadata(metadata)
}

/// Public href for a redirect destination.
///
/// Absolute URLs and rooted paths pass through; relative paths are rooted,
/// keeping a trailing slash.
pub fn redirect_href(to: &str) -> String {
    if to.starts_with('/') || to.starts_with("http://") || to.starts_with("https://") {
        return to.to_string();
    }
    let path = normalize_path(to);
    if to.ends_with('/') && !path.is_empty() {
        format!("/{path}/")
    } else {
        format!("/{path}")
    }
}

/// Static `from → to` redirects.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct RedirectMap {
    entries: BTreeMap<String, String>,
}

impl RedirectMap {
    /// Load from a JSON file; a missing file yields an empty map.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw: Self = read_json_file(path)?.unwrap_or_default();
        raw.normalized()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
        .normalized()
    }

    fn normalized(self) -> Result<Self, ConfigError> {
        let mut entries = BTreeMap::new();
        for (from, to) in self.entries {
            let key = normalize_path(&from);
            if key.is_empty() || to.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "redirect `{from}` → `{to}` needs both a source and a destination"
                )));
            }
            if entries.insert(key.clone(), to).is_some() {
                return Err(ConfigError::Validation(format!(
                    "redirect source `{key}` is listed twice"
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Output path of the stub for a redirect source.
///
/// A source without an extension names a page and takes its permalink form
/// (`old/page` → `old/page/index.html`); any other source is kept as is.
pub fn stub_path(from: &str) -> String {
    match split_extension(from) {
        (_, Some(_)) => from.to_string(),
        (stem, None) => format!("{stem}/index.html"),
    }
}

/// Insert a stub for every `from`, replacing the record served at that URL.
pub fn apply_redirects(mut files: FileSet, map: &RedirectMap) -> FileSet {
    let mut by_url: BTreeMap<String, String> = BTreeMap::new();
    for path in files.paths() {
        by_url.entry(url_for(path)).or_insert_with(|| path.to_string());
    }

    for (from, to) in map.iter() {
        let candidate = stub_path(from);
        let url = url_for(&candidate);
        let path = if files.contains(&candidate) {
            candidate
        } else {
            by_url.get(&url).cloned().unwrap_or(candidate)
        };

        if let Some(previous) = files.insert(redirect_stub(&path, &redirect_href(to)))
            && !previous.is_redirect()
        {
            tracing::debug!(from, path = %path, "redirect replaced an existing page");
        }
        by_url.entry(url).or_insert(path);
    }
    files
}

pub struct RedirectStage {
    map: Arc<RedirectMap>,
}

impl RedirectStage {
    pub fn new(map: Arc<RedirectMap>) -> Self {
        Self { map }
    }
}

impl Stage for RedirectStage {
    fn name(&self) -> &str {
        "redirects"
    }

    fn transform(&self, files: FileSet) -> Result<FileSet, StageError> {
        Ok(apply_redirects(files, &self.map))
    }
}
