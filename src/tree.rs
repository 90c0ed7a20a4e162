//! Source tree loading and output writing.
//!
//! [`load_tree`] walks the source directory once per build and produces the
//! initial [`FileSet`]. Markdown documents may open with a TOML frontmatter
//! block fenced by `+++`:
//!
//! ```text
//! +++
//! title = "Firmware Reference"
//! devices = ["photon", "electron"]
//! lunr = true
//! +++
//! # Firmware
//! ```
//!
//! A document whose frontmatter can't be read is excluded from the build and
//! reported, rather than failing it; the caller decides how many exclusions
//! are tolerable.
//!
//! [`write_tree`] emits one file per record under the destination root.

use crate::types::{FileRecord, FileSet, Metadata, normalize_path};
use rayon::ThreadPool;
use rayon::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

const FENCE: &str = "+++";

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("source directory not found: {0}")]
    SourceMissing(PathBuf),
    #[error("{path}: malformed frontmatter: {message}")]
    Frontmatter { path: String, message: String },
    #[error("{path}: document is not valid UTF-8")]
    Encoding { path: String },
}

impl TreeError {
    /// Errors confined to one record; the record is dropped and the build continues.
    pub fn is_partial(&self) -> bool {
        matches!(self, TreeError::Frontmatter { .. } | TreeError::Encoding { .. })
    }
}

/// A source file left out of the build.
#[derive(Debug, Clone, PartialEq)]
pub struct Exclusion {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct LoadedTree {
    pub files: FileSet,
    pub excluded: Vec<Exclusion>,
}

/// Load every non-hidden file under `root` into a FileSet.
pub fn load_tree(root: &Path) -> Result<LoadedTree, TreeError> {
    if !root.is_dir() {
        return Err(TreeError::SourceMissing(root.to_path_buf()));
    }

    let mut loaded = LoadedTree::default();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map(|p| normalize_path(&p.to_string_lossy()))
            .unwrap_or_default();
        let bytes = fs::read(entry.path())?;

        match parse_document(&rel, bytes) {
            Ok(record) => {
                loaded.files.insert(record);
            }
            Err(e) if e.is_partial() => {
                warn!(path = %rel, error = %e, "excluding source file");
                loaded.excluded.push(Exclusion {
                    path: rel,
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }

    debug!(
        files = loaded.files.len(),
        excluded = loaded.excluded.len(),
        "source tree loaded"
    );
    Ok(loaded)
}

/// Build a record from raw bytes; markdown gets its frontmatter parsed.
pub fn parse_document(path: &str, bytes: Vec<u8>) -> Result<FileRecord, TreeError> {
    let record = FileRecord::new(path, Vec::new());
    if !record.has_extension("md") {
        return Ok(FileRecord {
            contents: bytes,
            ..record
        });
    }

    let text = String::from_utf8(bytes).map_err(|_| TreeError::Encoding {
        path: path.to_string(),
    })?;
    let (frontmatter, body) =
        split_frontmatter(&text).map_err(|message| TreeError::Frontmatter {
            path: path.to_string(),
            message,
        })?;
    let metadata = match frontmatter {
        Some(raw) => parse_frontmatter(raw).map_err(|message| TreeError::Frontmatter {
            path: path.to_string(),
            message,
        })?,
        None => Metadata::new(),
    };

    Ok(FileRecord {
        contents: body.as_bytes().to_vec(),
        metadata,
        ..record
    })
}

/// Split a `+++` fenced block off the top of a document.
///
/// Returns `(None, text)` when the document has no frontmatter.
pub fn split_frontmatter(text: &str) -> Result<(Option<&str>, &str), String> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let Some(rest) = text.strip_prefix(FENCE) else {
        return Ok((None, text));
    };
    let Some(rest) = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))
    else {
        // `+++foo` on the first line is content, not a fence.
        return Ok((None, text));
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == FENCE {
            let body = &rest[offset + line.len()..];
            return Ok((Some(&rest[..offset]), body));
        }
        offset += line.len();
    }
    Err("unterminated `+++` block".to_string())
}

fn parse_frontmatter(raw: &str) -> Result<Metadata, String> {
    let table: toml::Table = toml::from_str(raw).map_err(|e| e.message().to_string())?;
    match serde_json::to_value(table).map_err(|e| e.to_string())? {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Ok(Metadata::new()),
    }
}

/// Write every record to `<dest>/<path>`, creating directories as needed.
///
/// Per-file writes run on `pool`. Returns the number of files written.
pub fn write_tree(files: &FileSet, dest: &Path, pool: &ThreadPool) -> Result<usize, TreeError> {
    fs::create_dir_all(dest)?;
    let records: Vec<&FileRecord> = files.iter().collect();
    pool.install(|| {
        records.par_iter().try_for_each(|record| -> Result<(), TreeError> {
            let target = dest.join(&record.path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, &record.contents)?;
            Ok(())
        })
    })?;
    Ok(records.len())
}
