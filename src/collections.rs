//! Named, ordered document collections for prev/next navigation.
//!
//! A collection selects records with a [`PathMatcher`] pattern. If the
//! pattern captures a segment (`guide/:section/*.md`), members are grouped by
//! the captured value; otherwise all matches form one flat group.
//!
//! Ordering:
//! 1. Groups listed in `static_order`, in that order.
//! 2. Unlisted groups, in first-encountered (path) order.
//! 3. Within a group, ascending `sort_by` metadata; missing values last,
//!    ties keep path order.
//!
//! Each member then receives its position in the flattened order:
//!
//! ```text
//! collection = ["guide"]
//! collections.guide = { index = 0, previous = null, next = "guide/a/two.md", group = "a" }
//! ```

use crate::matcher::{PathMatcher, PatternError};
use crate::pipeline::{Stage, StageError};
use crate::types::{FileRecord, FileSet, keys};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

/// One `[collections.<name>]` table from `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionSpec {
    pub pattern: String,
    /// Metadata key members are sorted by within a group.
    #[serde(default = "default_sort_by")]
    pub sort_by: String,
    /// Group ids that sort first, in this order.
    #[serde(default)]
    pub static_order: Vec<String>,
}

fn default_sort_by() -> String {
    "order".to_string()
}

/// A resolved collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Collection {
    pub name: String,
    pub sort_key: String,
    pub static_order: Vec<String>,
    pub groups: Vec<CollectionGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionGroup {
    /// Captured segment value; `None` for flat collections.
    pub key: Option<String>,
    pub members: Vec<String>,
}

impl Collection {
    /// Member paths in navigation order.
    pub fn members(&self) -> Vec<&str> {
        self.groups
            .iter()
            .flat_map(|g| g.members.iter().map(String::as_str))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|g| g.members.is_empty())
    }
}

struct CompiledSpec {
    name: String,
    matcher: PathMatcher,
    spec: CollectionSpec,
}

fn compile_specs(
    specs: &BTreeMap<String, CollectionSpec>,
) -> Result<Vec<CompiledSpec>, PatternError> {
    specs
        .iter()
        .map(|(name, spec)| {
            Ok(CompiledSpec {
                name: name.clone(),
                matcher: PathMatcher::new(&spec.pattern)?,
                spec: spec.clone(),
            })
        })
        .collect()
}

/// Resolve every collection against the FileSet without mutating it.
pub fn group_collections(
    files: &FileSet,
    specs: &BTreeMap<String, CollectionSpec>,
) -> Result<Vec<Collection>, PatternError> {
    Ok(compile_specs(specs)?
        .iter()
        .map(|compiled| resolve(files, compiled))
        .collect())
}

fn resolve(files: &FileSet, compiled: &CompiledSpec) -> Collection {
    let CompiledSpec { name, matcher, spec } = compiled;

    // First-encountered order falls out of FileSet's sorted iteration.
    let mut groups: Vec<(Option<String>, Vec<&FileRecord>)> = Vec::new();
    for record in files.iter() {
        let Some(captures) = matcher.captures(&record.path) else {
            continue;
        };
        let key = matcher.group_key(&captures);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(record),
            None => groups.push((key, vec![record])),
        }
    }

    let rank = |key: &Option<String>| {
        key.as_ref()
            .and_then(|k| spec.static_order.iter().position(|s| s == k))
            .unwrap_or(usize::MAX)
    };
    groups.sort_by_key(|(key, _)| rank(key));

    let groups = groups
        .into_iter()
        .map(|(key, mut members)| {
            members.sort_by(|a, b| {
                compare_sort_values(a.metadata.get(&spec.sort_by), b.metadata.get(&spec.sort_by))
            });
            CollectionGroup {
                key,
                members: members.into_iter().map(|r| r.path.clone()).collect(),
            }
        })
        .collect();

    Collection {
        name: name.clone(),
        sort_key: spec.sort_by.clone(),
        static_order: spec.static_order.clone(),
        groups,
    }
}

/// Order two sort-key values: numbers, then strings, then booleans; missing
/// or null always last.
pub fn compare_sort_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            Some(Value::Number(_)) => 0,
            Some(Value::String(_)) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Array(_)) | Some(Value::Object(_)) => 3,
            Some(Value::Null) | None => 4,
        }
    }
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Write collection membership and neighbors into member metadata.
pub fn inject(files: &mut FileSet, collection: &Collection) {
    let members = collection.members();
    let group_of: BTreeMap<&str, Option<&str>> = collection
        .groups
        .iter()
        .flat_map(|g| g.members.iter().map(move |m| (m.as_str(), g.key.as_deref())))
        .collect();

    for (index, path) in members.iter().enumerate() {
        let previous = index.checked_sub(1).map(|i| members[i]);
        let next = members.get(index + 1).copied();
        let Some(record) = files.get_mut(path) else {
            continue;
        };

        let names = record
            .metadata
            .entry(keys::COLLECTION.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(list) = names
            && !list.iter().any(|v| v.as_str() == Some(&collection.name))
        {
            list.push(Value::String(collection.name.clone()));
        }

        let positions = record
            .metadata
            .entry(keys::COLLECTIONS.to_string())
            .or_insert_with(|| json!({}));
        if let Value::Object(map) = positions {
            map.insert(
                collection.name.clone(),
                json!({
                    "index": index,
                    "previous": previous,
                    "next": next,
                    "group": group_of.get(path).copied().flatten(),
                }),
            );
        }
    }
}

/// Stage wrapper: resolve all configured collections, then inject.
pub struct CollectionStage {
    specs: BTreeMap<String, CollectionSpec>,
}

impl CollectionStage {
    /// Compiles every pattern up front so a bad pattern fails at construction.
    pub fn new(specs: &BTreeMap<String, CollectionSpec>) -> Result<Self, PatternError> {
        compile_specs(specs)?;
        Ok(Self {
            specs: specs.clone(),
        })
    }
}

impl Stage for CollectionStage {
    fn name(&self) -> &str {
        "collections"
    }

    fn transform(&self, mut files: FileSet) -> Result<FileSet, StageError> {
        let collections = group_collections(&files, &self.specs)
            .map_err(|e| StageError::Failed(e.to_string()))?;
        for collection in &collections {
            debug!(
                collection = %collection.name,
                members = collection.members().len(),
                "collection resolved"
            );
            if !collection.is_empty() {
                inject(&mut files, collection);
            }
        }
        Ok(files)
    }
}
