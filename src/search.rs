//! Search index assembly.
//!
//! Runs after markdown rendering, so `contents` is the rendered HTML with
//! its tags stripped. Every other configured field is read from metadata.
//! Only records whose indexable flag (`lunr` by default) is `true` are
//! indexed; redirect stubs never are.
//!
//! The artifact is a single JSON document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "fields": { "contents": 1.0, "title": 10.0 },
//!   "documents": [{ "path": "guide/intro.html", "url": "/guide/intro/", "title": "Intro" }],
//!   "index": {
//!     "intro": [{ "path": "guide/intro.html", "field": "title", "weight": 10.0 }]
//!   }
//! }
//! ```
//!
//! A posting's weight is the term frequency within the field times the
//! field weight, so ranking a term is a sum over its postings.

use crate::config::{ConfigError, SearchConfig};
use crate::pipeline::{Stage, StageError};
use crate::types::{FileRecord, FileSet, keys, url_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::info;

pub const INDEX_VERSION: u32 = 1;

/// Filter names accepted in `search.filters`.
pub const FILTER_NAMES: &[&str] = &["trimmer", "drop-empty", "stop-words"];

/// Field name that reads the rendered body instead of metadata.
pub const CONTENTS_FIELD: &str = "contents";

/// A token transformation; returning `None` drops the token.
pub trait TokenFilter: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, token: String) -> Option<String>;
}

/// Strips leading and trailing non-alphanumeric characters.
pub struct Trimmer;

impl TokenFilter for Trimmer {
    fn name(&self) -> &'static str {
        "trimmer"
    }

    fn apply(&self, token: String) -> Option<String> {
        let trimmed = token.trim_matches(|c: char| !c.is_alphanumeric());
        if trimmed.len() == token.len() {
            Some(token)
        } else {
            Some(trimmed.to_string())
        }
    }
}

pub struct DropEmpty;

impl TokenFilter for DropEmpty {
    fn name(&self) -> &'static str {
        "drop-empty"
    }

    fn apply(&self, token: String) -> Option<String> {
        (!token.is_empty()).then_some(token)
    }
}

/// Drops common English words. Sorted for binary search.
pub struct StopWords;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "if", "in", "into",
    "is", "it", "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there",
    "these", "they", "this", "to", "was", "will", "with",
];

impl TokenFilter for StopWords {
    fn name(&self) -> &'static str {
        "stop-words"
    }

    fn apply(&self, token: String) -> Option<String> {
        STOP_WORDS
            .binary_search(&token.as_str())
            .is_err()
            .then_some(token)
    }
}

pub fn filter_by_name(name: &str) -> Option<Box<dyn TokenFilter>> {
    match name {
        "trimmer" => Some(Box::new(Trimmer)),
        "drop-empty" => Some(Box::new(DropEmpty)),
        "stop-words" => Some(Box::new(StopWords)),
        _ => None,
    }
}

/// Split on whitespace and hyphens, lowercase, then run `filters` in order.
pub fn tokenize(text: &str, filters: &[Box<dyn TokenFilter>]) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c == '-')
        .filter_map(|raw| {
            filters
                .iter()
                .try_fold(raw.to_lowercase(), |token, filter| filter.apply(token))
        })
        .collect()
}

/// Reduce rendered HTML to its text. Tags become spaces.
pub fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                text.push(' ');
            }
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub path: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub path: String,
    pub field: String,
    pub weight: f64,
}

/// The serialized inverted index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchIndex {
    pub version: u32,
    pub fields: BTreeMap<String, f64>,
    pub documents: Vec<IndexedDocument>,
    pub index: BTreeMap<String, Vec<Posting>>,
}

impl SearchIndex {
    pub fn postings(&self, term: &str) -> &[Posting] {
        self.index
            .get(&term.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Documents containing `term`, highest summed weight first.
    pub fn score(&self, term: &str) -> Vec<(&str, f64)> {
        let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
        for posting in self.postings(term) {
            *totals.entry(posting.path.as_str()).or_default() += posting.weight;
        }
        let mut ranked: Vec<(&str, f64)> = totals.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
    }

    pub fn term_count(&self) -> usize {
        self.index.len()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

pub struct IndexBuilder {
    fields: BTreeMap<String, f64>,
    filters: Vec<Box<dyn TokenFilter>>,
    flag: String,
}

impl IndexBuilder {
    pub fn new(
        fields: BTreeMap<String, f64>,
        filters: Vec<Box<dyn TokenFilter>>,
        flag: impl Into<String>,
    ) -> Self {
        Self {
            fields,
            filters,
            flag: flag.into(),
        }
    }

    pub fn from_config(config: &SearchConfig) -> Result<Self, ConfigError> {
        let filters = config
            .filters
            .iter()
            .map(|name| {
                filter_by_name(name).ok_or_else(|| {
                    ConfigError::Validation(format!("unknown search filter `{name}`"))
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self::new(config.fields.clone(), filters, &config.flag))
    }

    pub fn is_indexable(&self, record: &FileRecord) -> bool {
        !record.is_redirect() && record.metadata.get(&self.flag) == Some(&Value::Bool(true))
    }

    fn field_text(record: &FileRecord, field: &str) -> Option<String> {
        if field == CONTENTS_FIELD {
            return Some(strip_html(&record.text()));
        }
        match record.metadata.get(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            _ => None,
        }
    }

    pub fn build(&self, files: &FileSet) -> SearchIndex {
        let mut documents = Vec::new();
        let mut index: BTreeMap<String, Vec<Posting>> = BTreeMap::new();

        for record in files.iter().filter(|r| self.is_indexable(r)) {
            documents.push(IndexedDocument {
                path: record.path.clone(),
                url: url_for(&record.path),
                title: record.meta_str(keys::TITLE).map(str::to_string),
            });

            for (field, weight) in &self.fields {
                let Some(text) = Self::field_text(record, field) else {
                    continue;
                };
                let mut frequencies: BTreeMap<String, u32> = BTreeMap::new();
                for token in tokenize(&text, &self.filters) {
                    *frequencies.entry(token).or_default() += 1;
                }
                for (token, tf) in frequencies {
                    index.entry(token).or_default().push(Posting {
                        path: record.path.clone(),
                        field: field.clone(),
                        weight: f64::from(tf) * weight,
                    });
                }
            }
        }

        SearchIndex {
            version: INDEX_VERSION,
            fields: self.fields.clone(),
            documents,
            index,
        }
    }
}

/// Builds the index and adds it to the FileSet as one artifact record.
pub struct SearchIndexStage {
    builder: IndexBuilder,
    path: String,
}

impl SearchIndexStage {
    pub fn new(builder: IndexBuilder, path: impl Into<String>) -> Self {
        Self {
            builder,
            path: path.into(),
        }
    }

    pub fn from_config(config: &SearchConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(IndexBuilder::from_config(config)?, &config.path))
    }
}

impl Stage for SearchIndexStage {
    fn name(&self) -> &str {
        "search-index"
    }

    fn transform(&self, mut files: FileSet) -> Result<FileSet, StageError> {
        if files.contains(&self.path) {
            return Err(StageError::record(
                &self.path,
                "search index path is already taken by a source file",
            ));
        }
        let index = self.builder.build(&files);
        let json = index
            .to_json()
            .map_err(|e| StageError::Failed(format!("serializing search index: {e}")))?;

        info!(
            documents = index.documents.len(),
            terms = index.term_count(),
            path = %self.path,
            "search index built"
        );
        files.insert(FileRecord::new(&self.path, json));
        Ok(files)
    }
}
