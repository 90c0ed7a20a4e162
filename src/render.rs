//! Default rendering stages: markdown, page layout, permalinks.
//!
//! These sit around the core stages in the standard pipeline:
//!
//! ```text
//! markdown   guide/intro.md → guide/intro.html          (body rendered, title/template defaulted)
//! layout     guide/intro.html                           (wrapped in the page chrome)
//! permalinks guide/intro.html → guide/intro/index.html  (pretty URLs)
//! ```
//!
//! Markdown and layout work per record on the worker pool; permalinks are a
//! cheap rename done in one pass so collisions can be detected.

use crate::pipeline::{Stage, StageError};
use crate::types::{FileRecord, FileSet, keys, split_extension, url_for};
use maud::{DOCTYPE, Markup, PreEscaped, html};
use pulldown_cmark::{Options, Parser, html as md_html};
use rayon::ThreadPool;
use rayon::prelude::*;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

const CSS: &str = include_str!("../static/docs.css");

/// Template applied to markdown documents that don't name one.
pub const DEFAULT_TEMPLATE: &str = "default";
/// `template = "none"` opts a document out of the layout.
pub const NO_TEMPLATE: &str = "none";

/// Rebuild a FileSet from renamed records, failing on the first duplicate key.
fn collect_unique(records: Vec<FileRecord>, reason: &str) -> Result<FileSet, StageError> {
    let mut out = FileSet::new();
    for record in records {
        let path = record.path.clone();
        if out.insert(record).is_some() {
            return Err(StageError::record(path, reason));
        }
    }
    Ok(out)
}

// ============================================================================
// Markdown
// ============================================================================

pub fn render_markdown(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_HEADING_ATTRIBUTES);

    let mut body = String::new();
    md_html::push_html(&mut body, Parser::new_ext(text, options));
    body
}

/// Text of the first `# ` heading, if any.
pub fn first_heading(text: &str) -> Option<String> {
    text.lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}

pub fn html_path(path: &str) -> String {
    let (stem, _) = split_extension(path);
    format!("{stem}.html")
}

fn render_record(mut record: FileRecord) -> FileRecord {
    if !record.has_extension("md") {
        return record;
    }
    record.path = html_path(&record.path);
    // stubs already hold their final page
    if record.is_redirect() {
        return record;
    }

    let text = record.text().into_owned();
    if !record.metadata.contains_key(keys::TITLE)
        && let Some(title) = first_heading(&text)
    {
        record.metadata.insert(keys::TITLE.to_string(), Value::String(title));
    }
    record
        .metadata
        .entry(keys::TEMPLATE.to_string())
        .or_insert_with(|| Value::String(DEFAULT_TEMPLATE.to_string()));
    record.contents = render_markdown(&text).into_bytes();
    record
}

/// Renders every `.md` record to an HTML fragment and renames it `.html`.
pub struct MarkdownStage {
    pool: Arc<ThreadPool>,
}

impl MarkdownStage {
    pub fn new(pool: Arc<ThreadPool>) -> Self {
        Self { pool }
    }
}

impl Stage for MarkdownStage {
    fn name(&self) -> &str {
        "markdown"
    }

    fn transform(&self, files: FileSet) -> Result<FileSet, StageError> {
        let records: Vec<FileRecord> = files.into_iter().collect();
        let rendered: Vec<FileRecord> = self
            .pool
            .install(|| records.into_par_iter().map(render_record).collect());
        collect_unique(rendered, "rendered page collides with an existing file")
    }
}

// ============================================================================
// Layout
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PagerLink {
    pub rel: &'static str,
    pub href: String,
    pub label: String,
}

/// Previous/next links for every collection the record belongs to.
pub fn pager_links(record: &FileRecord, titles: &BTreeMap<String, String>) -> Vec<PagerLink> {
    let Some(Value::Object(positions)) = record.metadata.get(keys::COLLECTIONS) else {
        return Vec::new();
    };
    let mut links = Vec::new();
    for position in positions.values() {
        for (rel, key) in [("prev", "previous"), ("next", "next")] {
            if let Some(target) = position.get(key).and_then(Value::as_str) {
                let href = url_for(target);
                let label = titles.get(&href).cloned().unwrap_or_else(|| href.clone());
                links.push(PagerLink { rel, href, label });
            }
        }
    }
    links
}

pub fn render_page(
    site_title: &str,
    record: &FileRecord,
    body: &str,
    pager: &[PagerLink],
) -> Markup {
    let title = record.meta_str(keys::TITLE).unwrap_or(&record.path);
    let template = record.meta_str(keys::TEMPLATE).unwrap_or(DEFAULT_TEMPLATE);
    let device = record.meta_str(keys::DEVICE);
    let branch = record.meta_str(keys::BRANCH);
    let environment = record.meta_str(keys::ENVIRONMENT);

    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { (title) " · " (site_title) }
                style { (PreEscaped(CSS)) }
            }
            body class=(template) {
                header.site-header {
                    a.site-title href="/" { (site_title) }
                    @if let Some(device) = device {
                        span.device-badge { (device) }
                    }
                }
                main {
                    article {
                        (PreEscaped(body))
                    }
                }
                @if !pager.is_empty() {
                    nav.pager {
                        @for link in pager {
                            a rel=(link.rel) href=(link.href) { (link.label) }
                        }
                    }
                }
                footer {
                    @if let Some(branch) = branch {
                        "Built from " code { (branch) }
                    }
                    @if let Some(environment) = environment {
                        span.environment { (environment) }
                    }
                }
            }
        }
    }
}

fn wants_layout(record: &FileRecord) -> bool {
    !record.is_redirect()
        && record
            .meta_str(keys::TEMPLATE)
            .is_some_and(|t| t != NO_TEMPLATE)
}

/// Wraps every templated record in the site page.
pub struct LayoutStage {
    site_title: String,
    pool: Arc<ThreadPool>,
}

impl LayoutStage {
    pub fn new(site_title: impl Into<String>, pool: Arc<ThreadPool>) -> Self {
        Self {
            site_title: site_title.into(),
            pool,
        }
    }
}

impl Stage for LayoutStage {
    fn name(&self) -> &str {
        "layout"
    }

    fn transform(&self, files: FileSet) -> Result<FileSet, StageError> {
        // stubs keep their document's title, so links to a forked page read well
        let titles: BTreeMap<String, String> = files
            .iter()
            .filter_map(|r| Some((url_for(&r.path), r.meta_str(keys::TITLE)?.to_string())))
            .collect();

        let records: Vec<FileRecord> = files.into_iter().collect();
        let wrapped: FileSet = self.pool.install(|| {
            records
                .into_par_iter()
                .map(|mut record| {
                    if wants_layout(&record) {
                        let pager = pager_links(&record, &titles);
                        let page = render_page(&self.site_title, &record, &record.text(), &pager);
                        record.contents = page.into_string().into_bytes();
                    }
                    record
                })
                .collect::<Vec<_>>()
                .into_iter()
                .collect()
        });
        Ok(wrapped)
    }
}

// ============================================================================
// Permalinks
// ============================================================================

/// `a/b.html` → `a/b/index.html`; `None` when the record stays put.
pub fn permalink_path(record: &FileRecord) -> Option<String> {
    if !record.has_extension("html")
        || record.metadata.get(keys::PERMALINK) == Some(&Value::Bool(false))
    {
        return None;
    }
    let (stem, _) = split_extension(&record.path);
    if stem == "index" || stem.ends_with("/index") {
        return None;
    }
    Some(format!("{stem}/index.html"))
}

pub struct PermalinkStage;

impl Stage for PermalinkStage {
    fn name(&self) -> &str {
        "permalinks"
    }

    fn transform(&self, files: FileSet) -> Result<FileSet, StageError> {
        let moved = files
            .into_iter()
            .map(|mut record| {
                if let Some(path) = permalink_path(&record) {
                    record.path = path;
                }
                record
            })
            .collect();
        collect_unique(moved, "permalink collides with an existing file")
    }
}
