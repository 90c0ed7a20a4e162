//! CLI output formatting.
//!
//! Each report has a `format_*` function returning lines (pure, no I/O) and a
//! `print_*` wrapper that writes them to stdout. Diagnostics go through
//! `tracing`; this module is only for the human-facing summary.
//!
//! # Output Format
//!
//! ## Pipeline
//!
//! ```text
//! Pipeline
//!     001 stamp
//!     002 collections
//!     ...
//! ```
//!
//! ## Pages (`check`)
//!
//! ```text
//! Pages
//!     / → index.html
//!     /reference/firmware/photon/ → reference/firmware/photon/index.html [photon]
//!     /reference/firmware/ ↪ /reference/firmware/photon/
//! ```
//!
//! ## Summary
//!
//! ```text
//! 6 pages (2 device variants), 2 redirects, 1 asset
//! Search index: search-index.json
//! Excluded 1 file
//!     guide/broken.md
//!         Reason: guide/broken.md: malformed frontmatter: unterminated `+++` block
//! Wrote 10 files → build/
//! ```

use crate::tree::Exclusion;
use crate::types::{FileRecord, FileSet, keys, url_for};
use std::path::Path;

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(count: usize, one: &str, many: &str) -> String {
    if count == 1 {
        format!("{count} {one}")
    } else {
        format!("{count} {many}")
    }
}

fn is_page(record: &FileRecord) -> bool {
    record.has_extension("html") && !record.is_redirect()
}

/// Counts describing a finished FileSet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildSummary {
    pub pages: usize,
    pub variants: usize,
    pub redirects: usize,
    pub assets: usize,
    pub search_index: Option<String>,
    pub excluded: usize,
}

pub fn summarize(files: &FileSet, excluded: &[Exclusion], search_path: &str) -> BuildSummary {
    let search_index = files.contains(search_path).then(|| search_path.to_string());
    let mut summary = BuildSummary {
        search_index,
        excluded: excluded.len(),
        ..BuildSummary::default()
    };
    for record in files.iter() {
        if record.is_redirect() {
            summary.redirects += 1;
        } else if is_page(record) {
            summary.pages += 1;
            if record.metadata.contains_key(keys::DEVICE) {
                summary.variants += 1;
            }
        } else if record.path != search_path {
            summary.assets += 1;
        }
    }
    summary
}

pub fn format_pipeline(stages: &[String]) -> Vec<String> {
    let mut lines = vec!["Pipeline".to_string()];
    for (i, stage) in stages.iter().enumerate() {
        lines.push(format!("{}{} {}", indent(1), format_index(i + 1), stage));
    }
    lines
}

/// Every page and redirect with its public URL.
pub fn format_pages(files: &FileSet) -> Vec<String> {
    let mut lines = vec!["Pages".to_string()];
    for record in files.iter() {
        if let Some(target) = record.meta_str(keys::REDIRECT) {
            lines.push(format!(
                "{}{} \u{21aa} {}",
                indent(1),
                url_for(&record.path),
                target
            ));
        } else if is_page(record) {
            let device = record
                .meta_str(keys::DEVICE)
                .map(|d| format!(" [{d}]"))
                .unwrap_or_default();
            lines.push(format!(
                "{}{} \u{2192} {}{}",
                indent(1),
                url_for(&record.path),
                record.path,
                device
            ));
        }
    }
    lines
}

pub fn format_exclusions(excluded: &[Exclusion]) -> Vec<String> {
    if excluded.is_empty() {
        return Vec::new();
    }
    let mut lines = vec![format!("Excluded {}", plural(excluded.len(), "file", "files"))];
    for exclusion in excluded {
        lines.push(format!("{}{}", indent(1), exclusion.path));
        lines.push(format!("{}Reason: {}", indent(2), exclusion.reason));
    }
    lines
}

/// Summary for a finished build; `written` is `None` for a dry run.
pub fn format_build_summary(
    summary: &BuildSummary,
    excluded: &[Exclusion],
    written: Option<(usize, &Path)>,
) -> Vec<String> {
    let mut counts = plural(summary.pages, "page", "pages");
    if summary.variants > 0 {
        counts.push_str(&format!(
            " ({})",
            plural(summary.variants, "device variant", "device variants")
        ));
    }
    let mut lines = vec![format!(
        "{counts}, {}, {}",
        plural(summary.redirects, "redirect", "redirects"),
        plural(summary.assets, "asset", "assets")
    )];

    lines.push(match &summary.search_index {
        Some(path) => format!("Search index: {path}"),
        None => "Search index: skipped".to_string(),
    });
    lines.extend(format_exclusions(excluded));

    match written {
        Some((count, dest)) => lines.push(format!(
            "Wrote {} \u{2192} {}/",
            plural(count, "file", "files"),
            dest.display()
        )),
        None => lines.push("Dry run: nothing written".to_string()),
    }
    lines
}

pub fn print_pipeline(stages: &[String]) {
    for line in format_pipeline(stages) {
        println!("{}", line);
    }
}

pub fn print_pages(files: &FileSet) {
    for line in format_pages(files) {
        println!("{}", line);
    }
}

pub fn print_build_summary(
    summary: &BuildSummary,
    excluded: &[Exclusion],
    written: Option<(usize, &Path)>,
) {
    for line in format_build_summary(summary, excluded, written) {
        println!("{}", line);
    }
}
