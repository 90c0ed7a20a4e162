//! # docpipe
//!
//! A content build pipeline for multi-device documentation sites. Markdown
//! sources go in; a static tree of pages, per-device variants, redirect stubs
//! and a search index comes out.
//!
//! # Architecture: An Ordered Fold
//!
//! A build loads the whole source tree into one in-memory [`types::FileSet`]
//! and folds it through a fixed list of stages. Each stage takes the FileSet
//! by value and returns the next one:
//!
//! ```text
//! src/ ──load_tree──▶ FileSet
//!         │
//!         ├─ stamp           branch + environment on every document
//!         ├─ collections     prev/next navigation from path patterns
//!         ├─ device-fanout   one variant per device, original → redirect
//!         ├─ feature-flags   has-<capability> booleans on every variant
//!         ├─ markdown        *.md → *.html fragments
//!         ├─ search-index    inverted index artifact (optional)
//!         ├─ layout          page chrome
//!         ├─ permalinks      a/b.html → a/b/index.html
//!         └─ redirects       static redirect stubs (overwrite)
//!         │
//!         ▼
//!      write_tree ──▶ staging ──publish──▶ build/
//! ```
//!
//! Stages never see a FileSet out of order, and the only way to skip one is
//! [`pipeline::Pipeline::stage_if`], decided once when the pipeline is built.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`types`] | `FileRecord`, `FileSet`, path normalization, public URLs |
//! | [`pipeline`] | `Stage` trait, ordered `Pipeline`, build and stage errors |
//! | [`matcher`] | Path patterns: `*`, `**`, `?` and `:param` captures |
//! | [`collections`] | Named, ordered navigation collections |
//! | [`devices`] | Device catalog and capability flags |
//! | [`fanout`] | Per-device document fan-out with redirect stubs |
//! | [`redirect`] | Redirect stub page and the static redirect map |
//! | [`search`] | Tokenizer, filters and the weighted inverted index |
//! | [`render`] | Markdown, page layout and permalink stages |
//! | [`context`] | Build mode, git branch and search toggle, resolved once |
//! | [`tree`] | Source tree loading (frontmatter) and output writing |
//! | [`build`] | Pipeline assembly, one-shot builds, staged publish |
//! | [`watch`] | Coalescing rebuild queue and file watching |
//! | [`config`] | `config.toml` loading, merging and validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Stages Own Their Inputs
//!
//! A stage receives its configuration (catalog, redirect map, worker pool,
//! build context) when it is constructed and the FileSet when it runs. There
//! is no global state, so building twice in one process, as watch mode does,
//! always starts from a clean slate.
//!
//! ## Fan-Out Is a Transaction
//!
//! Forking a document replaces the original path with a redirect, so a
//! half-applied fan-out would leave dangling redirects. The fan-out stage
//! therefore plans every fork against the catalog first and only commits
//! once nothing can fail.
//!
//! ## Bad Frontmatter Excludes, Bad Configuration Aborts
//!
//! One malformed document shouldn't take the whole site down: it is left out
//! and reported. Too many of them, an unknown device, or a broken catalog is
//! a configuration problem and stops the build before anything is written.
//!
//! ## Publish by Rename
//!
//! Output goes into a staging directory and is renamed over the destination
//! only when complete. A failed rebuild in watch mode leaves the last good
//! site in place.

pub mod build;
pub mod collections;
pub mod config;
pub mod context;
pub mod devices;
pub mod fanout;
pub mod matcher;
pub mod output;
pub mod pipeline;
pub mod redirect;
pub mod render;
pub mod search;
pub mod tree;
pub mod types;
pub mod watch;

#[cfg(test)]
pub(crate) mod test_helpers;
