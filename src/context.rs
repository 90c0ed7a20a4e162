//! Build-scoped settings resolved once per build.
//!
//! A [`BuildContext`] captures everything that would otherwise be ambient
//! state: the build mode, the git branch the sources were built from, and
//! whether the search index is built at all. It is resolved before the
//! pipeline is assembled and handed to the stages that need it, so building
//! twice in one process (watch mode) never sees stale values.
//!
//! The search toggle resolves in this order:
//!
//! 1. `preview` mode always builds the index.
//! 2. The `SEARCH_INDEX` environment variable, when set.
//! 3. `search.enabled` from `config.toml`.

use crate::config::{SiteConfig, effective_workers};
use crate::pipeline::{Stage, StageError};
use crate::types::{FileSet, keys};
use gix::head::Kind as HeadKind;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

pub const SEARCH_INDEX_ENV: &str = "SEARCH_INDEX";

/// Length of the commit id shown for a detached HEAD.
const SHORT_ID_LEN: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// One-shot production build.
    Build,
    /// One-shot build for review; always includes the search index.
    Preview,
    /// Watch mode.
    Development,
}

impl BuildMode {
    pub fn environment(self) -> &'static str {
        match self {
            BuildMode::Build => "production",
            BuildMode::Preview => "preview",
            BuildMode::Development => "development",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildContext {
    pub mode: BuildMode,
    pub branch: Option<String>,
    pub search_index: bool,
    /// Size of the per-file worker pool.
    pub workers: usize,
}

impl BuildContext {
    /// Resolve the context with an explicit `SEARCH_INDEX` value.
    pub fn resolve(
        root: &Path,
        mode: BuildMode,
        config: &SiteConfig,
        env_toggle: Option<&str>,
    ) -> Self {
        let search_index =
            mode == BuildMode::Preview || search_toggle(env_toggle, config.search.enabled);
        let context = Self {
            mode,
            branch: git_branch(root),
            search_index,
            workers: effective_workers(&config.processing),
        };
        debug!(?context, "build context resolved");
        context
    }

    /// Resolve the context reading `SEARCH_INDEX` from the process environment.
    pub fn from_env(root: &Path, mode: BuildMode, config: &SiteConfig) -> Self {
        let toggle = std::env::var(SEARCH_INDEX_ENV).ok();
        Self::resolve(root, mode, config, toggle.as_deref())
    }

    pub fn environment(&self) -> &'static str {
        self.mode.environment()
    }
}

/// Interpret a toggle value: `0`, `false`, `off`, `no` disable; anything else enables.
pub fn search_toggle(value: Option<&str>, default: bool) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        None => default,
        Some(v) => !matches!(v.as_str(), "0" | "false" | "off" | "no"),
    }
}

/// Current branch of the repository containing `root`.
///
/// A detached HEAD yields the abbreviated commit id. `None` outside a repository.
pub fn git_branch(root: &Path) -> Option<String> {
    let repo = match gix::discover(root) {
        Ok(repo) => repo,
        Err(e) => {
            debug!(error = %e, "no git repository, branch left unset");
            return None;
        }
    };
    let head = match repo.head() {
        Ok(head) => head,
        Err(e) => {
            warn!(error = %e, "unreadable HEAD, branch left unset");
            return None;
        }
    };
    Some(match &head.kind {
        HeadKind::Symbolic(reference) => reference.name.shorten().to_string(),
        HeadKind::Unborn(name) => name.shorten().to_string(),
        HeadKind::Detached { target, .. } => target.to_hex_with_len(SHORT_ID_LEN).to_string(),
    })
}

/// Stamps `branch` and `environment` onto every markdown document.
pub struct StampStage {
    branch: Option<String>,
    environment: &'static str,
}

impl StampStage {
    pub fn new(context: &BuildContext) -> Self {
        Self {
            branch: context.branch.clone(),
            environment: context.environment(),
        }
    }
}

impl Stage for StampStage {
    fn name(&self) -> &str {
        "stamp"
    }

    fn transform(&self, mut files: FileSet) -> Result<FileSet, StageError> {
        for record in files.iter_mut().filter(|r| r.has_extension("md")) {
            if let Some(branch) = &self.branch {
                record
                    .metadata
                    .insert(keys::BRANCH.to_string(), Value::String(branch.clone()));
            }
            record.metadata.insert(
                keys::ENVIRONMENT.to_string(),
                Value::String(self.environment.to_string()),
            );
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn toggle_values() {
        assert!(search_toggle(None, true));
        assert!(!search_toggle(None, false));
        for off in ["0", "false", "OFF", " no "] {
            assert!(!search_toggle(Some(off), true), "{off} should disable");
        }
        for on in ["1", "true", "yes", ""] {
            assert!(search_toggle(Some(on), false), "{on} should enable");
        }
    }

    #[test]
    fn preview_forces_search_index() {
        let tmp = TempDir::new().unwrap();
        let config = SiteConfig::default();

        let build = BuildContext::resolve(tmp.path(), BuildMode::Build, &config, Some("0"));
        let preview = BuildContext::resolve(tmp.path(), BuildMode::Preview, &config, Some("0"));

        assert!(!build.search_index);
        assert!(preview.search_index);
        assert_eq!(preview.environment(), "preview");
        assert_eq!(build.workers, effective_workers(&config.processing));
    }

    fn repo_with_head(head: &str) -> TempDir {
        let tmp = TempDir::new().unwrap();
        gix::init(tmp.path()).unwrap();
        fs::write(tmp.path().join(".git/HEAD"), head).unwrap();
        fs::create_dir_all(tmp.path().join("docs")).unwrap();
        tmp
    }

    #[test]
    fn branch_from_head_ref() {
        let tmp = repo_with_head("ref: refs/heads/feature/fanout\n");

        assert_eq!(
            git_branch(&tmp.path().join("docs")).as_deref(),
            Some("feature/fanout")
        );
    }

    #[test]
    fn detached_head_is_short_id() {
        let tmp = repo_with_head("3f2a9c1d0e8b7a6f5e4d3c2b1a0f9e8d7c6b5a4f\n");

        assert_eq!(git_branch(tmp.path()).as_deref(), Some("3f2a9c1"));
    }

    #[test]
    fn stamp_touches_markdown_only() {
        let context = BuildContext {
            mode: BuildMode::Development,
            branch: Some("main".into()),
            search_index: true,
            workers: 4,
        };
        let files = fileset(vec![doc("a.md", json!({})), doc("logo.png", json!({}))]);

        let out = StampStage::new(&context).transform(files).unwrap();

        let a = &find(&out, "a.md").metadata;
        assert_eq!(a["branch"], json!("main"));
        assert_eq!(a["environment"], json!("development"));
        assert!(find(&out, "logo.png").metadata.is_empty());
    }
}
