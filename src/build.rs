//! Build orchestration.
//!
//! ```text
//! Project::load     config.toml + devices.json + redirects.json
//! BuildContext      mode, branch, search toggle, worker count
//! standard_pipeline stamp → collections → device-fanout → feature-flags → markdown
//!                   → search-index (conditional) → layout → permalinks → redirects
//! run               load_tree → exclusion check → Pipeline::run
//! build_site        run → write_tree into staging → publish (swap into destination)
//! ```
//!
//! Output is written to a staging directory beside the destination and only
//! swapped in once every file is on disk, so a failed build never leaves a
//! half-written site behind.

use crate::collections::CollectionStage;
use crate::config::{ConfigError, SiteConfig, load_config};
use crate::context::{BuildContext, BuildMode, StampStage};
use crate::devices::{DeviceCatalog, FeatureFlagStage};
use crate::fanout::DeviceFanoutStage;
use crate::pipeline::{BuildError, Pipeline};
use crate::redirect::{RedirectMap, RedirectStage};
use crate::render::{LayoutStage, MarkdownStage, PermalinkStage};
use crate::search::SearchIndexStage;
use crate::tree::{Exclusion, load_tree, write_tree};
use crate::types::FileSet;
use rayon::ThreadPool;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Everything read from the project root before a build.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub config: SiteConfig,
    pub catalog: Arc<DeviceCatalog>,
    pub redirects: Arc<RedirectMap>,
}

impl Project {
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let config = load_config(root)?;
        let catalog = DeviceCatalog::load(&config.devices_path(root))?;
        let redirects = RedirectMap::load(&config.redirects_path(root))?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
            catalog: Arc::new(catalog),
            redirects: Arc::new(redirects),
        })
    }

    pub fn source_dir(&self) -> PathBuf {
        self.config.source_dir(&self.root)
    }

    pub fn destination_dir(&self) -> PathBuf {
        self.config.destination_dir(&self.root)
    }
}

#[derive(Debug, Default)]
pub struct BuildOutcome {
    pub files: FileSet,
    pub excluded: Vec<Exclusion>,
    pub stages: Vec<String>,
    /// Files written to the destination; zero for a dry run.
    pub written: usize,
}

pub fn worker_pool(context: &BuildContext) -> Result<Arc<ThreadPool>, BuildError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(context.workers)
        .thread_name(|i| format!("docpipe-worker-{i}"))
        .build()?;
    Ok(Arc::new(pool))
}

/// Assemble the stage list for one build.
pub fn standard_pipeline(
    project: &Project,
    context: &BuildContext,
    pool: &Arc<ThreadPool>,
) -> Result<Pipeline, BuildError> {
    let config = &project.config;
    let collections = CollectionStage::new(&config.collections)
        .map_err(|e| ConfigError::Validation(format!("collections: {e}")))?;
    let search = SearchIndexStage::from_config(&config.search)?;

    Ok(Pipeline::new()
        .stage(StampStage::new(context))
        .stage(collections)
        .stage(DeviceFanoutStage::new(project.catalog.clone()))
        .stage(FeatureFlagStage::new(project.catalog.clone()))
        .stage(MarkdownStage::new(pool.clone()))
        .stage_if(context.search_index, search)
        .stage(LayoutStage::new(&config.title, pool.clone()))
        .stage(PermalinkStage)
        .stage(RedirectStage::new(project.redirects.clone())))
}

/// Load the source tree and run the pipeline, without writing anything.
#[instrument(skip_all, fields(mode = ?context.mode))]
pub fn run(
    project: &Project,
    context: &BuildContext,
    pool: &Arc<ThreadPool>,
) -> Result<BuildOutcome, BuildError> {
    let loaded = load_tree(&project.source_dir())?;

    let limit = project.config.processing.max_excluded;
    if loaded.excluded.len() > limit {
        return Err(ConfigError::TooManyExclusions {
            count: loaded.excluded.len(),
            limit,
        }
        .into());
    }
    if !loaded.excluded.is_empty() {
        warn!(
            excluded = loaded.excluded.len(),
            limit, "building without excluded source files"
        );
    }

    let pipeline = standard_pipeline(project, context, pool)?;
    let files = pipeline.run(loaded.files)?;

    Ok(BuildOutcome {
        files,
        excluded: loaded.excluded,
        stages: pipeline.stage_names().into_iter().map(str::to_string).collect(),
        written: 0,
    })
}

/// Full build: run the pipeline, write into staging, then publish.
pub fn build_site(project: &Project, context: &BuildContext) -> Result<BuildOutcome, BuildError> {
    let started = Instant::now();
    let pool = worker_pool(context)?;
    let mut outcome = run(project, context, &pool)?;

    let destination = project.destination_dir();
    let staging = sibling(&destination, "staging");
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    outcome.written = write_tree(&outcome.files, &staging, &pool)?;
    publish(&staging, &destination)?;

    info!(
        files = outcome.written,
        excluded = outcome.excluded.len(),
        destination = %destination.display(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "build complete"
    );
    Ok(outcome)
}

/// Load the project at `root` fresh and build it.
///
/// Watch mode calls this for every rebuild so edits to `config.toml` and the
/// side files take effect without restarting.
pub fn build_project(root: &Path, mode: BuildMode) -> Result<BuildOutcome, BuildError> {
    let project = Project::load(root)?;
    let context = BuildContext::from_env(root, mode, &project.config);
    build_site(&project, &context)
}

/// Hidden directory next to `dest`, e.g. `build` → `.build-staging`.
pub fn sibling(dest: &Path, suffix: &str) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    dest.with_file_name(format!(".{name}-{suffix}"))
}

/// Replace `dest` with the fully written `staging` tree.
pub fn publish(staging: &Path, dest: &Path) -> io::Result<()> {
    if !dest.exists() {
        return fs::rename(staging, dest);
    }
    let previous = sibling(dest, "previous");
    if previous.exists() {
        fs::remove_dir_all(&previous)?;
    }
    fs::rename(dest, &previous)?;
    if let Err(e) = fs::rename(staging, dest) {
        // put the old site back before reporting
        fs::rename(&previous, dest)?;
        return Err(e);
    }
    fs::remove_dir_all(&previous)
}
