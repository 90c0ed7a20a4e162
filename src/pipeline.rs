//! Ordered stage composition.
//!
//! A [`Pipeline`] is an explicit list of [`Stage`] values built once per
//! build. [`Pipeline::run`] folds the FileSet through them strictly in order:
//! stage N+1 only sees the FileSet stage N returned, and the first failing
//! stage aborts the rest.
//!
//! Conditional stages are resolved when the pipeline is constructed
//! ([`Pipeline::stage_if`]), never per file or per run.

use crate::config::ConfigError;
use crate::tree::TreeError;
use crate::types::FileSet;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info_span};

/// Failure reported by a single stage.
#[derive(Error, Debug)]
pub enum StageError {
    /// Bad configuration discovered while transforming (e.g. unknown device).
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A specific record could not be transformed.
    #[error("{path}: {message}")]
    Record { path: String, message: String },
    #[error("{0}")]
    Failed(String),
}

impl StageError {
    pub fn record(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Record {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Fatal build failure.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error(
        "stage `{stage}` failed{}: {message}",
        .path.as_deref().map(|p| format!(" at {p}")).unwrap_or_default()
    )]
    Stage {
        stage: String,
        path: Option<String>,
        message: String,
    },
    #[error("source tree error: {0}")]
    Tree(#[from] TreeError),
    #[error("worker pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    fn from_stage(stage: &str, err: StageError) -> Self {
        match err {
            StageError::Config(e) => BuildError::Configuration(e),
            StageError::Record { path, message } => BuildError::Stage {
                stage: stage.to_string(),
                path: Some(path),
                message,
            },
            StageError::Failed(message) => BuildError::Stage {
                stage: stage.to_string(),
                path: None,
                message,
            },
        }
    }
}

/// A FileSet transformation.
///
/// Stages own their configuration (catalogs, maps, worker pools) and hold no
/// state between runs.
pub trait Stage: Send + Sync {
    /// Short name used in logs and error reports.
    fn name(&self) -> &str;

    fn transform(&self, files: FileSet) -> Result<FileSet, StageError>;
}

/// A stage backed by a closure.
pub struct FnStage<F> {
    name: String,
    f: F,
}

impl<F> FnStage<F>
where
    F: Fn(FileSet) -> Result<FileSet, StageError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Stage for FnStage<F>
where
    F: Fn(FileSet) -> Result<FileSet, StageError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, files: FileSet) -> Result<FileSet, StageError> {
        (self.f)(files)
    }
}

#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Append a stage only when `enabled`; the decision is final for this pipeline.
    pub fn stage_if(self, enabled: bool, stage: impl Stage + 'static) -> Self {
        if enabled {
            self.stage(stage)
        } else {
            debug!(stage = stage.name(), "stage omitted");
            self
        }
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Fold the FileSet through every stage in order.
    pub fn run(&self, mut files: FileSet) -> Result<FileSet, BuildError> {
        for stage in &self.stages {
            let span = info_span!("stage", name = stage.name());
            let _guard = span.enter();
            let started = Instant::now();
            let before = files.len();

            files = stage
                .transform(files)
                .map_err(|e| BuildError::from_stage(stage.name(), e))?;

            debug!(
                before,
                after = files.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "stage complete"
            );
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileRecord;
    use std::sync::{Arc, Mutex};

    fn append(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> impl Stage {
        FnStage::new(name, move |mut files: FileSet| {
            log.lock().unwrap().push(name.to_string());
            files.insert(FileRecord::new(format!("{name}.txt"), name));
            Ok(files)
        })
    }

    #[test]
    fn runs_stages_in_declared_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .stage(append("first", log.clone()))
            .stage(append("second", log.clone()))
            .stage(append("third", log.clone()));

        let out = pipeline.run(FileSet::new()).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn each_stage_sees_previous_output() {
        let pipeline = Pipeline::new()
            .stage(FnStage::new("write", |mut files: FileSet| {
                files.insert(FileRecord::new("a.txt", "1"));
                Ok(files)
            }))
            .stage(FnStage::new("check", |files: FileSet| {
                if files.contains("a.txt") {
                    Ok(files)
                } else {
                    Err(StageError::Failed("a.txt missing".into()))
                }
            }));
        assert!(pipeline.run(FileSet::new()).is_ok());
    }

    #[test]
    fn stage_if_false_omits_stage() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .stage(append("always", log.clone()))
            .stage_if(false, append("never", log.clone()))
            .stage_if(true, append("enabled", log.clone()));

        assert_eq!(pipeline.stage_names(), vec!["always", "enabled"]);
        pipeline.run(FileSet::new()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["always", "enabled"]);
    }

    #[test]
    fn failing_stage_aborts_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new()
            .stage(FnStage::new("broken", |_files: FileSet| {
                Err(StageError::record("guide/a.md", "render failed"))
            }))
            .stage(append("after", log.clone()));

        let err = pipeline.run(FileSet::new()).unwrap_err();

        assert!(log.lock().unwrap().is_empty());
        match &err {
            BuildError::Stage { stage, path, .. } => {
                assert_eq!(stage, "broken");
                assert_eq!(path.as_deref(), Some("guide/a.md"));
            }
            other => panic!("expected stage error, got {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "stage `broken` failed at guide/a.md: render failed"
        );
    }

    #[test]
    fn config_errors_surface_as_configuration() {
        let pipeline = Pipeline::new().stage(FnStage::new("devices", |_files: FileSet| {
            Err(StageError::Config(ConfigError::UnknownDevice {
                device: "toaster".into(),
                path: "a.md".into(),
            }))
        }));
        assert!(matches!(
            pipeline.run(FileSet::new()),
            Err(BuildError::Configuration(ConfigError::UnknownDevice { .. }))
        ));
    }
}
