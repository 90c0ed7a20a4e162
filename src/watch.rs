//! Watch mode: rebuild on source changes.
//!
//! ```text
//! notify callback ──push──▶ RebuildQueue ──next_batch──▶ run_loop ──▶ build_project
//!   (any thread)            (coalesces)                  (one build at a time)
//! ```
//!
//! The queue holds at most one pending rebuild. Changes that arrive while a
//! build is running are merged into that pending batch, so a burst of edits
//! costs one extra build, not one per event. Builds never overlap and are
//! never cancelled; each runs to completion before the next batch is taken.
//!
//! A failed rebuild is logged and the loop keeps going. Because builds
//! publish through a staging directory, the last good output stays live.

use crate::build::{build_project, sibling};
use crate::config::{SiteConfig, load_config};
use crate::context::BuildMode;
use crate::pipeline::BuildError;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("file watcher error: {0}")]
    Notify(#[from] notify::Error),
}

#[derive(Debug, Default)]
struct QueueState {
    pending: BTreeSet<PathBuf>,
    requested: bool,
    closed: bool,
}

/// Single-consumer queue of change events, coalesced into one pending rebuild.
#[derive(Debug, Default)]
pub struct RebuildQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl RebuildQueue {
    pub fn new() -> Self {
        Self::default()
    }

    // a panicking producer must not wedge the watch loop
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Request a rebuild for `paths`. Returns `false` once the queue is closed.
    pub fn push(&self, paths: impl IntoIterator<Item = PathBuf>) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        state.pending.extend(paths);
        state.requested = true;
        self.ready.notify_one();
        true
    }

    /// Stop the consumer; pending changes are dropped.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of distinct paths waiting for the next rebuild.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Block until a rebuild is requested; `None` once closed.
    pub fn next_batch(&self) -> Option<Vec<PathBuf>> {
        let mut state = self
            .ready
            .wait_while(self.lock(), |s| !s.requested && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return None;
        }
        state.requested = false;
        Some(std::mem::take(&mut state.pending).into_iter().collect())
    }
}

/// Consume batches until the queue closes. Returns the number of rebuilds run.
pub fn run_loop<F>(queue: &RebuildQueue, mut rebuild: F) -> usize
where
    F: FnMut(&[PathBuf]) -> Result<(), BuildError>,
{
    let mut builds = 0;
    while let Some(batch) = queue.next_batch() {
        builds += 1;
        match rebuild(&batch) {
            Ok(()) => info!(changed = batch.len(), "rebuilt"),
            Err(e) => error!(error = %e, "rebuild failed; keeping previous output"),
        }
    }
    builds
}

pub fn is_relevant(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Editor droppings, hidden files or directories below `root`, and anything
/// under an ignored directory.
pub fn should_ignore(path: &Path, root: &Path, ignored: &[PathBuf]) -> bool {
    if ignored.iter().any(|dir| path.starts_with(dir)) {
        return true;
    }
    let relative = path.strip_prefix(root).unwrap_or(path);
    let hidden = relative
        .components()
        .any(|c| c.as_os_str().to_str().is_some_and(|s| s.starts_with('.')));
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    hidden || matches!(ext, "swp" | "swo" | "tmp" | "bak") || name.ends_with('~')
}

/// Output directories the watcher must not react to.
///
/// A broken `config.toml` falls back to the default destination so the
/// watcher still starts and the next save can trigger a rebuild.
pub fn output_dirs(root: &Path) -> Vec<PathBuf> {
    let destination = match load_config(root) {
        Ok(config) => config.destination_dir(root),
        Err(e) => {
            warn!(error = %e, "config unreadable, ignoring the default output directory");
            SiteConfig::default().destination_dir(root)
        }
    };
    vec![
        sibling(&destination, "staging"),
        sibling(&destination, "previous"),
        destination,
    ]
}

/// Watch the project at `root` and rebuild on every change. Blocks.
///
/// The caller is expected to have run the initial build.
pub fn watch(root: &Path, mode: BuildMode) -> Result<(), WatchError> {
    watch_with_queue(root, mode, Arc::new(RebuildQueue::new()))
}

/// [`watch`] feeding `queue`; returns once the queue is closed.
pub fn watch_with_queue(
    root: &Path,
    mode: BuildMode,
    queue: Arc<RebuildQueue>,
) -> Result<(), WatchError> {
    let root = root.canonicalize()?;
    let ignored = output_dirs(&root);

    let producer = queue.clone();
    let watch_root = root.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) if is_relevant(&event) => {
            let paths: Vec<PathBuf> = event
                .paths
                .into_iter()
                .filter(|p| !should_ignore(p, &watch_root, &ignored))
                .collect();
            if !paths.is_empty() {
                producer.push(paths);
            }
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "file watcher error"),
    })?;
    watcher.watch(&root, RecursiveMode::Recursive)?;
    info!(root = %root.display(), "watching for changes");

    run_loop(&queue, |changed| {
        info!(
            changed = changed.len(),
            first = ?changed.first().map(|p| p.strip_prefix(&root).unwrap_or(p.as_path())),
            "change detected, rebuilding"
        );
        build_project(&root, mode).map(|_| ())
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::mpsc;
    use tempfile::TempDir;
    use std::thread;
    use std::time::Duration;

    fn paths(items: &[&str]) -> Vec<PathBuf> {
        items.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn pushes_coalesce_into_one_batch() {
        let queue = RebuildQueue::new();
        queue.push(paths(&["src/b.md", "src/a.md"]));
        queue.push(paths(&["src/a.md"]));

        assert_eq!(queue.pending(), 2);
        assert_eq!(queue.next_batch(), Some(paths(&["src/a.md", "src/b.md"])));
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn closed_queue_ends_consumer() {
        let queue = RebuildQueue::new();
        queue.push(paths(&["src/a.md"]));
        queue.close();

        assert_eq!(queue.next_batch(), None);
        assert!(!queue.push(paths(&["src/b.md"])));
        assert!(queue.is_closed());
    }

    #[test]
    fn changes_during_a_build_become_one_rebuild() {
        let queue = RebuildQueue::new();
        queue.push(paths(&["src/a.md"]));
        let mut seen = Vec::new();

        let builds = run_loop(&queue, |batch| {
            seen.push(batch.to_vec());
            if seen.len() == 1 {
                queue.push(paths(&["src/b.md"]));
                queue.push(paths(&["src/c.md", "src/b.md"]));
            } else {
                queue.close();
            }
            Ok(())
        });

        assert_eq!(builds, 2);
        assert_eq!(seen, vec![paths(&["src/a.md"]), paths(&["src/b.md", "src/c.md"])]);
    }

    #[test]
    fn failed_rebuild_does_not_stop_the_loop() {
        let queue = RebuildQueue::new();
        queue.push(paths(&["src/a.md"]));
        let mut attempts = 0;

        let builds = run_loop(&queue, |_| {
            attempts += 1;
            if attempts == 1 {
                queue.push(paths(&["src/a.md"]));
                Err(BuildError::Stage {
                    stage: "markdown".into(),
                    path: Some("a.md".into()),
                    message: "boom".into(),
                })
            } else {
                queue.close();
                Ok(())
            }
        });

        assert_eq!(builds, 2);
    }

    #[test]
    fn consumer_wakes_for_producer_on_another_thread() {
        let queue = Arc::new(RebuildQueue::new());
        let (tx, rx) = mpsc::channel();

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                run_loop(&queue, |batch| {
                    tx.send(batch.to_vec()).unwrap();
                    Ok(())
                })
            })
        };

        queue.push(paths(&["src/a.md"]));
        let batch = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        queue.close();

        assert_eq!(batch, paths(&["src/a.md"]));
        assert_eq!(consumer.join().unwrap(), 1);
    }

    #[test]
    fn ignores_output_and_editor_files() {
        let root = Path::new("/site");
        let ignored = vec![PathBuf::from("/site/build"), PathBuf::from("/site/.build-staging")];
        assert!(should_ignore(Path::new("/site/build/index.html"), root, &ignored));
        assert!(should_ignore(Path::new("/site/.build-staging/a.html"), root, &ignored));
        assert!(should_ignore(Path::new("/site/src/a.md.swp"), root, &ignored));
        assert!(should_ignore(Path::new("/site/src/a.md~"), root, &ignored));
        assert!(!should_ignore(Path::new("/site/src/a.md"), root, &ignored));
        assert!(!should_ignore(Path::new("/site/config.toml"), root, &ignored));
    }

    #[test]
    fn ignores_anything_below_a_hidden_directory() {
        let root = Path::new("/home/me/.docs/site");
        assert!(should_ignore(Path::new("/home/me/.docs/site/.git/objects/ab/cdef"), root, &[]));
        assert!(should_ignore(Path::new("/home/me/.docs/site/src/.drafts/a.md"), root, &[]));
        assert!(should_ignore(Path::new("/home/me/.docs/site/src/.a.md"), root, &[]));
        assert!(!should_ignore(Path::new("/home/me/.docs/site/src/a.md"), root, &[]));
    }

    #[test]
    fn output_dirs_survive_a_broken_config() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("config.toml"), "title = [unclosed").unwrap();

        let dirs = output_dirs(tmp.path());

        assert_eq!(dirs[2], SiteConfig::default().destination_dir(tmp.path()));
        assert_eq!(dirs[0], sibling(&dirs[2], "staging"));
    }

    #[test]
    fn watch_starts_despite_malformed_side_files() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("src")).unwrap();
        fs::write(tmp.path().join("devices.json"), "{ not json").unwrap();
        fs::write(tmp.path().join("redirects.json"), "[").unwrap();
        let queue = Arc::new(RebuildQueue::new());

        let watcher = {
            let root = tmp.path().to_path_buf();
            let queue = queue.clone();
            thread::spawn(move || watch_with_queue(&root, BuildMode::Development, queue))
        };
        thread::sleep(Duration::from_millis(200));
        assert!(!watcher.is_finished());
        queue.close();

        assert!(watcher.join().unwrap().is_ok());
    }
}
