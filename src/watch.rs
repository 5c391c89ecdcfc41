//! File watching for the dev server.
//!
//! Watches every package root with a debounced notify watcher and
//! feeds the resulting source changes to the build service. The
//! debounce window folds editor save bursts into one change batch.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind, Debouncer};

use crate::asset::SourceChange;
use crate::config::Config;
use crate::discovery::asset_id_for_path;
use crate::scheduler::{BuildService, FatalError};

/// Error during watch setup
#[derive(Debug)]
pub enum WatchError {
    /// Failed to initialize file watcher
    WatcherInit(notify::Error),
    /// Failed to add watch path
    WatchPath(PathBuf, notify::Error),
    /// Package root directory not found
    RootNotFound(String, PathBuf),
}

impl std::fmt::Display for WatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchError::WatcherInit(e) => write!(f, "Failed to initialize file watcher: {}", e),
            WatchError::WatchPath(path, e) => {
                write!(f, "Failed to watch {}: {}", path.display(), e)
            }
            WatchError::RootNotFound(package, path) => {
                write!(f, "Source root for package {:?} not found: {}", package, path.display())
            }
        }
    }
}

impl std::error::Error for WatchError {}

/// Running watcher; dropping it stops watching.
pub struct WatchHandle {
    stopping: Arc<AtomicBool>,
    debouncer: Option<Debouncer<RecommendedWatcher>>,
    thread: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// Stop watching and wait for the forwarder thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        // Dropping the debouncer closes the event channel.
        self.debouncer.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Watch every package root and forward debounced changes to the
/// service.
pub fn start_watcher(
    project_root: &Path,
    config: &Config,
    service: Arc<BuildService>,
) -> Result<WatchHandle, WatchError> {
    let (tx, rx) = channel();
    let debounce = Duration::from_millis(config.project.debounce_ms);
    let mut debouncer = new_debouncer(debounce, tx).map_err(WatchError::WatcherInit)?;

    for package in config.packages.keys() {
        let root = project_root.join(config.package_root(package));
        if !root.is_dir() {
            return Err(WatchError::RootNotFound(package.clone(), root));
        }
        debouncer
            .watcher()
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| WatchError::WatchPath(root.clone(), e))?;
    }

    let stopping = Arc::new(AtomicBool::new(false));
    let thread = {
        let stopping = Arc::clone(&stopping);
        let project_root = project_root.to_path_buf();
        let config = config.clone();
        std::thread::spawn(move || loop {
            match rx.recv() {
                Ok(Ok(events)) => {
                    let paths: Vec<PathBuf> = events
                        .iter()
                        .filter(|e| matches!(e.kind, DebouncedEventKind::Any))
                        .map(|e| e.path.clone())
                        .collect();
                    let changes = changes_for_paths(&project_root, &config, &paths);
                    if !changes.is_empty() {
                        for change in &changes {
                            println!("[{}] Changed: {}", timestamp(), change.id());
                        }
                        service.notify_changes(changes);
                    }
                }
                Ok(Err(error)) => {
                    // Watch error (non-fatal), keep watching
                    eprintln!("[{}] Watch error: {:?}", timestamp(), error);
                }
                Err(_) => {
                    if !stopping.load(Ordering::SeqCst) {
                        service
                            .report_fatal(FatalError::Watch("event channel closed".to_string()));
                    }
                    break;
                }
            }
        })
    };

    Ok(WatchHandle { stopping, debouncer: Some(debouncer), thread: Some(thread) })
}

/// Map changed filesystem paths to source changes: an existing file
/// becomes a put with its current contents, a vanished path a tree
/// removal, since a deleted directory arrives as one event for the
/// directory itself. Paths outside any package root are dropped.
fn changes_for_paths(project_root: &Path, config: &Config, paths: &[PathBuf]) -> Vec<SourceChange> {
    let mut changes = Vec::new();
    for path in paths {
        let Some(id) = asset_id_for_path(project_root, config, path) else {
            continue;
        };
        if path.is_file() {
            match std::fs::read(path) {
                Ok(content) => changes.push(SourceChange::Put { id, content }),
                Err(e) => {
                    eprintln!("[{}] Failed to read {}: {}", timestamp(), path.display(), e)
                }
            }
        } else {
            changes.push(SourceChange::RemoveTree(id));
        }
    }
    changes
}

/// Get current timestamp for logging
pub(crate) fn timestamp() -> String {
    use std::time::SystemTime;
    let now = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
    let secs = now.as_secs() % 86400; // seconds since midnight
    let hours = (secs / 3600) % 24;
    let minutes = (secs / 60) % 60;
    let seconds = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}
