//! File watcher for runbook files.
//!
//! ```text
//! notify (dir, non-recursive) → filter → Trigger → debouncer → ReloadHub → subscribers
//! ```
//!
//! The parent directory is watched rather than the file itself, so editors
//! that save by writing a temp file and renaming it over the original are
//! still seen.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use super::debounce::{spawn_debouncer, Trigger};
use super::hub::ReloadHub;
use super::resolve_runbook_path;
use crate::error::WatchError;

/// Watches runbook files and announces debounced reloads through a [`ReloadHub`].
pub struct FileWatcher {
    /// The underlying notify watcher; dropping it stops the pipeline
    _watcher: RecommendedWatcher,
    hub: Arc<ReloadHub>,
    targets: Vec<PathBuf>,
    debouncer: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher").field("targets", &self.targets).finish_non_exhaustive()
    }
}

impl FileWatcher {
    /// Start watching `paths` (files, or directories containing a runbook).
    pub fn new(
        paths: &[PathBuf],
        debounce: Duration,
        hub: Arc<ReloadHub>,
    ) -> Result<Self, WatchError> {
        if paths.is_empty() {
            return Err(WatchError::NoPaths);
        }

        let mut targets = Vec::new();
        let mut matchers = HashSet::new();
        let mut dirs = HashSet::new();

        for path in paths {
            let file = resolve_runbook_path(path)?;
            let name = file.file_name().ok_or_else(|| WatchError::NoParent(file.clone()))?;
            let parent = match file.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                Some(_) => PathBuf::from("."),
                None => return Err(WatchError::NoParent(file.clone())),
            };
            let dir = parent.canonicalize()?;

            let target = dir.join(name);
            matchers.insert(target.clone());
            if let Ok(absolute) = std::path::absolute(&file) {
                matchers.insert(absolute);
            }
            targets.push(target);
            dirs.insert(dir);
        }

        let (tx, rx) = mpsc::channel();
        let matchers = Arc::new(matchers);

        let mut watcher = RecommendedWatcher::new(
            {
                let matchers = Arc::clone(&matchers);
                move |result: Result<Event, notify::Error>| handle_event(result, &matchers, &tx)
            },
            Config::default(),
        )?;

        for dir in &dirs {
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
            tracing::debug!(dir = %dir.display(), "Watching directory");
        }

        let debouncer = {
            let hub = Arc::clone(&hub);
            spawn_debouncer(rx, debounce, move |burst| {
                hub.publish(burst);
            })
        };

        tracing::info!(files = targets.len(), debounce_ms = debounce.as_millis() as u64, "File watcher started");

        Ok(Self { _watcher: watcher, hub, targets, debouncer: Some(debouncer) })
    }

    /// The hub reload events are published to.
    pub fn hub(&self) -> &Arc<ReloadHub> {
        &self.hub
    }

    /// Files being watched, with canonical parent directories.
    pub fn targets(&self) -> &[PathBuf] {
        &self.targets
    }

    /// Stop watching and wait for the debouncer to flush.
    pub fn stop(mut self) {
        let debouncer = self.debouncer.take();
        drop(self);
        if let Some(handle) = debouncer {
            let _ = handle.join();
        }
    }
}

/// Turn a notify callback into a trigger. Never blocks.
fn handle_event(
    result: Result<Event, notify::Error>,
    targets: &HashSet<PathBuf>,
    tx: &Sender<Trigger>,
) {
    match result {
        Ok(event) if event.need_rescan() => {
            tracing::warn!("Watcher reported lost events, forcing reload");
            let _ = tx.send(Trigger::Forced);
        }
        Ok(event) => {
            if !is_relevant(&event.kind) {
                return;
            }
            if let Some(path) = event.paths.iter().find(|p| targets.contains(*p)) {
                tracing::debug!(path = %path.display(), kind = ?event.kind, "Runbook file changed");
                let _ = tx.send(Trigger::Changed(path.clone()));
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Watch error, forcing reload");
            let _ = tx.send(Trigger::Forced);
        }
    }
}

/// Writes, creations and renames into place count; metadata and access changes do not.
fn is_relevant(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any | ModifyKind::Other) => true,
        EventKind::Modify(ModifyKind::Name(mode)) => {
            matches!(mode, RenameMode::To | RenameMode::Both | RenameMode::Any)
        }
        _ => false,
    }
}
