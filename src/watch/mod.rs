//! Live reload of runbook files.
//!
//! File system events are filtered to the runbook path, debounced, and fanned
//! out to subscribers (for example a Server-Sent Events endpoint).

mod debounce;
mod hub;
#[cfg(feature = "file-watch")]
mod watcher;

use std::path::{Path, PathBuf};

pub use debounce::{spawn_debouncer, Burst, ReloadReason, Trigger};
pub use hub::{ReloadEvent, ReloadHub, SSE_EVENT_NAME};
#[cfg(feature = "file-watch")]
pub use watcher::FileWatcher;

use crate::error::WatchError;

/// File names tried, in order, when a directory is given.
pub const RUNBOOK_FILE_NAMES: &[&str] = &["runbook.yaml", "runbook.yml", "runbook.mdx", "runbook.md"];

/// Resolve a runbook path: a file is returned as-is, a directory is searched
/// for one of [`RUNBOOK_FILE_NAMES`].
pub fn resolve_runbook_path(path: &Path) -> Result<PathBuf, WatchError> {
    if !path.is_dir() {
        return Ok(path.to_path_buf());
    }

    RUNBOOK_FILE_NAMES
        .iter()
        .map(|name| path.join(name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| WatchError::NoRunbook(path.to_path_buf()))
}
