//! Error types for the execution and dependency core.
//!
//! Per-block failures (nonzero exit, a failing check) are not errors: they are
//! recorded in the [`ExecutionRecord`](crate::core::ExecutionRecord). The types
//! here cover structural and component-level failures only.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by the session manager and block executor.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The runbook directory could not be read when opening a session.
    #[error("Cannot open session in {path}: {source}")]
    UnreadableDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The child process could not be started.
    #[error("Failed to spawn block '{block}': {source}")]
    Spawn {
        block: String,
        #[source]
        source: std::io::Error,
    },

    /// The block was killed after its deadline elapsed.
    #[error("Block '{block}' timed out after {}s", timeout.as_secs())]
    Timeout { block: String, timeout: Duration },

    /// The session state trailer written after the script could not be parsed.
    #[error("Could not recover session state after block '{block}': {reason}")]
    Introspection { block: String, reason: String },

    /// A previous introspection failure left the session untrustworthy.
    #[error("Session is degraded ({0}); reset the session before running more blocks")]
    Degraded(String),

    /// Preparing temp files for the run failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Structural errors in the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Output references form a cycle. The path starts and ends with the same block.
    #[error("Dependency cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },
}

impl GraphError {
    /// Block ids participating in the error.
    pub fn blocks(&self) -> &[String] {
        match self {
            Self::Cycle { path } => path,
        }
    }
}

/// Errors raised while loading a runbook manifest.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read runbook {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid runbook YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Runbook must have at least one block")]
    Empty,

    #[error("Block {0} has an empty id")]
    EmptyId(usize),

    #[error("Block id '{0}' contains characters outside [A-Za-z0-9_-]")]
    InvalidId(String),

    #[error("Duplicate block id '{0}'")]
    DuplicateId(String),
}

/// Errors raised while substituting variables into a block body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("Block '{block}' has not produced output '{output}' yet")]
    MissingOutput { block: String, output: String },

    #[error("Variable '{0}' has no value")]
    MissingVariable(String),
}

/// Errors raised by the runbook runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Unknown block '{0}'")]
    UnknownBlock(String),

    #[error("Block '{block}' is blocked: waiting on {}", missing.join(", "))]
    Blocked { block: String, missing: Vec<String> },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Errors raised by the change watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Nothing to watch")]
    NoPaths,

    #[error("Path has no parent directory: {0}")]
    NoParent(PathBuf),

    #[error("No runbook found in directory {0}")]
    NoRunbook(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "file-watch")]
    #[error("Watch error: {0}")]
    Notify(#[from] notify::Error),
}
