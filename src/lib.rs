//! # Runbooks
//!
//! Execution and dependency core for executable runbooks.
//!
//! A runbook is an ordered list of blocks (shell commands and pass/fail
//! checks). Blocks run one at a time in a shared session, so directory and
//! environment changes made by one block are visible to the next, and blocks
//! publish named outputs that later blocks consume through template
//! references.
//!
//! ## Features
//!
//! - **Persistent sessions**: `cd` and `export` carry over between blocks
//! - **Block outputs**: `name=value` lines written to `$RUNBOOK_OUTPUT`
//! - **Dependency gating**: blocks wait for the outputs they reference
//! - **Live reload**: debounced file-change notifications for the UI
//!
//! ## Quick Start
//!
//! ```bash
//! # Validate a runbook and show its dependency graph
//! runbooks check ./runbook.yaml
//!
//! # Run every block in order
//! runbooks run ./runbook.yaml --var Region=us-east1
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::derivable_impls)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::cast_possible_truncation)]

pub mod core;
pub mod deps;
pub mod error;
pub mod runbook;
pub mod watch;

// Re-export commonly used types
pub use crate::core::{
    AbortHandle, BlockExecutor, BlockKind, BlockRequest, BlockStatus, Config, ExecutionRecord,
    OutputRegistry, Session, SessionManager, SessionMetadata,
};
pub use deps::{extract_references, DependencyGraph, OutputRef, Readiness};
pub use error::{GraphError, LoadError, RenderError, RunError, SessionError, WatchError};
pub use runbook::{parse_runbook, Block, RunSummary, Runbook, RunbookRunner};
#[cfg(feature = "file-watch")]
pub use watch::FileWatcher;
pub use watch::{ReloadEvent, ReloadHub};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "runbooks";
