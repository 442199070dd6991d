//! Core types and functionality for Runbooks.
//!
//! This module contains the execution side of the crate: the session that
//! carries state between blocks, the block executor, execution records and
//! the registry they are published to, and configuration.

mod config;
mod executor;
mod outputs;
mod record;
mod registry;
mod session;
mod trailer;

pub use config::{Config, PathsConfig, SessionConfig, WatchConfig};
pub use executor::{
    capture_files, detect_interpreter, is_shell_interpreter, AbortHandle, BlockExecutor,
    BlockRequest, OutputLine, RunOutcome, FILES_ENV_VAR, GENERATED_FILES_ENV_VAR,
    REPO_FILES_ENV_VAR,
};
pub use outputs::{is_valid_output_key, parse_outputs, read_outputs, OUTPUT_ENV_VAR};
pub use record::{BlockKind, BlockStatus, ExecutionRecord};
pub use registry::OutputRegistry;
pub use session::{Session, SessionManager, SessionMetadata};
pub use trailer::{
    diff_env, filter_env, is_excluded_var, parse_trailer, wrap_script, EnvDiff, Trailer,
    TrailerError, TRAILER_ENV_VAR,
};
