//! Execution records.
//!
//! One record is produced per completed block run and stored in the
//! [`OutputRegistry`](super::OutputRegistry), replacing any earlier record for
//! the same block.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of block, which decides how exit codes are interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    /// A command: zero is success, anything else is failure.
    #[default]
    Command,
    /// A pass/fail check: 0 success, 1 failure, 2 warning.
    Check,
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => write!(f, "command"),
            Self::Check => write!(f, "check"),
        }
    }
}

/// Terminal status of a block run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockStatus {
    Success,
    Failure,
    /// Check exited with code 2.
    Warning,
    /// Killed after the deadline.
    Timeout,
    /// Killed by an explicit abort.
    Cancelled,
}

impl BlockStatus {
    /// Map a process exit code to a status for the given block kind.
    ///
    /// Check blocks honor the 0/1/2 contract; any other code is a failure.
    pub fn from_exit_code(kind: BlockKind, code: i32) -> Self {
        match (kind, code) {
            (_, 0) => Self::Success,
            (BlockKind::Check, 2) => Self::Warning,
            _ => Self::Failure,
        }
    }

    /// Whether a run with this status publishes outputs and session changes.
    pub fn publishes_outputs(self) -> bool {
        matches!(self, Self::Success | Self::Warning)
    }

    /// Lowercase label, identical to the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Warning => "warning",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one block run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Block that ran
    pub block_id: String,
    /// Kind of the block
    pub kind: BlockKind,
    /// When the process was started
    pub started_at: DateTime<Utc>,
    /// When the process exited or was killed
    pub finished_at: DateTime<Utc>,
    /// Exit code, `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    /// Terminal status
    pub status: BlockStatus,
    /// Standard output lines, in order
    pub stdout: Vec<String>,
    /// Standard error lines, in order
    pub stderr: Vec<String>,
    /// Outputs written to `$RUNBOOK_OUTPUT`
    pub outputs: HashMap<String, String>,
    /// Names of session variables this run added, changed or removed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_changes: Vec<String>,
    /// Files captured from `$RUNBOOK_FILES`, relative to the generated-files dir
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub captured_files: Vec<String>,
    /// Explanation for failures that are not plain exit codes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionRecord {
    /// Check if the run succeeded (success or warning).
    pub fn success(&self) -> bool {
        self.status.publishes_outputs()
    }

    /// Look up a single output.
    pub fn output(&self, name: &str) -> Option<&str> {
        self.outputs.get(name).map(String::as_str)
    }

    /// Wall-clock duration of the run.
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at).to_std().unwrap_or_default()
    }

    /// Combined output (stdout followed by stderr).
    pub fn combined(&self) -> String {
        let mut lines = self.stdout.clone();
        lines.extend(self.stderr.iter().cloned());
        lines.join("\n")
    }
}
