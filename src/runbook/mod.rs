//! Runbook manifests and their execution.
//!
//! A runbook is a YAML file listing blocks in document order. Blocks consume
//! outputs of earlier blocks through `{{ ._blocks.B.outputs.O }}` references
//! and run one at a time in a shared session.

mod parser;
mod render;
mod runner;
mod schema;

pub use parser::{is_valid_block_id, lint_runbook, parse_runbook, parse_runbook_str, LintReport};
pub use render::{render, variable_names};
pub use runner::{BlockedBlock, RunSummary, RunbookRunner};
pub use schema::{Block, Runbook, Variable};
