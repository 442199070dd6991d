//! Runbook schema definitions.
//!
//! Defines the YAML manifest: an ordered list of blocks plus optional
//! variables that fill `{{ .Name }}` placeholders.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::BlockKind;

/// A runbook definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runbook {
    /// Name of the runbook
    pub name: String,

    /// Description of what this runbook does
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Variables referenced as `{{ .Name }}` in block bodies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<HashMap<String, Variable>>,

    /// Blocks in document order
    pub blocks: Vec<Block>,
}

/// A variable definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Variable {
    /// Default value
    pub default: Option<String>,

    /// Help text shown next to the input
    pub description: Option<String>,
}

/// An executable block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Unique id, `[A-Za-z0-9_-]+`
    pub id: String,

    /// Command or check
    #[serde(default)]
    pub kind: BlockKind,

    /// Unrendered script body
    #[serde(alias = "command", alias = "script")]
    pub body: String,

    /// Id of the block whose form supplies this block's variables.
    /// Passed through for the UI; `lint_runbook` checks that it exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<String>,

    /// Display title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Timeout in seconds, overriding the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl Runbook {
    /// Get the number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Find a block by id.
    pub fn block(&self, id: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Default values of all variables that have one.
    pub fn default_variables(&self) -> HashMap<String, String> {
        self.variables
            .iter()
            .flatten()
            .filter_map(|(name, var)| var.default.clone().map(|d| (name.clone(), d)))
            .collect()
    }

    /// `(id, body)` pairs in document order, as the dependency graph expects.
    pub fn block_bodies(&self) -> impl Iterator<Item = (&str, &str)> {
        self.blocks.iter().map(|b| (b.id.as_str(), b.body.as_str()))
    }
}

impl Block {
    /// Name shown to users: the title if set, otherwise the id.
    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.id)
    }

    /// Per-block timeout, if configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}
