//! Output reference extraction.
//!
//! Block bodies name the outputs they consume with template expressions like
//! `{{ ._blocks.create_project.outputs.project_id }}`. These references are
//! the edges of the dependency graph.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// `{{ ._blocks.B.outputs.O }}`, tolerating a `-` trim marker and a
/// `range $i, $x :=` prefix. Anything after the output name (a `| modifier`,
/// the closing braces) is ignored.
static REFERENCE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*-?\s*(?:range\s+[^}]*?)?\.?_blocks\.([a-zA-Z0-9_-]+)\.outputs\.(\w+)")
        .expect("reference pattern is valid")
});

/// A reference from a block body to another block's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OutputRef {
    /// Referenced block id, as written in the template
    pub block_id: String,
    /// Referenced output name
    pub output: String,
}

impl OutputRef {
    pub fn new(block_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self { block_id: block_id.into(), output: output.into() }
    }
}

impl std::fmt::Display for OutputRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.block_id, self.output)
    }
}

/// Extract every distinct output reference from a block body, in first-seen order.
pub fn extract_references(body: &str) -> Vec<OutputRef> {
    let mut seen = HashSet::new();
    let mut refs = Vec::new();

    for caps in REFERENCE_PATTERN.captures_iter(body) {
        let reference = OutputRef::new(&caps[1], &caps[2]);
        if seen.insert(reference.clone()) {
            refs.push(reference);
        }
    }

    refs
}

/// Normalize a block id for template lookup: hyphens become underscores.
pub fn normalize_block_id(id: &str) -> String {
    id.replace('-', "_")
}
