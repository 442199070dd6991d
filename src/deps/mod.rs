//! Dependency resolution between blocks.
//!
//! Blocks declare what they consume through output references in their
//! bodies; the graph built from those references decides which blocks may
//! run.

mod graph;
mod references;

pub use graph::{DependencyGraph, MissingDependency, Readiness};
pub use references::{extract_references, normalize_block_id, OutputRef};
