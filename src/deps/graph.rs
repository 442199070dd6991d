//! Dependency graph between blocks.
//!
//! Edges come from output references: a block that reads
//! `._blocks.B.outputs.O` depends on `B`. A block becomes ready once every
//! block it references has a successful record that carries the output.
//!
//! Cycle detection:
//! - DFS three-color traversal reports the first cycle with its full path
//! - Every block that can reach itself is marked cyclic and is never ready
//! - A self-reference is not a cycle; it means "ready once it has run"

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use serde::Serialize;

use super::references::{extract_references, normalize_block_id, OutputRef};
use crate::core::{BlockStatus, OutputRegistry};
use crate::error::GraphError;

/// A dependency that keeps a block from being ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum MissingDependency {
    /// The referenced block is not declared in the runbook.
    UnknownBlock { block: String },
    /// The referenced block has no record yet.
    NotRun { block: String },
    /// The referenced block's latest run did not publish outputs.
    Unsuccessful { block: String, status: BlockStatus },
    /// The referenced block ran but did not produce the output.
    MissingOutput { block: String, output: String },
}

impl fmt::Display for MissingDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownBlock { block } => write!(f, "unknown block '{block}'"),
            Self::NotRun { block } => write!(f, "block '{block}' has not run"),
            Self::Unsuccessful { block, status } => {
                write!(f, "block '{block}' last ended with {status}")
            }
            Self::MissingOutput { block, output } => {
                write!(f, "output '{output}' of block '{block}'")
            }
        }
    }
}

/// Whether a block may run now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    Blocked { missing: Vec<MissingDependency> },
    /// The block sits on a dependency cycle and can never run.
    Cyclic { path: Vec<String> },
}

impl Readiness {
    /// Check if the block may run.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Block dependency graph built from output references.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Declared block ids in document order
    blocks: Vec<String>,
    /// Block -> references, block ids resolved to declared ids where possible
    references: HashMap<String, Vec<OutputRef>>,
    /// Block -> distinct blocks it depends on (self excluded)
    dependencies: HashMap<String, Vec<String>>,
    /// Block -> distinct blocks that depend on it (self excluded)
    dependents: HashMap<String, Vec<String>>,
    /// (block, reference) pairs naming undeclared blocks
    unknown: Vec<(String, OutputRef)>,
    /// First cycle found, as a closed path
    cycle: Option<Vec<String>>,
    /// Every block that can reach itself
    cyclic: HashSet<String>,
}

impl DependencyGraph {
    /// Build the graph from `(block id, unrendered body)` pairs in document order.
    pub fn build<'a>(blocks: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let blocks: Vec<(&str, &str)> = blocks.into_iter().collect();
        let declared: Vec<String> = blocks.iter().map(|(id, _)| (*id).to_string()).collect();
        let by_normalized: HashMap<String, &str> =
            blocks.iter().map(|(id, _)| (normalize_block_id(id), *id)).collect();
        let literal: HashSet<&str> = blocks.iter().map(|(id, _)| *id).collect();

        let mut graph = Self { blocks: declared, ..Self::default() };

        for (id, body) in &blocks {
            let mut refs = Vec::new();
            let mut deps: Vec<String> = Vec::new();

            for reference in extract_references(body) {
                let resolved = if literal.contains(reference.block_id.as_str()) {
                    Some(reference.block_id.clone())
                } else {
                    by_normalized.get(&normalize_block_id(&reference.block_id)).map(|s| (*s).to_string())
                };

                match resolved {
                    Some(target) => {
                        if target != *id && !deps.contains(&target) {
                            deps.push(target.clone());
                            graph.dependents.entry(target.clone()).or_default().push((*id).to_string());
                        }
                        refs.push(OutputRef::new(target, reference.output));
                    }
                    None => {
                        tracing::warn!(block = %id, reference = %reference, "Reference to unknown block");
                        graph.unknown.push(((*id).to_string(), reference.clone()));
                        refs.push(reference);
                    }
                }
            }

            graph.references.insert((*id).to_string(), refs);
            graph.dependencies.insert((*id).to_string(), deps);
        }

        graph.cycle = graph.find_cycle();
        graph.cyclic = graph.find_cyclic_blocks();
        if let Some(ref path) = graph.cycle {
            tracing::warn!(cycle = %path.join(" -> "), "Dependency cycle detected");
        }

        graph
    }

    /// Declared block ids in document order.
    pub fn block_ids(&self) -> &[String] {
        &self.blocks
    }

    /// Check if a block is declared.
    pub fn contains(&self, block_id: &str) -> bool {
        self.references.contains_key(block_id)
    }

    /// References made by a block.
    pub fn references(&self, block_id: &str) -> &[OutputRef] {
        self.references.get(block_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Blocks a block directly depends on.
    pub fn dependencies(&self, block_id: &str) -> &[String] {
        self.dependencies.get(block_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// All blocks that depend on `block_id`, directly or transitively, in document order.
    pub fn dependents(&self, block_id: &str) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([block_id]);

        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents.get(current).into_iter().flatten() {
                if dependent != block_id && seen.insert(dependent.as_str()) {
                    queue.push_back(dependent.as_str());
                }
            }
        }

        self.blocks.iter().filter(|id| seen.contains(id.as_str())).cloned().collect()
    }

    /// References to blocks that are not declared, as `(block, reference)` pairs.
    pub fn unknown_references(&self) -> &[(String, OutputRef)] {
        &self.unknown
    }

    /// Check if a block sits on a dependency cycle.
    pub fn is_cyclic(&self, block_id: &str) -> bool {
        self.cyclic.contains(block_id)
    }

    /// Return the first structural error, if any.
    pub fn validate(&self) -> Result<(), GraphError> {
        match self.cycle {
            Some(ref path) => Err(GraphError::Cycle { path: path.clone() }),
            None => Ok(()),
        }
    }

    /// Check if a block may run given the current records.
    pub fn is_ready(&self, block_id: &str, registry: &OutputRegistry) -> bool {
        self.readiness(block_id, registry).is_ready()
    }

    /// Work out whether a block may run, listing what it still waits on.
    pub fn readiness(&self, block_id: &str, registry: &OutputRegistry) -> Readiness {
        if self.is_cyclic(block_id) {
            let path = self.cycle_through(block_id);
            return Readiness::Cyclic { path };
        }

        let mut missing = Vec::new();
        for reference in self.references(block_id) {
            let block = reference.block_id.clone();
            if !self.contains(&block) {
                missing.push(MissingDependency::UnknownBlock { block });
                continue;
            }

            match registry.get(&block) {
                None => missing.push(MissingDependency::NotRun { block }),
                Some(record) if !record.status.publishes_outputs() => {
                    missing.push(MissingDependency::Unsuccessful { block, status: record.status });
                }
                Some(record) if !record.outputs.contains_key(&reference.output) => {
                    missing.push(MissingDependency::MissingOutput {
                        block,
                        output: reference.output.clone(),
                    });
                }
                Some(_) => {}
            }
        }

        if missing.is_empty() {
            Readiness::Ready
        } else {
            Readiness::Blocked { missing }
        }
    }

    /// Detect cycles using DFS with three-color marking.
    ///
    /// Returns the first cycle as a closed path (`a, b, a`).
    fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn dfs<'a>(
            node: &'a str,
            dependencies: &'a HashMap<String, Vec<String>>,
            colors: &mut HashMap<&'a str, Color>,
            stack: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            colors.insert(node, Color::Gray);
            stack.push(node);

            for next in dependencies.get(node).into_iter().flatten() {
                match colors.get(next.as_str()).copied().unwrap_or(Color::White) {
                    Color::Gray => {
                        let start = stack.iter().position(|s| *s == next.as_str()).unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[start..].iter().map(|s| (*s).to_string()).collect();
                        path.push(next.clone());
                        return Some(path);
                    }
                    Color::White => {
                        if let Some(path) = dfs(next, dependencies, colors, stack) {
                            return Some(path);
                        }
                    }
                    Color::Black => {}
                }
            }

            stack.pop();
            colors.insert(node, Color::Black);
            None
        }

        let mut colors: HashMap<&str, Color> =
            self.blocks.iter().map(|id| (id.as_str(), Color::White)).collect();
        let mut stack = Vec::new();

        for id in &self.blocks {
            if colors.get(id.as_str()) == Some(&Color::White) {
                if let Some(path) = dfs(id, &self.dependencies, &mut colors, &mut stack) {
                    return Some(path);
                }
            }
        }

        None
    }

    /// Blocks that can reach themselves through at least one edge.
    fn find_cyclic_blocks(&self) -> HashSet<String> {
        if self.cycle.is_none() {
            return HashSet::new();
        }
        self.blocks.iter().filter(|id| self.reaches(id, id)).cloned().collect()
    }

    /// BFS over dependency edges from `from`, looking for `to`.
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([from]);

        while let Some(current) = queue.pop_front() {
            for next in self.dependencies(current) {
                if next == to {
                    return true;
                }
                if visited.insert(next.as_str()) {
                    queue.push_back(next.as_str());
                }
            }
        }

        false
    }

    /// A closed cycle path through `block_id`, for error messages.
    fn cycle_through(&self, block_id: &str) -> Vec<String> {
        // BFS back to the block, keeping parents to rebuild the path
        let mut parents: HashMap<&str, &str> = HashMap::new();
        let mut queue: VecDeque<&str> = VecDeque::from([block_id]);

        while let Some(current) = queue.pop_front() {
            for next in self.dependencies(current) {
                if next == block_id {
                    let mut path = vec![block_id.to_string()];
                    let mut node = current;
                    while node != block_id {
                        path.push(node.to_string());
                        node = parents.get(node).copied().unwrap_or(block_id);
                    }
                    path[1..].reverse();
                    path.push(block_id.to_string());
                    return path;
                }
                if !parents.contains_key(next.as_str()) {
                    parents.insert(next.as_str(), current);
                    queue.push_back(next.as_str());
                }
            }
        }

        vec![block_id.to_string()]
    }
}
