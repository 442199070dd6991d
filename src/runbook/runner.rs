//! Runbook execution engine.
//!
//! Gates each block on its dependencies, renders its body, runs it in the
//! shared session and invalidates downstream records when it is re-run.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use super::{render, Runbook};
use crate::core::{
    AbortHandle, BlockRequest, BlockStatus, ExecutionRecord, OutputLine, OutputRegistry,
    SessionManager,
};
use crate::deps::{DependencyGraph, Readiness};
use crate::error::{GraphError, RunError};

/// Outcome of running a whole runbook.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Records of the blocks that ran, in order
    pub executed: Vec<ExecutionRecord>,
    /// Block that could not run, with what it waited on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<BlockedBlock>,
    /// Block whose failure stopped the run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<String>,
    /// Whether an abort stopped the run between blocks
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
}

/// A block that was not ready when its turn came.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedBlock {
    pub block_id: String,
    pub missing: Vec<String>,
}

impl RunSummary {
    /// Check if every block ran and none failed.
    pub fn is_success(&self) -> bool {
        self.blocked.is_none() && self.failed.is_none() && !self.cancelled
    }

    /// Number of blocks that ended with a warning.
    pub fn warning_count(&self) -> usize {
        self.executed.iter().filter(|r| r.status == BlockStatus::Warning).count()
    }
}

/// Runbook runner state.
#[derive(Debug)]
pub struct RunbookRunner {
    /// The runbook being executed
    runbook: Runbook,

    /// Dependency graph of the current runbook
    graph: DependencyGraph,

    /// Session the blocks run in
    manager: SessionManager,

    /// Variable values
    variables: HashMap<String, String>,

    /// Abort flag for the run in progress, cleared when a new run starts
    abort: AbortHandle,
}

impl RunbookRunner {
    /// Create a new runner for a runbook.
    pub fn new(runbook: Runbook, manager: SessionManager) -> Self {
        let graph = DependencyGraph::build(runbook.block_bodies());
        let variables = runbook.default_variables();
        Self { runbook, graph, manager, variables, abort: AbortHandle::new() }
    }

    /// Set a variable value.
    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    /// Set multiple variables.
    pub fn set_variables(&mut self, vars: HashMap<String, String>) {
        self.variables.extend(vars);
    }

    /// Replace the runbook after a reload, keeping session and records.
    ///
    /// Records of blocks that no longer exist are dropped.
    pub fn reload(&mut self, runbook: Runbook) {
        let removed: Vec<String> = self
            .registry()
            .block_ids()
            .into_iter()
            .filter(|id| runbook.block(id).is_none())
            .collect();
        self.registry().invalidate(removed.iter().map(String::as_str));

        for (name, value) in runbook.default_variables() {
            self.variables.entry(name).or_insert(value);
        }
        self.graph = DependencyGraph::build(runbook.block_bodies());
        self.runbook = runbook;
        tracing::info!(runbook = %self.runbook.name, blocks = self.runbook.block_count(), "Runbook reloaded");
    }

    /// The runbook being executed.
    pub fn runbook(&self) -> &Runbook {
        &self.runbook
    }

    /// The dependency graph.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// The session manager.
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// The output registry.
    pub fn registry(&self) -> &Arc<OutputRegistry> {
        self.manager.registry()
    }

    /// Handle that aborts the block currently running.
    ///
    /// An abort only affects the run in progress; the next `run_block` or
    /// `run_all` starts with the flag cleared.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Whether a block may run now.
    pub fn readiness(&self, block_id: &str) -> Result<Readiness, RunError> {
        if self.runbook.block(block_id).is_none() {
            return Err(RunError::UnknownBlock(block_id.to_string()));
        }
        Ok(self.graph.readiness(block_id, self.registry()))
    }

    /// Run a single block.
    pub fn run_block(&self, block_id: &str) -> Result<ExecutionRecord, RunError> {
        self.run_block_streaming(block_id, |_| {})
    }

    /// Run a single block, forwarding output lines as they arrive.
    pub fn run_block_streaming(
        &self,
        block_id: &str,
        on_line: impl FnMut(&OutputLine),
    ) -> Result<ExecutionRecord, RunError> {
        self.abort.reset();
        self.execute_block(block_id, on_line)
    }

    fn execute_block(
        &self,
        block_id: &str,
        on_line: impl FnMut(&OutputLine),
    ) -> Result<ExecutionRecord, RunError> {
        let block = self
            .runbook
            .block(block_id)
            .ok_or_else(|| RunError::UnknownBlock(block_id.to_string()))?;

        match self.graph.readiness(block_id, self.registry()) {
            Readiness::Ready => {}
            Readiness::Cyclic { path } => return Err(GraphError::Cycle { path }.into()),
            Readiness::Blocked { missing } => {
                return Err(RunError::Blocked {
                    block: block_id.to_string(),
                    missing: missing.iter().map(ToString::to_string).collect(),
                });
            }
        }

        let script = render(&block.body, &self.variables, self.registry())?;

        let mut request =
            BlockRequest::new(&block.id, block.kind, script).with_abort(self.abort.clone());
        if let Some(timeout) = block.timeout() {
            request = request.with_timeout(timeout);
        }

        let record = self.manager.execute_streaming(&request, on_line)?;

        if record.status.publishes_outputs() {
            let dependents = self.graph.dependents(block_id);
            let invalidated = self.registry().invalidate(dependents.iter().map(String::as_str));
            if !invalidated.is_empty() {
                tracing::info!(block = %block_id, invalidated = ?invalidated, "Invalidated dependent blocks");
            }
        }

        Ok(record)
    }

    /// Run every block in document order.
    ///
    /// Stops at the first block that is not ready or does not succeed.
    /// Timeouts and session failures are returned as errors.
    pub fn run_all(&self) -> Result<RunSummary, RunError> {
        self.run_all_streaming(|_, _| {})
    }

    /// Like [`run_all`](Self::run_all), forwarding `(block id, line)` pairs.
    pub fn run_all_streaming(
        &self,
        mut on_line: impl FnMut(&str, &OutputLine),
    ) -> Result<RunSummary, RunError> {
        self.graph.validate()?;
        self.abort.reset();

        let mut summary = RunSummary::default();
        for block in &self.runbook.blocks {
            if self.abort.is_aborted() {
                tracing::warn!(block = %block.id, "Run aborted, stopping");
                summary.cancelled = true;
                break;
            }

            match self.graph.readiness(&block.id, self.registry()) {
                Readiness::Ready => {}
                Readiness::Blocked { missing } => {
                    tracing::warn!(block = %block.id, "Block is not ready, stopping");
                    summary.blocked = Some(BlockedBlock {
                        block_id: block.id.clone(),
                        missing: missing.iter().map(ToString::to_string).collect(),
                    });
                    break;
                }
                Readiness::Cyclic { path } => return Err(GraphError::Cycle { path }.into()),
            }

            let record = self.execute_block(&block.id, |line| on_line(&block.id, line))?;
            let succeeded = record.status.publishes_outputs();
            summary.executed.push(record);

            if !succeeded {
                tracing::warn!(block = %block.id, "Block failed, stopping");
                summary.failed = Some(block.id.clone());
                break;
            }
        }

        Ok(summary)
    }
}
