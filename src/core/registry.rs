//! Output registry storing the latest execution record per block.
//!
//! The registry is the one piece of state shared between the execution side
//! (a single writer) and readers such as the dependency resolver, the renderer
//! and UI polling. Records are inserted whole, so readers never see a
//! partially written record.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::ExecutionRecord;
use crate::deps::normalize_block_id;

/// Thread-safe map from block id to its latest [`ExecutionRecord`].
#[derive(Default)]
pub struct OutputRegistry {
    records: RwLock<HashMap<String, Arc<ExecutionRecord>>>,
}

impl std::fmt::Debug for OutputRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputRegistry").field("records", &self.records.read().len()).finish()
    }
}

impl OutputRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record, replacing any earlier record for the same block.
    pub fn put(&self, block_id: impl Into<String>, record: ExecutionRecord) {
        let block_id = block_id.into();
        tracing::debug!(block = %block_id, status = %record.status, outputs = record.outputs.len(), "Storing execution record");
        self.records.write().insert(block_id, Arc::new(record));
    }

    /// Get the latest record for a block.
    ///
    /// Falls back to the normalized id (hyphens as underscores) when the
    /// literal id has no record, matching how templates spell block ids.
    pub fn get(&self, block_id: &str) -> Option<Arc<ExecutionRecord>> {
        let records = self.records.read();
        if let Some(record) = records.get(block_id) {
            return Some(Arc::clone(record));
        }

        let normalized = normalize_block_id(block_id);
        records
            .iter()
            .find(|(id, _)| normalize_block_id(id) == normalized)
            .map(|(_, record)| Arc::clone(record))
    }

    /// Get a single output value produced by a block.
    pub fn get_output(&self, block_id: &str, name: &str) -> Option<String> {
        self.get(block_id).and_then(|record| record.outputs.get(name).cloned())
    }

    /// Check if a block has a record.
    pub fn contains(&self, block_id: &str) -> bool {
        self.get(block_id).is_some()
    }

    /// Remove the record for a block, returning it if present.
    pub fn remove(&self, block_id: &str) -> Option<Arc<ExecutionRecord>> {
        self.records.write().remove(block_id)
    }

    /// Remove the records of several blocks at once.
    ///
    /// Returns the ids that actually had a record.
    pub fn invalidate<'a>(&self, block_ids: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut records = self.records.write();
        block_ids
            .into_iter()
            .filter(|id| records.remove(*id).is_some())
            .map(str::to_string)
            .collect()
    }

    /// Ids of all blocks with a record, sorted.
    pub fn block_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Copy of all current records.
    pub fn snapshot(&self) -> HashMap<String, Arc<ExecutionRecord>> {
        self.records.read().clone()
    }

    /// Outputs of every block keyed by normalized block id.
    ///
    /// Only runs that published outputs (success or warning) are included.
    pub fn template_outputs(&self) -> HashMap<String, HashMap<String, String>> {
        self.records
            .read()
            .iter()
            .filter(|(_, record)| record.status.publishes_outputs())
            .map(|(id, record)| (normalize_block_id(id), record.outputs.clone()))
            .collect()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Drop every record.
    pub fn clear(&self) {
        self.records.write().clear();
    }
}
