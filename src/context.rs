//! Per-run context store
//!
//! Keyed storage for node inputs and outputs within a single run, backed by
//! DashMap for lock-free concurrent access. Only the node executor writes,
//! and only for the node it is executing; the store is discarded when the
//! run completes.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::outcome::NodeResult;

/// Run-scoped store of node input snapshots and results
#[derive(Clone, Default)]
pub struct ContextStore {
    /// node_id -> assembled placeholder context, written once pre-execution
    inputs: Arc<DashMap<String, Value>>,
    /// node_id -> final result, written once at finalization
    results: Arc<DashMap<String, NodeResult>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the assembled placeholder context for a node.
    pub fn put_input(&self, node_id: impl Into<String>, input: Value) {
        self.inputs.insert(node_id.into(), input);
    }

    pub fn input(&self, node_id: &str) -> Option<Value> {
        self.inputs.get(node_id).map(|v| v.clone())
    }

    /// Record a node's final result. A second write overwrites; the
    /// executor is the only writer and writes once per node per run.
    pub fn put_result(&self, node_id: impl Into<String>, result: NodeResult) {
        self.results.insert(node_id.into(), result);
    }

    pub fn result(&self, node_id: &str) -> Option<NodeResult> {
        self.results.get(node_id).map(|r| r.clone())
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.results.contains_key(node_id)
    }

    pub fn is_success(&self, node_id: &str) -> bool {
        self.results
            .get(node_id)
            .map(|r| r.success)
            .unwrap_or(false)
    }

    /// Output payload of a completed node.
    pub fn output(&self, node_id: &str) -> Option<Value> {
        self.results.get(node_id).and_then(|r| r.output.clone())
    }

    /// Drain every result into a plain map (used to build the run result).
    pub fn into_results(self) -> std::collections::HashMap<String, NodeResult> {
        self.results
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl std::fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStore")
            .field("inputs", &self.inputs.len())
            .field("results", &self.results.len())
            .finish()
    }
}
