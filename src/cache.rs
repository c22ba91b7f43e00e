//! Content-addressed result cache
//!
//! Maps a fingerprint over `{node_id, config, resolved inputs}` to the
//! stored NodeResult. Per-process, unbounded, opt-in per node. Only
//! successful results are stored, and any internal error degrades caching
//! to a no-op rather than failing the node.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::outcome::NodeResult;
use crate::plan::NodeConfig;

/// Compute the cache fingerprint for one node invocation.
///
/// The config is serialized as-is: `NodeConfig` carries no observability
/// fields (metadata lives on results), and serde_json maps are key-sorted,
/// so the digest is invariant under key-order permutations of the input.
/// Returns `None` when serialization fails, which callers treat as
/// "don't cache".
pub fn fingerprint(config: &NodeConfig, inputs: &serde_json::Map<String, Value>) -> Option<String> {
    let payload = json!({
        "node_id": config.id,
        "config": serde_json::to_value(config).ok()?,
        "inputs": Value::Object(inputs.clone()),
    });
    let serialized = serde_json::to_string(&payload).ok()?;

    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    Some(format!("{:x}", hasher.finalize()))
}

/// Process-lifetime cache of successful node results
#[derive(Clone, Default)]
pub struct ResultCache {
    entries: Arc<DashMap<String, NodeResult>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<NodeResult> {
        self.entries.get(key).map(|r| r.clone())
    }

    /// Store a result. Failed results are silently dropped; repeated
    /// successful computation of the same fingerprint yields equivalent
    /// results, so last-write-wins is acceptable.
    pub fn put(&self, key: impl Into<String>, result: NodeResult) {
        if !result.success {
            debug!("refusing to cache failed result");
            return;
        }
        self.entries.insert(key.into(), result);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}
