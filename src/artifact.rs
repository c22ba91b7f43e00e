//! Artifact offload for oversized node outputs
//!
//! Outputs above the large-output threshold are handed to an
//! [`ArtifactStore`] and replaced in the context store by an
//! `{"artifact_ref": ...}` stub. Offload is best-effort: a store failure
//! leaves the inline payload in place.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

/// Default threshold above which outputs are offloaded (256 KiB)
pub const LARGE_OUTPUT_THRESHOLD: usize = 256 * 1024;

#[derive(Debug, Clone, Error)]
pub enum ArtifactError {
    #[error("artifact store rejected payload: {0}")]
    Rejected(String),
    #[error("artifact '{0}' not found")]
    NotFound(String),
}

/// Opaque handle storage for large payloads.
///
/// Persistence across processes is out of scope; implementations may be
/// memory-backed or delegate to external storage.
pub trait ArtifactStore: Send + Sync {
    /// Store a payload, returning an opaque reference.
    fn put(&self, payload: &Value) -> Result<String, ArtifactError>;

    /// Fetch a payload by reference.
    fn get(&self, artifact_ref: &str) -> Result<Value, ArtifactError>;
}

/// Process-local artifact store
#[derive(Default)]
pub struct MemoryArtifactStore {
    items: DashMap<String, Value>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<dyn ArtifactStore> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn put(&self, payload: &Value) -> Result<String, ArtifactError> {
        let artifact_ref = Uuid::new_v4().to_string();
        self.items.insert(artifact_ref.clone(), payload.clone());
        Ok(artifact_ref)
    }

    fn get(&self, artifact_ref: &str) -> Result<Value, ArtifactError> {
        self.items
            .get(artifact_ref)
            .map(|v| v.clone())
            .ok_or_else(|| ArtifactError::NotFound(artifact_ref.to_string()))
    }
}

/// Build the stub persisted in place of an offloaded payload.
pub fn artifact_stub(artifact_ref: &str) -> Value {
    json!({ "artifact_ref": artifact_ref })
}
