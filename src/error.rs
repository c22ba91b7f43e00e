//! Crate-wide error types
//!
//! Two layers, one thiserror enum per concern plus a top-level wrapper:
//!
//! - [`ErrorKind`] is the closed set of failure classifications surfaced in
//!   `NodeMetadata.error_kind`. Node-level failures are always *returned*
//!   inside a `NodeResult`, never raised.
//! - [`StrataError`] is the raised error for the few conditions that abort
//!   compilation or a whole run (validation refusal, cycles, a missing
//!   config, HALT-policy fatalities).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::path::PathMiss;
use crate::registry::RegistryError;
use crate::schema::TypeParseError;
use crate::validate::ValidationError;

/// Classification attached to every failed node result.
///
/// Variant names are the exact strings surfaced in run output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationError,
    ContextValidationError,
    DependencyUnready,
    DependencyFailed,
    Timeout,
    UnexpectedResultType,
    SchemaValidationError,
    RegistryMiss,
    PolicyDenied,
    ExecutorError,
    ConfigMissing,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::ContextValidationError => "ContextValidationError",
            ErrorKind::DependencyUnready => "DependencyUnready",
            ErrorKind::DependencyFailed => "DependencyFailed",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::UnexpectedResultType => "UnexpectedResultType",
            ErrorKind::SchemaValidationError => "SchemaValidationError",
            ErrorKind::RegistryMiss => "RegistryMiss",
            ErrorKind::PolicyDenied => "PolicyDenied",
            ErrorKind::ExecutorError => "ExecutorError",
            ErrorKind::ConfigMissing => "ConfigMissing",
            ErrorKind::Cancelled => "Cancelled",
        }
    }

    /// Whether a failed attempt with this kind is worth retrying.
    ///
    /// Timeouts and executor faults may be transient; everything else is
    /// deterministic and retrying would only repeat the failure.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::ExecutorError)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error for compilation and run-fatal conditions
#[derive(Debug, Error)]
pub enum StrataError {
    /// Blueprint refused to compile; carries the full issue list
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// The dependency relation is not acyclic
    #[error("cycle detected involving nodes: {}", involved.join(", "))]
    CycleDetected { involved: Vec<String> },

    /// A scheduled node id has no config in the plan (fatal under any policy)
    #[error("node '{0}' not found in plan")]
    ConfigMissing(String),

    /// Registry lookup failure surfaced as a run-fatal error under HALT
    #[error("{0}")]
    Registry(#[from] RegistryError),

    /// Path traversal failure surfaced from compilation checks
    #[error("{0}")]
    Path(#[from] PathMiss),

    /// Mini-type grammar failure outside the validator's accumulation
    #[error("{0}")]
    TypeParse(#[from] TypeParseError),

    /// A node failed under the HALT policy; the run is aborted
    #[error("node '{node_id}' failed under HALT policy: {message}")]
    Halted { node_id: String, message: String },

    /// The whole-run deadline elapsed
    #[error("run timed out after {0:.1}s")]
    RunTimeout(f64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl StrataError {
    pub fn other(msg: impl Into<String>) -> Self {
        StrataError::Other(msg.into())
    }
}
