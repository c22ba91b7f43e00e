//! Execution results: per-node and per-run
//!
//! A node either succeeds with an output payload or fails with an error
//! string and an [`ErrorKind`] classification; it never raises. The run
//! result aggregates every node outcome plus usage accounting.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ErrorKind;
use crate::metrics::MetricsSnapshot;
use crate::plan::NodeKind;

/// Token/cost accounting reported by an executor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeUsage {
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub total_cost: f64,
    /// Provider-specific fields, carried verbatim
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

impl NodeUsage {
    pub fn tokens(total_tokens: u64) -> Self {
        NodeUsage {
            total_tokens,
            ..Default::default()
        }
    }
}

/// Observability envelope attached to every node result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub node_id: String,
    pub kind: NodeKind,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    /// 0-based index of the final attempt; `retries = k` permits indices
    /// up to `k`
    pub attempts: u32,
    #[serde(default)]
    pub error_kind: Option<ErrorKind>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub cached: bool,
}

impl NodeMetadata {
    /// Open a metadata record at the current instant.
    pub fn begin(node_id: impl Into<String>, kind: NodeKind) -> Self {
        let now = Utc::now();
        NodeMetadata {
            node_id: node_id.into(),
            kind,
            start_time: now,
            end_time: now,
            duration_seconds: 0.0,
            attempts: 0,
            error_kind: None,
            provider: None,
            cached: false,
        }
    }

    /// Stamp the end time and duration.
    pub fn finish(mut self) -> Self {
        self.end_time = Utc::now();
        self.duration_seconds = (self.end_time - self.start_time)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_error_kind(mut self, kind: ErrorKind) -> Self {
        self.error_kind = Some(kind);
        self
    }

    pub fn with_provider(mut self, provider: Option<String>) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }
}

/// Outcome of executing one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    pub success: bool,
    /// Opaque payload; `None` on failure. Must be a mapping whenever the
    /// node declares a non-empty output schema.
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub usage: Option<NodeUsage>,
    pub metadata: NodeMetadata,
}

impl NodeResult {
    pub fn success(output: Value, metadata: NodeMetadata) -> Self {
        NodeResult {
            success: true,
            output: Some(output),
            error: None,
            usage: None,
            metadata,
        }
    }

    pub fn failure(kind: ErrorKind, error: impl Into<String>, metadata: NodeMetadata) -> Self {
        NodeResult {
            success: false,
            output: None,
            error: Some(error.into()),
            usage: None,
            metadata: metadata.with_error_kind(kind),
        }
    }

    pub fn with_usage(mut self, usage: NodeUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.metadata.error_kind
    }

    /// Output field lookup for mapping-shaped payloads.
    pub fn output_field(&self, field: &str) -> Option<&Value> {
        self.output.as_ref()?.get(field)
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    /// True iff no surfaced fatal node failure
    pub success: bool,
    /// True when the run was cancelled before completing
    #[serde(default)]
    pub cancelled: bool,
    /// node_id -> result, including skipped and cancelled nodes
    pub outputs: HashMap<String, NodeResult>,
    /// Joined failure messages, `None` on success
    #[serde(default)]
    pub error: Option<String>,
    pub duration_seconds: f64,
    pub token_stats: MetricsSnapshot,
}

impl RunResult {
    pub fn node(&self, node_id: &str) -> Option<&NodeResult> {
        self.outputs.get(node_id)
    }

    /// Count of nodes that completed successfully.
    pub fn succeeded(&self) -> usize {
        self.outputs.values().filter(|r| r.success).count()
    }

    /// Count of nodes that surfaced a failure.
    pub fn failed(&self) -> usize {
        self.outputs.values().filter(|r| !r.success).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_result_has_no_error() {
        let meta = NodeMetadata::begin("a", NodeKind::Tool).finish();
        let result = NodeResult::success(json!({"x": 1}), meta);
        assert!(result.success);
        assert_eq!(result.output_field("x"), Some(&json!(1)));
        assert!(result.error.is_none());
        assert!(result.error_kind().is_none());
    }

    #[test]
    fn failure_result_carries_kind() {
        let meta = NodeMetadata::begin("a", NodeKind::Tool).finish();
        let result = NodeResult::failure(ErrorKind::Timeout, "too slow", meta);
        assert!(!result.success);
        assert!(result.output.is_none());
        assert_eq!(result.error.as_deref(), Some("too slow"));
        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
    }

    #[test]
    fn metadata_finish_stamps_duration() {
        let meta = NodeMetadata::begin("a", NodeKind::Llm).finish();
        assert!(meta.duration_seconds >= 0.0);
        assert!(meta.end_time >= meta.start_time);
    }

    #[test]
    fn usage_flattens_extra_fields() {
        let usage: NodeUsage = serde_json::from_value(json!({
            "total_tokens": 12,
            "total_cost": 0.5,
            "prompt_tokens": 8
        }))
        .unwrap();
        assert_eq!(usage.total_tokens, 12);
        assert_eq!(usage.extra["prompt_tokens"], json!(8));

        let round = serde_json::to_value(&usage).unwrap();
        assert_eq!(round["prompt_tokens"], json!(8));
    }

    #[test]
    fn run_result_counts() {
        let ok = NodeResult::success(
            json!({}),
            NodeMetadata::begin("a", NodeKind::Tool).finish(),
        );
        let bad = NodeResult::failure(
            ErrorKind::ExecutorError,
            "boom",
            NodeMetadata::begin("b", NodeKind::Tool).finish(),
        );
        let mut outputs = HashMap::new();
        outputs.insert("a".to_string(), ok);
        outputs.insert("b".to_string(), bad);

        let run = RunResult {
            run_id: "r1".into(),
            success: false,
            cancelled: false,
            outputs,
            error: Some("node 'b' failed: boom".into()),
            duration_seconds: 0.1,
            token_stats: MetricsSnapshot::default(),
        };
        assert_eq!(run.succeeded(), 1);
        assert_eq!(run.failed(), 1);
    }
}
