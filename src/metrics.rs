//! Per-run usage accounting
//!
//! Accumulates token/cost usage keyed by node kind, then node id. Updates
//! are tolerant: a result without usage is a no-op, protecting the
//! scheduler from partial provider implementations.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::outcome::{NodeResult, NodeUsage};
use crate::plan::NodeKind;

/// Aggregate summary for one node kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KindSummary {
    pub node_count: usize,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub avg_tokens_per_node: f64,
}

/// Serializable snapshot of run metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_tokens: u64,
    pub total_cost: f64,
    /// kind -> node_id -> usage
    pub node_metrics: BTreeMap<String, BTreeMap<String, NodeUsage>>,
    pub summaries: BTreeMap<String, KindSummary>,
}

#[derive(Default)]
struct MetricsInner {
    total_tokens: u64,
    total_cost: f64,
    by_kind: BTreeMap<NodeKind, BTreeMap<String, NodeUsage>>,
}

/// Thread-safe usage accumulator for one run
#[derive(Clone, Default)]
pub struct RunMetrics {
    inner: Arc<Mutex<MetricsInner>>,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one node result into the totals. No-op without usage.
    pub fn update(&self, kind: NodeKind, node_id: &str, result: &NodeResult) {
        let Some(usage) = &result.usage else {
            return;
        };
        let mut inner = self.inner.lock();
        inner.total_tokens += usage.total_tokens;
        inner.total_cost += usage.total_cost;
        inner
            .by_kind
            .entry(kind)
            .or_default()
            .insert(node_id.to_string(), usage.clone());
    }

    pub fn total_tokens(&self) -> u64 {
        self.inner.lock().total_tokens
    }

    pub fn total_cost(&self) -> f64 {
        self.inner.lock().total_cost
    }

    /// Usage entries for one kind.
    pub fn for_kind(&self, kind: NodeKind) -> BTreeMap<String, NodeUsage> {
        self.inner
            .lock()
            .by_kind
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        let mut node_metrics = BTreeMap::new();
        let mut summaries = BTreeMap::new();

        for (kind, nodes) in &inner.by_kind {
            let tokens: u64 = nodes.values().map(|u| u.total_tokens).sum();
            let cost: f64 = nodes.values().map(|u| u.total_cost).sum();
            let count = nodes.len();
            summaries.insert(
                kind.to_string(),
                KindSummary {
                    node_count: count,
                    total_tokens: tokens,
                    total_cost: cost,
                    avg_tokens_per_node: if count == 0 {
                        0.0
                    } else {
                        tokens as f64 / count as f64
                    },
                },
            );
            node_metrics.insert(kind.to_string(), nodes.clone());
        }

        MetricsSnapshot {
            total_tokens: inner.total_tokens,
            total_cost: inner.total_cost,
            node_metrics,
            summaries,
        }
    }
}

impl std::fmt::Debug for RunMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RunMetrics")
            .field("total_tokens", &inner.total_tokens)
            .field("total_cost", &inner.total_cost)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::NodeMetadata;
    use serde_json::json;

    fn result_with_usage(node_id: &str, tokens: u64, cost: f64) -> NodeResult {
        NodeResult::success(
            json!({}),
            NodeMetadata::begin(node_id, NodeKind::Llm).finish(),
        )
        .with_usage(NodeUsage {
            total_tokens: tokens,
            total_cost: cost,
            extra: Default::default(),
        })
    }

    #[test]
    fn update_accumulates_totals() {
        let metrics = RunMetrics::new();
        metrics.update(NodeKind::Llm, "a", &result_with_usage("a", 100, 0.5));
        metrics.update(NodeKind::Llm, "b", &result_with_usage("b", 50, 0.25));
        metrics.update(NodeKind::Tool, "c", &result_with_usage("c", 10, 0.0));

        assert_eq!(metrics.total_tokens(), 160);
        assert!((metrics.total_cost() - 0.75).abs() < f64::EPSILON);
        assert_eq!(metrics.for_kind(NodeKind::Llm).len(), 2);
        assert_eq!(metrics.for_kind(NodeKind::Tool).len(), 1);
        assert!(metrics.for_kind(NodeKind::Agent).is_empty());
    }

    #[test]
    fn result_without_usage_is_noop() {
        let metrics = RunMetrics::new();
        let result = NodeResult::success(
            json!({}),
            NodeMetadata::begin("a", NodeKind::Tool).finish(),
        );
        metrics.update(NodeKind::Tool, "a", &result);
        assert_eq!(metrics.total_tokens(), 0);
        assert!(metrics.for_kind(NodeKind::Tool).is_empty());
    }

    #[test]
    fn snapshot_summarizes_by_kind() {
        let metrics = RunMetrics::new();
        metrics.update(NodeKind::Llm, "a", &result_with_usage("a", 100, 0.5));
        metrics.update(NodeKind::Llm, "b", &result_with_usage("b", 200, 1.0));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_tokens, 300);
        let summary = &snapshot.summaries["llm"];
        assert_eq!(summary.node_count, 2);
        assert_eq!(summary.total_tokens, 300);
        assert!((summary.avg_tokens_per_node - 150.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.node_metrics["llm"]["a"].total_tokens, 100);
    }

    #[test]
    fn snapshot_serializes() {
        let metrics = RunMetrics::new();
        metrics.update(NodeKind::Llm, "a", &result_with_usage("a", 10, 0.1));
        let value = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(value["total_tokens"], json!(10));
        assert_eq!(value["node_metrics"]["llm"]["a"]["total_tokens"], json!(10));
    }
}
