//! Level-based scheduler
//!
//! Executes a compiled plan level by level: nodes at the same topological
//! depth run concurrently, bounded by a semaphore; no node of level L+1
//! starts before every dispatched node of level L completes. Nodes whose
//! dependencies did not succeed are skipped with a synthetic
//! `DependencyFailed` result, and the failure policy decides between
//! levels whether the run keeps going.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, StrataError};
use crate::events::EventKind;
use crate::executor::NodeRunner;
use crate::graph::DependencyGraph;
use crate::metrics::RunMetrics;
use crate::outcome::{NodeMetadata, NodeResult};
use crate::plan::Plan;

/// What happens to the rest of the run after a node fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop after the first level that produced a failure
    Halt,
    /// Continue while at least one unstarted node does not transitively
    /// depend on a failed node
    #[default]
    ContinuePossible,
    /// Run every level regardless
    Always,
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "halt" => Ok(FailurePolicy::Halt),
            "continue_possible" | "continue-possible" => Ok(FailurePolicy::ContinuePossible),
            "always" => Ok(FailurePolicy::Always),
            other => Err(format!(
                "unknown failure policy '{}' (expected halt, continue_possible or always)",
                other
            )),
        }
    }
}

/// Scheduler output consumed by the run coordinator
#[derive(Debug)]
pub struct SchedulerOutcome {
    pub results: HashMap<String, NodeResult>,
    pub errors: Vec<String>,
    pub cancelled: bool,
}

/// Drives a plan through its topological levels
pub struct LevelScheduler {
    plan: Arc<Plan>,
    graph: DependencyGraph,
    runner: Arc<NodeRunner>,
    metrics: RunMetrics,
    max_parallel: usize,
    policy: FailurePolicy,
    cancel: CancellationToken,
}

impl LevelScheduler {
    pub fn new(
        plan: Arc<Plan>,
        graph: DependencyGraph,
        runner: Arc<NodeRunner>,
        metrics: RunMetrics,
        max_parallel: usize,
        policy: FailurePolicy,
        cancel: CancellationToken,
    ) -> Self {
        LevelScheduler {
            plan,
            graph,
            runner,
            metrics,
            max_parallel: max_parallel.max(1),
            policy,
            cancel,
        }
    }

    pub async fn run(&self) -> Result<SchedulerOutcome, StrataError> {
        // Advisory schema alignment pass before anything executes.
        for mismatch in DependencyGraph::schema_alignment(&self.plan) {
            warn!(
                node_id = %mismatch.node_id,
                placeholder = %mismatch.placeholder,
                "schema mismatch along dependency edge"
            );
            self.runner
                .events()
                .emit(EventKind::SchemaWarning {
                    node_id: mismatch.node_id,
                    placeholder: mismatch.placeholder,
                    expected: mismatch.expected,
                    found: mismatch.found,
                })
                .await;
        }

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut results: HashMap<String, NodeResult> = HashMap::new();
        let mut errors: Vec<String> = Vec::new();
        let mut cancelled = false;

        let levels = self.graph.topological_levels();
        info!(
            nodes = self.graph.node_count(),
            levels = levels.len(),
            max_parallel = self.max_parallel,
            "starting level execution"
        );

        for (level_index, level) in levels.iter().enumerate() {
            if self.cancel.is_cancelled() {
                cancelled = true;
                self.cancel_remaining(&levels[level_index..], &mut results).await;
                errors.push("run cancelled".to_string());
                break;
            }

            // Eligibility: every dependency present and successful.
            let mut eligible: Vec<String> = Vec::new();
            for node_id in level {
                let node = self
                    .plan
                    .get(node_id)
                    .ok_or_else(|| StrataError::ConfigMissing(node_id.clone()))?;
                let deps_ready = node
                    .dependencies
                    .iter()
                    .all(|dep| results.get(dep).map(|r| r.success).unwrap_or(false));
                if deps_ready {
                    eligible.push(node_id.clone());
                } else {
                    debug!(node_id = %node_id, "skipping node with failed dependencies");
                    let result = self.skip(node, ErrorKind::DependencyFailed).await;
                    results.insert(node_id.clone(), result);
                }
            }

            // Dispatch the level, bounded by the semaphore; join_all is the
            // level barrier.
            let dispatched = eligible.into_iter().map(|node_id| {
                let semaphore = Arc::clone(&semaphore);
                let runner = Arc::clone(&self.runner);
                async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .expect("scheduler semaphore closed");
                    let outcome = runner.execute_node(&node_id).await;
                    (node_id, outcome)
                }
            });
            let completed = futures::future::join_all(dispatched).await;

            for (node_id, outcome) in completed {
                let result = outcome?;
                if !result.success {
                    errors.push(format!(
                        "node '{}' failed: {}",
                        node_id,
                        result.error.as_deref().unwrap_or("unknown error")
                    ));
                }
                if let Some(node) = self.plan.get(&node_id) {
                    self.metrics.update(node.kind, &node_id, &result);
                }
                results.insert(node_id, result);
            }

            if !errors.is_empty() && !self.should_continue(&results) {
                info!(level = level_index, "stopping after failed level");
                break;
            }
        }

        Ok(SchedulerOutcome {
            results,
            errors,
            cancelled,
        })
    }

    /// Synthetic failure for a node the scheduler never started.
    async fn skip(&self, node: &crate::plan::NodeConfig, kind: ErrorKind) -> NodeResult {
        let message = match kind {
            ErrorKind::Cancelled => format!("node '{}' skipped: run cancelled", node.id),
            _ => format!(
                "node '{}' skipped: one or more dependencies failed or were skipped",
                node.id
            ),
        };
        let result = NodeResult::failure(
            kind,
            message.clone(),
            NodeMetadata::begin(&node.id, node.kind).finish(),
        );
        self.runner
            .events()
            .emit(EventKind::NodeError {
                node_id: node.id.clone(),
                error: message,
                error_kind: kind,
                duration_ms: 0,
            })
            .await;
        self.runner.context().put_result(&node.id, result.clone());
        result
    }

    /// Mark every not-yet-recorded node in the given levels as cancelled.
    async fn cancel_remaining(
        &self,
        levels: &[Vec<String>],
        results: &mut HashMap<String, NodeResult>,
    ) {
        for level in levels {
            for node_id in level {
                if results.contains_key(node_id) {
                    continue;
                }
                if let Some(node) = self.plan.get(node_id) {
                    let result = self.skip(node, ErrorKind::Cancelled).await;
                    results.insert(node_id.clone(), result);
                }
            }
        }
    }

    /// Consult the failure policy between levels.
    fn should_continue(&self, results: &HashMap<String, NodeResult>) -> bool {
        match self.policy {
            FailurePolicy::Halt => false,
            FailurePolicy::Always => true,
            FailurePolicy::ContinuePossible => {
                let failed: HashSet<&str> = results
                    .iter()
                    .filter(|(_, r)| !r.success)
                    .map(|(id, _)| id.as_str())
                    .collect();

                for node_id in self.plan.node_ids() {
                    if results.contains_key(node_id) {
                        continue;
                    }
                    if !self.graph.depends_transitively_on(node_id, &failed) {
                        debug!(
                            node_id = %node_id,
                            "continuing: node can still execute independently"
                        );
                        return true;
                    }
                }
                warn!("stopping: all remaining nodes depend on failed nodes");
                false
            }
        }
    }
}
