//! Built-in executors
//!
//! The control-flow kinds (condition, loop, parallel, nested workflow) are
//! implemented here on top of the public run coordinator, together with a
//! mock LLM provider and a small set of demo/test tools. Real tool suites,
//! provider adapters and agent packages register their own executors.

pub mod condition;
pub mod iterate;
pub mod llm;
pub mod parallel;
pub mod subflow;
pub mod tools;

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::coordinator::{RunCoordinator, RunOptions};
use crate::executor::ExecutorFailure;
use crate::outcome::RunResult;
use crate::plan::{NodeConfig, NodeKind, Plan, BUILTIN_EXECUTOR};
use crate::registry::Registry;

pub use subflow::PlanLibrary;

/// Run a nested node list as its own plan under a fresh coordinator.
///
/// The sub-run inherits the registry and a child cancellation token; its
/// events and metrics stay interior to the outer node. Arguments are
/// owned so callers can fan sub-runs out concurrently.
pub(crate) async fn run_subplan(
    registry: Arc<Registry>,
    cancel: CancellationToken,
    sub_run_id: String,
    nodes: Vec<NodeConfig>,
    initial_context: Map<String, Value>,
) -> Result<RunResult, ExecutorFailure> {
    let plan = Arc::new(Plan::new(nodes).with_initial_context(initial_context));
    let coordinator = RunCoordinator::new(registry);
    let options = RunOptions::default()
        .with_run_id(sub_run_id)
        .with_cancel(cancel);
    coordinator
        .run(plan, options)
        .await
        .map_err(|err| ExecutorFailure::execution(err.to_string()))
}

/// Collapse a sub-run into a `{node_id: output}` mapping.
pub(crate) fn subplan_outputs(run: &RunResult) -> Value {
    let mut outputs = Map::new();
    for (node_id, result) in &run.outputs {
        outputs.insert(
            node_id.clone(),
            result.output.clone().unwrap_or(Value::Null),
        );
    }
    Value::Object(outputs)
}

/// Register every built-in executor.
///
/// Returns the plan library backing the nested-workflow executor so
/// callers can add sub-plans to it.
pub fn register_defaults(registry: &Registry) -> PlanLibrary {
    tools::register(registry);
    llm::register(registry);

    registry.register(
        NodeKind::Condition,
        BUILTIN_EXECUTOR,
        Arc::new(condition::ConditionExecutor),
    );
    registry.register(
        NodeKind::Loop,
        BUILTIN_EXECUTOR,
        Arc::new(iterate::LoopExecutor),
    );
    registry.register(
        NodeKind::Parallel,
        BUILTIN_EXECUTOR,
        Arc::new(parallel::ParallelExecutor),
    );

    let library = PlanLibrary::new();
    registry.register(
        NodeKind::Workflow,
        BUILTIN_EXECUTOR,
        Arc::new(subflow::WorkflowExecutor::new(library.clone())),
    );
    library
}

/// A fresh registry with the built-ins registered and a permissive policy.
pub fn default_registry() -> (Arc<Registry>, PlanLibrary) {
    let registry = Registry::new();
    let library = register_defaults(&registry);
    (Arc::new(registry), library)
}
