//! # Strata
//!
//! Workflow orchestration runtime: executes a user-declared DAG of
//! heterogeneous computation nodes against a set of registered executors.
//!
//! ## Overview
//!
//! A run goes through three subsystems:
//!
//! 1. **Validation & compilation** — an untyped [`Blueprint`] is checked
//!    and compiled into a typed [`Plan`] ([`Validator`]), with every issue
//!    accumulated rather than failing fast.
//! 2. **Graph & scheduling** — the [`DependencyGraph`] computes topological
//!    levels and rejects cycles; the level scheduler runs each level with
//!    bounded parallelism and applies the [`FailurePolicy`] between levels.
//! 3. **Node execution** — per node: context assembly from input mappings,
//!    cache lookup, retry/backoff, timeout enforcement, result
//!    normalization and output schema validation.
//!
//! ## Node kinds
//!
//! | Kind | Executor resolution |
//! |------|---------------------|
//! | `tool` | registry, by `tool_name` |
//! | `llm` | registry, by `llm_config.provider` |
//! | `agent` | registry, by `package` |
//! | `condition` / `loop` / `parallel` / `workflow` | built-in control flow |
//! | `code` | registry, by `language` (sandbox adapters) |
//! | `human` / `monitor` / `recursive` / `swarm` | registry, opaque |
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata::{builtin, Blueprint, RunCoordinator, RunOptions, Validator};
//!
//! let blueprint = Blueprint::from_file("pipeline.yaml")?;
//! let report = Validator::new().validate(&blueprint)?;
//!
//! let (registry, _workflows) = builtin::default_registry();
//! let coordinator = RunCoordinator::new(registry);
//! let result = coordinator
//!     .run(Arc::new(report.plan), RunOptions::default())
//!     .await?;
//!
//! println!("run {}: success = {}", result.run_id, result.success);
//! # Ok::<(), strata::StrataError>(())
//! ```
//!
//! ## Modules
//!
//! - [`blueprint`] / [`validate`] — untyped input format and the validator
//! - [`plan`] / [`graph`] — typed plan model and the dependency graph
//! - [`executor`] / [`scheduler`] / [`coordinator`] — the execution core
//! - [`context`] / [`cache`] / [`artifact`] — run-scoped and process state
//! - [`events`] / [`metrics`] — lifecycle events and usage accounting
//! - [`registry`] / [`builtin`] — executor resolution and the built-ins

pub mod artifact;
pub mod blueprint;
pub mod builtin;
pub mod cache;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod executor;
pub mod expr;
pub mod graph;
pub mod metrics;
pub mod outcome;
pub mod path;
pub mod plan;
pub mod registry;
pub mod scheduler;
pub mod schema;
pub mod validate;

pub use artifact::{ArtifactStore, MemoryArtifactStore};
pub use blueprint::{Blueprint, NodeSpec, SUPPORTED_SCHEMA_VERSION};
pub use builtin::PlanLibrary;
pub use cache::ResultCache;
pub use context::ContextStore;
pub use coordinator::{RunCoordinator, RunOptions};
pub use error::{ErrorKind, StrataError};
pub use events::{Event, EventBus, EventKind, EventLog, Observer};
pub use executor::{ExecOutcome, ExecutionEnv, Executor, ExecutorFailure};
pub use graph::DependencyGraph;
pub use metrics::{MetricsSnapshot, RunMetrics};
pub use outcome::{NodeMetadata, NodeResult, NodeUsage, RunResult};
pub use plan::{InputMapping, KindConfig, LlmConfig, NodeConfig, NodeKind, Plan};
pub use registry::{AccessPolicy, Registry, RegistryError};
pub use scheduler::FailurePolicy;
pub use validate::{ValidationError, ValidationIssue, ValidationReport, Validator};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn yaml_blueprint_compiles() {
        let yaml = r#"
schema_version: "1.1.0"
nodes:
  - id: fetch
    kind: tool
    tool_name: echo
    tool_args: { topic: "workflows" }
    input_schema: { topic: str }
    output_schema: { topic: str }
  - id: summarize
    kind: llm
    model: mock-small
    prompt: "Summarize {topic}"
    dependencies: [fetch]
    input_mappings:
      topic: { source_node_id: fetch, source_output_path: topic }
"#;
        let blueprint = Blueprint::from_str(yaml).unwrap();
        let report = Validator::new().validate(&blueprint).unwrap();
        assert_eq!(report.plan.len(), 2);
        // The llm node picked up the defaulted output schema.
        assert_eq!(report.warnings.len(), 1);
    }

    #[tokio::test]
    async fn compiled_blueprint_runs_end_to_end() {
        let yaml = r#"
nodes:
  - id: fetch
    kind: tool
    tool_name: echo
    tool_args: { topic: "workflows" }
    input_schema: { topic: str }
    output_schema: { topic: str }
  - id: summarize
    kind: llm
    model: mock-small
    prompt: "Summarize {topic}"
    dependencies: [fetch]
    input_mappings:
      topic: { source_node_id: fetch, source_output_path: topic }
"#;
        let blueprint = Blueprint::from_str(yaml).unwrap();
        let report = Validator::new().validate(&blueprint).unwrap();

        let (registry, _workflows) = builtin::default_registry();
        let result = RunCoordinator::new(registry)
            .run(Arc::new(report.plan), RunOptions::default())
            .await
            .unwrap();

        assert!(result.success, "error: {:?}", result.error);
        assert_eq!(
            result.node("summarize").unwrap().output_field("text"),
            Some(&serde_json::json!("[mock-small] Summarize workflows"))
        );
        assert!(result.token_stats.total_tokens > 0);
    }
}
