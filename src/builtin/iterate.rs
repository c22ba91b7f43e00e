//! Loop executor
//!
//! Resolves `items_source` to an iterable from the placeholder context,
//! binds `item_var` per element and runs the body once per item, either
//! sequentially or concurrently. `max_iterations` caps the item count.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::executor::{ExecOutcome, ExecutionEnv, Executor, ExecutorFailure};
use crate::path;
use crate::plan::KindConfig;

use super::{run_subplan, subplan_outputs};

pub struct LoopExecutor;

#[async_trait]
impl Executor for LoopExecutor {
    fn validate(&self, config: &crate::plan::NodeConfig) -> Result<(), ExecutorFailure> {
        match &config.spec {
            KindConfig::Loop { body, .. } if body.is_empty() => Err(
                ExecutorFailure::validation("loop nodes require a non-empty body"),
            ),
            KindConfig::Loop { .. } => Ok(()),
            _ => Err(ExecutorFailure::validation(
                "loop executor received a non-loop node config",
            )),
        }
    }

    async fn execute(&self, env: ExecutionEnv<'_>) -> Result<ExecOutcome, ExecutorFailure> {
        let KindConfig::Loop {
            items_source,
            item_var,
            body,
            parallel,
            max_iterations,
        } = &env.node.spec
        else {
            return Err(ExecutorFailure::validation(
                "loop executor received a non-loop node config",
            ));
        };

        let items = resolve_items(items_source, env.inputs)?;
        let cap = max_iterations.map(|m| m as usize).unwrap_or(usize::MAX);
        let items: Vec<Value> = items.into_iter().take(cap).collect();

        let mut iteration_contexts = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let mut scope = env.inputs.clone();
            scope.insert(item_var.clone(), item.clone());
            scope.insert("loop_index".to_string(), json!(index));
            iteration_contexts.push(scope);
        }

        let sub_run_id =
            |index: usize| format!("{}/{}[{}]", env.run_id, env.node.id, index);

        let results = if *parallel {
            let futures = iteration_contexts
                .into_iter()
                .enumerate()
                .map(|(index, scope)| {
                    run_subplan(
                        Arc::clone(env.registry),
                        env.cancel.child_token(),
                        sub_run_id(index),
                        body.clone(),
                        scope,
                    )
                });
            futures::future::join_all(futures).await
        } else {
            let mut collected = Vec::with_capacity(iteration_contexts.len());
            for (index, scope) in iteration_contexts.into_iter().enumerate() {
                collected.push(
                    run_subplan(
                        Arc::clone(env.registry),
                        env.cancel.child_token(),
                        sub_run_id(index),
                        body.clone(),
                        scope,
                    )
                    .await,
                );
            }
            collected
        };

        let mut outputs = Vec::with_capacity(results.len());
        for (index, run) in results.into_iter().enumerate() {
            let run = run?;
            if !run.success {
                return Err(ExecutorFailure::execution(format!(
                    "iteration {} failed: {}",
                    index,
                    run.error.as_deref().unwrap_or("unknown error")
                )));
            }
            outputs.push(subplan_outputs(&run));
        }

        Ok(ExecOutcome::Payload(json!({
            "count": outputs.len(),
            "results": outputs,
        })))
    }

    fn description(&self) -> Option<&str> {
        Some("runs the body once per resolved item")
    }
}

/// Resolve the items source against the placeholder context. The first
/// path segment names a placeholder; the rest traverses into it.
fn resolve_items(
    items_source: &str,
    inputs: &Map<String, Value>,
) -> Result<Vec<Value>, ExecutorFailure> {
    let (head, rest) = match items_source.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (items_source, None),
    };
    let root = inputs.get(head).ok_or_else(|| {
        ExecutorFailure::execution(format!("items source '{}' not in context", items_source))
    })?;
    let value = match rest {
        None => root.clone(),
        Some(rest) => path::resolve(root, rest).map_err(|err| {
            ExecutorFailure::execution(format!(
                "cannot resolve items source '{}': {}",
                items_source, err.reason
            ))
        })?,
    };
    match value {
        Value::Array(items) => Ok(items),
        other => Err(ExecutorFailure::execution(format!(
            "items source '{}' must be a list, got {}",
            items_source,
            type_label(&other)
        ))),
    }
}

fn type_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin;
    use crate::coordinator::{RunCoordinator, RunOptions};
    use crate::plan::{InputMapping, NodeConfig, NodeKind, Plan};
    use std::sync::Arc;

    fn loop_node(parallel: bool, max_iterations: Option<u32>) -> NodeConfig {
        // The body reads the bound item variable from its initial context.
        let body_node = crate::plan::tests::tool_node("upper", "uppercase", &[]);

        let mut node = crate::plan::tests::tool_node("each", "unused", &[]);
        node.kind = NodeKind::Loop;
        node.input_mappings.insert(
            "words".to_string(),
            InputMapping::literal(json!(["one", "two", "three"])),
        );
        node.spec = KindConfig::Loop {
            items_source: "words".to_string(),
            item_var: "word".to_string(),
            body: vec![body_node],
            parallel,
            max_iterations,
        };
        node
    }

    async fn run(node: NodeConfig) -> crate::outcome::RunResult {
        let (registry, _library) = builtin::default_registry();
        RunCoordinator::new(registry)
            .run(Arc::new(Plan::new(vec![node])), RunOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn sequential_loop_binds_item_var() {
        let result = run(loop_node(false, None)).await;
        assert!(result.success, "error: {:?}", result.error);

        let output = result.node("each").unwrap().output.clone().unwrap();
        assert_eq!(output["count"], json!(3));
        // The uppercase body saw `word` via its initial context.
        assert_eq!(output["results"][0]["upper"]["word"], json!("ONE"));
        assert_eq!(output["results"][2]["upper"]["word"], json!("THREE"));
    }

    #[tokio::test]
    async fn parallel_loop_preserves_item_order() {
        let result = run(loop_node(true, None)).await;
        assert!(result.success);

        let output = result.node("each").unwrap().output.clone().unwrap();
        assert_eq!(output["results"][0]["upper"]["word"], json!("ONE"));
        assert_eq!(output["results"][1]["upper"]["word"], json!("TWO"));
    }

    #[tokio::test]
    async fn max_iterations_caps_items() {
        let result = run(loop_node(false, Some(2))).await;
        assert!(result.success);
        let output = result.node("each").unwrap().output.clone().unwrap();
        assert_eq!(output["count"], json!(2));
    }

    #[tokio::test]
    async fn non_list_items_source_fails() {
        let mut node = loop_node(false, None);
        node.input_mappings
            .insert("words".to_string(), InputMapping::literal(json!("scalar")));

        let result = run(node).await;
        assert!(!result.success);
        let inner = result.node("each").unwrap();
        assert!(inner.error.as_deref().unwrap().contains("must be a list"));
    }
}
