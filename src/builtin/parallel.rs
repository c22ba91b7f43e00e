//! Parallel executor
//!
//! Runs each branch as an independent sub-plan, concurrently, bounded by
//! `max_concurrency`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Semaphore;

use crate::executor::{ExecOutcome, ExecutionEnv, Executor, ExecutorFailure};
use crate::plan::KindConfig;

use super::{run_subplan, subplan_outputs};

pub struct ParallelExecutor;

#[async_trait]
impl Executor for ParallelExecutor {
    fn validate(&self, config: &crate::plan::NodeConfig) -> Result<(), ExecutorFailure> {
        match &config.spec {
            KindConfig::Parallel { branches, .. } if branches.is_empty() => Err(
                ExecutorFailure::validation("parallel nodes require at least one branch"),
            ),
            KindConfig::Parallel { .. } => Ok(()),
            _ => Err(ExecutorFailure::validation(
                "parallel executor received a non-parallel node config",
            )),
        }
    }

    async fn execute(&self, env: ExecutionEnv<'_>) -> Result<ExecOutcome, ExecutorFailure> {
        let KindConfig::Parallel {
            branches,
            max_concurrency,
        } = &env.node.spec
        else {
            return Err(ExecutorFailure::validation(
                "parallel executor received a non-parallel node config",
            ));
        };

        let semaphore = Arc::new(Semaphore::new((*max_concurrency).max(1)));
        let futures = branches.iter().enumerate().map(|(index, branch)| {
            let semaphore = Arc::clone(&semaphore);
            let registry = Arc::clone(env.registry);
            let cancel = env.cancel.child_token();
            let sub_run_id = format!("{}/{}[{}]", env.run_id, env.node.id, index);
            let branch = branch.clone();
            let inputs = env.inputs.clone();
            async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("parallel semaphore closed");
                run_subplan(registry, cancel, sub_run_id, branch, inputs).await
            }
        });
        let runs = futures::future::join_all(futures).await;

        let mut outputs = Vec::with_capacity(runs.len());
        for (index, run) in runs.into_iter().enumerate() {
            let run = run?;
            if !run.success {
                return Err(ExecutorFailure::execution(format!(
                    "branch {} failed: {}",
                    index,
                    run.error.as_deref().unwrap_or("unknown error")
                )));
            }
            outputs.push(subplan_outputs(&run));
        }

        Ok(ExecOutcome::Payload(json!({ "branches": outputs })))
    }

    fn description(&self) -> Option<&str> {
        Some("runs each branch as an independent concurrent sub-plan")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin;
    use crate::coordinator::{RunCoordinator, RunOptions};
    use crate::plan::{InputMapping, NodeConfig, NodeKind, Plan};
    use std::sync::Arc;

    fn parallel_node(branches: Vec<Vec<NodeConfig>>) -> NodeConfig {
        let mut node = crate::plan::tests::tool_node("fan", "unused", &[]);
        node.kind = NodeKind::Parallel;
        node.spec = KindConfig::Parallel {
            branches,
            max_concurrency: 2,
        };
        node
    }

    fn branch_tool(id: &str, value: &str) -> NodeConfig {
        let mut node = crate::plan::tests::tool_node(id, "echo", &[]);
        node.input_mappings
            .insert("v".to_string(), InputMapping::literal(json!(value)));
        node
    }

    #[tokio::test]
    async fn branches_run_and_project_in_order() {
        let (registry, _library) = builtin::default_registry();
        let plan = Plan::new(vec![parallel_node(vec![
            vec![branch_tool("left", "first")],
            vec![branch_tool("right", "second")],
        ])]);

        let result = RunCoordinator::new(registry)
            .run(Arc::new(plan), RunOptions::default())
            .await
            .unwrap();

        assert!(result.success, "error: {:?}", result.error);
        let output = result.node("fan").unwrap().output.clone().unwrap();
        assert_eq!(output["branches"][0]["left"]["v"], json!("first"));
        assert_eq!(output["branches"][1]["right"]["v"], json!("second"));
    }

    #[tokio::test]
    async fn failing_branch_fails_the_node() {
        let (registry, _library) = builtin::default_registry();
        let plan = Plan::new(vec![parallel_node(vec![
            vec![branch_tool("ok", "fine")],
            vec![crate::plan::tests::tool_node("bad", "fail", &[])],
        ])]);

        let result = RunCoordinator::new(registry)
            .run(Arc::new(plan), RunOptions::default())
            .await
            .unwrap();

        assert!(!result.success);
        let node = result.node("fan").unwrap();
        assert!(node.error.as_deref().unwrap().contains("branch 1 failed"));
    }
}
