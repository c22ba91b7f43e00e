//! Condition executor
//!
//! Evaluates the node's expression in a restricted scope populated with
//! the placeholder context, then runs the taken branch as a sub-plan.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::executor::{ExecOutcome, ExecutionEnv, Executor, ExecutorFailure};
use crate::expr;
use crate::plan::KindConfig;

use super::{run_subplan, subplan_outputs};

pub struct ConditionExecutor;

#[async_trait]
impl Executor for ConditionExecutor {
    fn validate(&self, config: &crate::plan::NodeConfig) -> Result<(), ExecutorFailure> {
        match &config.spec {
            KindConfig::Condition { expression, .. } if expression.trim().is_empty() => Err(
                ExecutorFailure::validation("condition nodes require a non-empty expression"),
            ),
            KindConfig::Condition { .. } => Ok(()),
            _ => Err(ExecutorFailure::validation(
                "condition executor received a non-condition node config",
            )),
        }
    }

    async fn execute(&self, env: ExecutionEnv<'_>) -> Result<ExecOutcome, ExecutorFailure> {
        let KindConfig::Condition {
            expression,
            true_branch,
            false_branch,
        } = &env.node.spec
        else {
            return Err(ExecutorFailure::validation(
                "condition executor received a non-condition node config",
            ));
        };

        let taken = expr::evaluate(expression, env.inputs)
            .map_err(|err| ExecutorFailure::execution(format!("expression failed: {}", err)))?;
        let branch = if taken { true_branch } else { false_branch };
        let branch_name = if taken { "true" } else { "false" };

        let outputs = if branch.is_empty() {
            json!({})
        } else {
            let sub_run_id = format!("{}/{}.{}", env.run_id, env.node.id, branch_name);
            let run = run_subplan(
                Arc::clone(env.registry),
                env.cancel.child_token(),
                sub_run_id,
                branch.clone(),
                env.inputs.clone(),
            )
            .await?;
            if !run.success {
                return Err(ExecutorFailure::execution(format!(
                    "{} branch failed: {}",
                    branch_name,
                    run.error.as_deref().unwrap_or("unknown error")
                )));
            }
            subplan_outputs(&run)
        };

        Ok(ExecOutcome::Payload(json!({
            "result": taken,
            "branch": branch_name,
            "outputs": outputs,
        })))
    }

    fn description(&self) -> Option<&str> {
        Some("evaluates an expression and runs the taken branch as a sub-plan")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin;
    use crate::plan::{InputMapping, NodeConfig, NodeKind, Plan};
    use crate::coordinator::{RunCoordinator, RunOptions};
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn condition_node(expression: &str, true_branch: Vec<NodeConfig>) -> NodeConfig {
        let mut node = crate::plan::tests::tool_node("gate", "unused", &[]);
        node.kind = NodeKind::Condition;
        node.input_schema
            .insert("score".to_string(), crate::schema::parse_type("float").unwrap());
        node.output_schema
            .insert("result".to_string(), crate::schema::parse_type("bool").unwrap());
        node.input_mappings
            .insert("score".to_string(), InputMapping::literal(json!(0.9)));
        node.spec = KindConfig::Condition {
            expression: expression.to_string(),
            true_branch,
            false_branch: vec![],
        };
        node
    }

    fn branch_tool(id: &str) -> NodeConfig {
        let mut node = crate::plan::tests::tool_node(id, "echo", &[]);
        node.input_mappings
            .insert("ran".to_string(), InputMapping::literal(json!(true)));
        node
    }

    #[tokio::test]
    async fn true_branch_runs_and_outputs_project() {
        let (registry, _library) = builtin::default_registry();
        let plan = Plan::new(vec![condition_node("score > 0.5", vec![branch_tool("inner")])]);

        let result = RunCoordinator::new(registry)
            .run(Arc::new(plan), RunOptions::default())
            .await
            .unwrap();

        assert!(result.success, "error: {:?}", result.error);
        let output = result.node("gate").unwrap().output.clone().unwrap();
        assert_eq!(output["result"], json!(true));
        assert_eq!(output["branch"], json!("true"));
        assert_eq!(output["outputs"]["inner"]["ran"], json!(true));
    }

    #[tokio::test]
    async fn false_with_empty_branch_is_empty_outputs() {
        let (registry, _library) = builtin::default_registry();
        let plan = Plan::new(vec![condition_node("score > 0.95", vec![branch_tool("inner")])]);

        let result = RunCoordinator::new(registry)
            .run(Arc::new(plan), RunOptions::default())
            .await
            .unwrap();

        assert!(result.success);
        let output = result.node("gate").unwrap().output.clone().unwrap();
        assert_eq!(output["result"], json!(false));
        assert_eq!(output["branch"], json!("false"));
        assert_eq!(output["outputs"], Value::Object(Default::default()));
    }

    #[tokio::test]
    async fn bad_expression_fails_the_node() {
        let (registry, _library) = builtin::default_registry();
        let plan = Plan::new(vec![condition_node("ghost > 1", vec![])]);

        let result = RunCoordinator::new(registry)
            .run(Arc::new(plan), RunOptions::default())
            .await
            .unwrap();

        assert!(!result.success);
        let node = result.node("gate").unwrap();
        assert!(node.error.as_deref().unwrap().contains("expression failed"));
    }
}
