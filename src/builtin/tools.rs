//! Built-in tool executors
//!
//! Deterministic tools for demos and tests: `echo`, `uppercase`, `concat`,
//! `fail`, `flaky`, `sleep`. Each receives its static `tool_args` merged
//! with the placeholder context (context wins on key collisions).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::error::ErrorKind;
use crate::executor::{ExecOutcome, ExecutionEnv, Executor, ExecutorFailure};
use crate::plan::{KindConfig, NodeKind};
use crate::registry::Registry;

pub fn register(registry: &Registry) {
    registry.register(NodeKind::Tool, "echo", Arc::new(EchoTool));
    registry.register(NodeKind::Tool, "uppercase", Arc::new(UppercaseTool));
    registry.register(NodeKind::Tool, "concat", Arc::new(ConcatTool));
    registry.register(NodeKind::Tool, "fail", Arc::new(FailTool));
    registry.register(NodeKind::Tool, "sleep", Arc::new(SleepTool));
    registry.register_factory(
        NodeKind::Tool,
        "flaky",
        Arc::new(|| Arc::new(FlakyTool::default()) as Arc<dyn Executor>),
    );
}

/// Static tool args merged with the placeholder context.
fn merged_args(env: &ExecutionEnv<'_>) -> Map<String, Value> {
    let mut merged = match &env.node.spec {
        KindConfig::Tool { tool_args, .. } => tool_args.clone(),
        _ => Map::new(),
    };
    for (key, value) in env.inputs {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Returns its merged arguments unchanged
pub struct EchoTool;

#[async_trait]
impl Executor for EchoTool {
    async fn execute(&self, env: ExecutionEnv<'_>) -> Result<ExecOutcome, ExecutorFailure> {
        Ok(ExecOutcome::Payload(Value::Object(merged_args(&env))))
    }

    fn description(&self) -> Option<&str> {
        Some("returns its arguments unchanged")
    }
}

/// Uppercases every string argument
pub struct UppercaseTool;

#[async_trait]
impl Executor for UppercaseTool {
    async fn execute(&self, env: ExecutionEnv<'_>) -> Result<ExecOutcome, ExecutorFailure> {
        let output: Map<String, Value> = merged_args(&env)
            .into_iter()
            .map(|(key, value)| match value {
                Value::String(s) => (key, Value::String(s.to_uppercase())),
                other => (key, other),
            })
            .collect();
        Ok(ExecOutcome::Payload(Value::Object(output)))
    }

    fn description(&self) -> Option<&str> {
        Some("uppercases every string argument")
    }
}

/// Joins string arguments in key order as `{text}`
pub struct ConcatTool;

#[async_trait]
impl Executor for ConcatTool {
    async fn execute(&self, env: ExecutionEnv<'_>) -> Result<ExecOutcome, ExecutorFailure> {
        let mut args = merged_args(&env);
        let separator = match args.remove("separator") {
            Some(Value::String(s)) => s,
            _ => " ".to_string(),
        };
        let parts: Vec<String> = args
            .into_iter()
            .filter_map(|(_, value)| match value {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect();
        Ok(ExecOutcome::Payload(json!({ "text": parts.join(&separator) })))
    }
}

/// Always fails; the message comes from the `message` argument
pub struct FailTool;

#[async_trait]
impl Executor for FailTool {
    async fn execute(&self, env: ExecutionEnv<'_>) -> Result<ExecOutcome, ExecutorFailure> {
        let args = merged_args(&env);
        let message = args
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("intentional failure");
        Err(ExecutorFailure::execution(message))
    }
}

/// Fails the first `fail_times` invocations (default 1), then echoes.
///
/// Registered through a factory so every registry gets a fresh counter.
#[derive(Default)]
pub struct FlakyTool {
    calls: AtomicU32,
}

#[async_trait]
impl Executor for FlakyTool {
    async fn execute(&self, env: ExecutionEnv<'_>) -> Result<ExecOutcome, ExecutorFailure> {
        let args = merged_args(&env);
        let fail_times = args
            .get("fail_times")
            .and_then(Value::as_u64)
            .unwrap_or(1) as u32;
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < fail_times {
            Err(ExecutorFailure::execution(format!(
                "transient failure (call {})",
                call
            )))
        } else {
            Ok(ExecOutcome::Payload(json!({ "calls": call + 1 })))
        }
    }
}

/// Sleeps for `seconds`, observing cancellation
pub struct SleepTool;

#[async_trait]
impl Executor for SleepTool {
    async fn execute(&self, env: ExecutionEnv<'_>) -> Result<ExecOutcome, ExecutorFailure> {
        let args = merged_args(&env);
        let seconds = args.get("seconds").and_then(Value::as_f64).unwrap_or(1.0);

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs_f64(seconds.max(0.0))) => {
                Ok(ExecOutcome::Payload(json!({ "slept": seconds })))
            }
            _ = env.cancel.cancelled() => {
                Err(ExecutorFailure::new(ErrorKind::Cancelled, "sleep cancelled"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::NodeConfig;
    use tokio_util::sync::CancellationToken;

    fn tool_node(tool: &str, args: Value) -> NodeConfig {
        let mut node = crate::plan::tests::tool_node("t", tool, &[]);
        node.spec = KindConfig::Tool {
            tool_name: tool.to_string(),
            tool_args: args.as_object().cloned().unwrap_or_default(),
        };
        node
    }

    async fn run_tool(
        executor: &dyn Executor,
        node: &NodeConfig,
        inputs: Value,
    ) -> Result<ExecOutcome, ExecutorFailure> {
        let registry = Arc::new(Registry::new());
        let inputs = inputs.as_object().cloned().unwrap_or_default();
        let env = ExecutionEnv {
            node,
            inputs: &inputs,
            cancel: CancellationToken::new(),
            registry: &registry,
            run_id: "test",
        };
        executor.execute(env).await
    }

    fn payload(outcome: ExecOutcome) -> Value {
        match outcome {
            ExecOutcome::Payload(value) => value,
            ExecOutcome::Result(_) => panic!("expected payload"),
        }
    }

    #[tokio::test]
    async fn echo_merges_args_and_context() {
        let node = tool_node("echo", json!({"a": 1, "b": "static"}));
        let out = payload(
            run_tool(&EchoTool, &node, json!({"b": "override", "c": 3}))
                .await
                .unwrap(),
        );
        assert_eq!(out, json!({"a": 1, "b": "override", "c": 3}));
    }

    #[tokio::test]
    async fn uppercase_only_touches_strings() {
        let node = tool_node("uppercase", json!({}));
        let out = payload(
            run_tool(&UppercaseTool, &node, json!({"s": "value", "n": 7}))
                .await
                .unwrap(),
        );
        assert_eq!(out, json!({"s": "VALUE", "n": 7}));
    }

    #[tokio::test]
    async fn concat_joins_in_key_order() {
        let node = tool_node("concat", json!({"separator": "-"}));
        let out = payload(
            run_tool(&ConcatTool, &node, json!({"a": "x", "b": "y", "c": 2}))
                .await
                .unwrap(),
        );
        assert_eq!(out, json!({"text": "x-y-2"}));
    }

    #[tokio::test]
    async fn fail_uses_message_argument() {
        let node = tool_node("fail", json!({"message": "boom"}));
        let err = run_tool(&FailTool, &node, json!({})).await.unwrap_err();
        assert_eq!(err.message, "boom");
        assert_eq!(err.kind, ErrorKind::ExecutorError);
    }

    #[tokio::test]
    async fn flaky_recovers_after_configured_failures() {
        let tool = FlakyTool::default();
        let node = tool_node("flaky", json!({"fail_times": 2}));

        assert!(run_tool(&tool, &node, json!({})).await.is_err());
        assert!(run_tool(&tool, &node, json!({})).await.is_err());
        let out = payload(run_tool(&tool, &node, json!({})).await.unwrap());
        assert_eq!(out, json!({"calls": 3}));
    }

    #[tokio::test]
    async fn sleep_observes_cancellation() {
        let node = tool_node("sleep", json!({"seconds": 30.0}));
        let registry = Arc::new(Registry::new());
        let inputs = Map::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let env = ExecutionEnv {
            node: &node,
            inputs: &inputs,
            cancel,
            registry: &registry,
            run_id: "test",
        };

        let err = SleepTool.execute(env).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }
}
