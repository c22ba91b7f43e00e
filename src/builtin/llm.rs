//! LLM executor and provider seam
//!
//! The `llm` node kind resolves a [`Provider`] by name, interpolates the
//! placeholder context into the prompt, and returns `{text}` plus usage.
//! Only the deterministic mock provider ships here; real adapters register
//! their own `Provider` behind an [`LlmExecutor`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::executor::{ExecOutcome, ExecutionEnv, Executor, ExecutorFailure};
use crate::outcome::{NodeMetadata, NodeResult, NodeUsage};
use crate::plan::{KindConfig, LlmConfig, NodeKind};
use crate::registry::Registry;

pub fn register(registry: &Registry) {
    registry.register(
        NodeKind::Llm,
        "mock",
        Arc::new(LlmExecutor::new(Arc::new(MockProvider))),
    );
}

/// Completion response from a provider
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub usage: NodeUsage,
}

/// Provider adapter seam
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn default_model(&self) -> &str;

    async fn infer(
        &self,
        prompt: &str,
        model: &str,
        config: &LlmConfig,
    ) -> Result<LlmResponse, ExecutorFailure>;
}

/// Deterministic provider for tests and offline runs
pub struct MockProvider;

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn default_model(&self) -> &str {
        "mock-small"
    }

    async fn infer(
        &self,
        prompt: &str,
        model: &str,
        _config: &LlmConfig,
    ) -> Result<LlmResponse, ExecutorFailure> {
        let text = format!("[{}] {}", model, prompt);
        // Rough 4-chars-per-token accounting keeps metrics exercised.
        let usage = NodeUsage {
            total_tokens: ((prompt.len() + text.len()) / 4) as u64,
            total_cost: 0.0,
            extra: Default::default(),
        };
        Ok(LlmResponse { text, usage })
    }
}

/// Executor wrapping one provider
pub struct LlmExecutor {
    provider: Arc<dyn Provider>,
}

impl LlmExecutor {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        LlmExecutor { provider }
    }
}

#[async_trait]
impl Executor for LlmExecutor {
    fn validate(&self, config: &crate::plan::NodeConfig) -> Result<(), ExecutorFailure> {
        match &config.spec {
            KindConfig::Llm { prompt, .. } if prompt.trim().is_empty() => Err(
                ExecutorFailure::validation("llm nodes require a non-empty prompt"),
            ),
            KindConfig::Llm { .. } => Ok(()),
            _ => Err(ExecutorFailure::validation(
                "llm executor received a non-llm node config",
            )),
        }
    }

    async fn execute(&self, env: ExecutionEnv<'_>) -> Result<ExecOutcome, ExecutorFailure> {
        let KindConfig::Llm {
            model,
            prompt,
            llm_config,
        } = &env.node.spec
        else {
            return Err(ExecutorFailure::validation(
                "llm executor received a non-llm node config",
            ));
        };

        let resolved = interpolate(prompt, env.inputs);
        let response = self
            .provider
            .infer(&resolved, model, llm_config)
            .await?;

        let meta = NodeMetadata::begin(&env.node.id, env.node.kind)
            .with_provider(Some(self.provider.name().to_string()));
        let result = NodeResult::success(json!({ "text": response.text }), meta)
            .with_usage(response.usage);
        Ok(ExecOutcome::Result(result))
    }

    fn description(&self) -> Option<&str> {
        Some("submits an interpolated prompt to an LLM provider")
    }
}

/// Replace `{placeholder}` references with context values. Unknown
/// placeholders are left untouched for the provider to see.
fn interpolate(template: &str, inputs: &serde_json::Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match inputs.get(key) {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(other) => out.push_str(&other.to_string()),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
