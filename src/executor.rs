//! Per-node execution machinery
//!
//! [`Executor`] is the seam the registry hands out: one implementation per
//! `(kind, name)`. [`NodeRunner`] runs exactly one node against the rest of
//! the world: context assembly, cache keying, retry/backoff, timeout
//! enforcement, result normalization, output validation and structured
//! failure reporting. Failures come back inside the `NodeResult`; the only
//! raised errors are a missing config and HALT-policy fatalities.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::artifact::{artifact_stub, ArtifactStore, LARGE_OUTPUT_THRESHOLD};
use crate::cache::{fingerprint, ResultCache};
use crate::context::ContextStore;
use crate::error::{ErrorKind, StrataError};
use crate::events::{EventBus, EventKind};
use crate::outcome::{NodeMetadata, NodeResult, NodeUsage};
use crate::path;
use crate::plan::{InputMapping, NodeConfig, Plan};
use crate::registry::{Registry, RegistryError};
use crate::scheduler::FailurePolicy;

/// What an executor hands back: a full result, or a bare payload the
/// runner normalizes
#[derive(Debug)]
pub enum ExecOutcome {
    Result(NodeResult),
    Payload(Value),
}

/// Executor-originated failure (the exception analog)
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ExecutorFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl ExecutorFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ExecutorFailure {
            kind,
            message: message.into(),
        }
    }

    /// Catch-all runtime failure; retried when the node allows retries.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExecutorError, message)
    }

    /// Configuration rejection from a validate hook.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }
}

/// Everything an executor sees for one invocation
pub struct ExecutionEnv<'a> {
    pub node: &'a NodeConfig,
    /// Assembled placeholder context; executors must not mutate upstream
    /// state through it
    pub inputs: &'a Map<String, Value>,
    /// Cooperative cancellation signal; executors are expected to observe
    /// it and return promptly
    pub cancel: CancellationToken,
    /// For executors that run sub-plans (condition, loop, parallel,
    /// nested workflow)
    pub registry: &'a Arc<Registry>,
    pub run_id: &'a str,
}

/// A registered node implementation
#[async_trait]
pub trait Executor: Send + Sync {
    /// Idempotent configuration check, invoked before every execution.
    fn validate(&self, _config: &NodeConfig) -> Result<(), ExecutorFailure> {
        Ok(())
    }

    async fn execute(&self, env: ExecutionEnv<'_>) -> Result<ExecOutcome, ExecutorFailure>;

    fn description(&self) -> Option<&str> {
        None
    }
}

/// Runs single nodes for the level scheduler
pub struct NodeRunner {
    plan: Arc<Plan>,
    registry: Arc<Registry>,
    context: ContextStore,
    cache: Option<ResultCache>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    events: EventBus,
    run_id: Arc<str>,
    policy: FailurePolicy,
    validate_outputs: bool,
    cancel: CancellationToken,
}

impl NodeRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plan: Arc<Plan>,
        registry: Arc<Registry>,
        context: ContextStore,
        cache: Option<ResultCache>,
        artifacts: Option<Arc<dyn ArtifactStore>>,
        events: EventBus,
        run_id: Arc<str>,
        policy: FailurePolicy,
        validate_outputs: bool,
        cancel: CancellationToken,
    ) -> Self {
        NodeRunner {
            plan,
            registry,
            context,
            cache,
            artifacts,
            events,
            run_id,
            policy,
            validate_outputs,
            cancel,
        }
    }

    pub fn context(&self) -> &ContextStore {
        &self.context
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Execute one node to completion.
    ///
    /// Never raises for node-level failures; those come back as failed
    /// results. Raises only for a missing config or, under HALT, for
    /// systemic failures (registry miss, validate rejection).
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn execute_node(&self, node_id: &str) -> Result<NodeResult, StrataError> {
        let node = self
            .plan
            .get(node_id)
            .ok_or_else(|| StrataError::ConfigMissing(node_id.to_string()))?;

        let meta = NodeMetadata::begin(&node.id, node.kind)
            .with_provider(node.provider_name().map(str::to_string));

        // Resolve the executor up front; a miss is systemic.
        let executor = match self.registry.resolve(node.kind, node.executor_name()) {
            Ok(executor) => executor,
            Err(err) => {
                let kind = match &err {
                    RegistryError::Miss { .. } => ErrorKind::RegistryMiss,
                    RegistryError::Denied { .. } => ErrorKind::PolicyDenied,
                };
                if self.policy == FailurePolicy::Halt {
                    return Err(err.into());
                }
                let result = NodeResult::failure(kind, err.to_string(), meta.finish());
                return Ok(self.finalize(node, result).await);
            }
        };

        // Pre-validate via the executor's hook.
        if let Err(failure) = executor.validate(node) {
            if self.policy == FailurePolicy::Halt {
                return Err(StrataError::Halted {
                    node_id: node.id.clone(),
                    message: failure.message,
                });
            }
            let result = NodeResult::failure(
                ErrorKind::ValidationError,
                format!("validation failed for node '{}': {}", node.id, failure.message),
                meta.finish(),
            );
            return Ok(self.finalize(node, result).await);
        }

        // Assemble the placeholder context.
        let (inputs, context_errors, all_unready) = self.build_inputs(node);
        self.context
            .put_input(&node.id, Value::Object(inputs.clone()));

        if !context_errors.is_empty() {
            let kind = if all_unready {
                ErrorKind::DependencyUnready
            } else {
                ErrorKind::ContextValidationError
            };
            let result = NodeResult::failure(
                kind,
                format!(
                    "node '{}' context validation failed: {}",
                    node.id,
                    context_errors.join("; ")
                ),
                meta.finish(),
            );
            return Ok(self.finalize(node, result).await);
        }

        // Cache lookup. Hash failures degrade to a cache miss.
        let cache_key = match (&self.cache, node.use_cache) {
            (Some(_), true) => fingerprint(node, &inputs),
            _ => None,
        };
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(mut hit) = cache.get(key) {
                debug!(node_id = %node.id, "cache hit");
                self.events
                    .emit(EventKind::CacheHit {
                        node_id: node.id.clone(),
                        fingerprint: key.clone(),
                    })
                    .await;
                self.events
                    .emit(EventKind::NodeStart {
                        node_id: node.id.clone(),
                        cached: true,
                    })
                    .await;
                hit.metadata = meta.finish().with_cached(true).with_attempts(0);
                self.events
                    .emit(EventKind::NodeEnd {
                        node_id: node.id.clone(),
                        cached: true,
                        duration_ms: (hit.metadata.duration_seconds * 1000.0) as u64,
                        attempts: 0,
                    })
                    .await;
                self.persist(node, &hit);
                return Ok(hit);
            }
        }

        self.events
            .emit(EventKind::NodeStart {
                node_id: node.id.clone(),
                cached: false,
            })
            .await;

        // Retry loop: `retries = k` permits k + 1 invocations.
        let mut attempt: u32 = 0;
        let attempt_result = loop {
            if self.cancel.is_cancelled() {
                break Err(ExecutorFailure::new(ErrorKind::Cancelled, "run cancelled"));
            }

            let outcome = self.invoke(&*executor, node, &inputs).await;

            match outcome {
                Ok(result) => break Ok(result),
                Err(failure) if attempt < node.retries && failure.kind.is_retryable() => {
                    debug!(
                        node_id = %node.id,
                        attempt,
                        error = %failure.message,
                        "attempt failed; retrying"
                    );
                    if node.backoff_seconds > 0.0 {
                        let wait = node.backoff_seconds * 2f64.powi(attempt as i32);
                        tokio::time::sleep(Duration::from_secs_f64(wait)).await;
                    }
                    attempt += 1;
                }
                Err(failure) => break Err(failure),
            }
        };

        let meta = meta.finish().with_attempts(attempt);
        let mut result = match attempt_result {
            Ok(mut result) => {
                // The runner's metadata is authoritative; keep executor usage.
                let error_kind = if result.success {
                    None
                } else {
                    Some(result.error_kind().unwrap_or(ErrorKind::ExecutorError))
                };
                result.metadata = match error_kind {
                    Some(kind) => meta.with_error_kind(kind),
                    None => meta,
                };
                result
            }
            Err(failure) => {
                // Only retryable kinds actually consumed the retry budget.
                let message = if failure.kind.is_retryable() && node.retries > 0 {
                    format!(
                        "retry limit exceeded ({}) - last error: {}",
                        node.retries, failure.message
                    )
                } else {
                    failure.message
                };
                NodeResult::failure(failure.kind, message, meta)
            }
        };

        if result.success {
            self.repair_string_output(node, &mut result);
            self.apply_output_mappings(node, &mut result);

            if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
                cache.put(key, result.clone());
            }

            self.validate_output(node, &mut result);
        }

        Ok(self.finalize(node, result).await)
    }

    /// One executor invocation under the node's timeout.
    async fn invoke(
        &self,
        executor: &dyn Executor,
        node: &NodeConfig,
        inputs: &Map<String, Value>,
    ) -> Result<NodeResult, ExecutorFailure> {
        let attempt_token = self.cancel.child_token();
        let env = ExecutionEnv {
            node,
            inputs,
            cancel: attempt_token.clone(),
            registry: &self.registry,
            run_id: self.run_id.as_ref(),
        };

        let outcome = match node.timeout_seconds {
            Some(timeout_s) => {
                let deadline = Duration::from_secs_f64(timeout_s.max(0.0));
                match tokio::time::timeout(deadline, executor.execute(env)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        // The in-flight future is dropped; the child token
                        // tells cooperative executors to stop side work.
                        attempt_token.cancel();
                        return Err(ExecutorFailure::new(
                            ErrorKind::Timeout,
                            format!("node '{}' timed out after {}s", node.id, timeout_s),
                        ));
                    }
                }
            }
            None => executor.execute(env).await,
        };

        outcome.and_then(|o| self.normalize(node, o))
    }

    /// Build the placeholder context from input mappings and, for root
    /// nodes, the initial context. Returns accumulated errors and whether
    /// every error was an unready dependency.
    fn build_inputs(&self, node: &NodeConfig) -> (Map<String, Value>, Vec<String>, bool) {
        let mut inputs = Map::new();
        let mut errors = Vec::new();
        let mut unready = 0usize;

        for (placeholder, mapping) in &node.input_mappings {
            match mapping {
                InputMapping::Literal(value) => {
                    inputs.insert(placeholder.clone(), value.clone());
                }
                InputMapping::Reference {
                    source_node_id,
                    source_output_path,
                } => match self.context.result(source_node_id) {
                    Some(dep) if dep.success => {
                        let output = dep.output.unwrap_or(Value::Null);
                        match path::resolve(&output, source_output_path) {
                            Ok(value) => {
                                inputs.insert(placeholder.clone(), value);
                            }
                            Err(miss) => errors.push(format!(
                                "failed to resolve path '{}' in dependency '{}': {}",
                                source_output_path, source_node_id, miss.reason
                            )),
                        }
                    }
                    _ => {
                        unready += 1;
                        errors.push(format!(
                            "dependency '{}' failed or did not run",
                            source_node_id
                        ));
                    }
                },
            }
        }

        if node.dependencies.is_empty() {
            for (key, value) in &self.plan.initial_context {
                inputs.insert(key.clone(), value.clone());
            }
        }

        let all_unready = !errors.is_empty() && unready == errors.len();
        (inputs, errors, all_unready)
    }

    /// Normalize whatever the executor returned into a NodeResult.
    fn normalize(
        &self,
        node: &NodeConfig,
        outcome: ExecOutcome,
    ) -> Result<NodeResult, ExecutorFailure> {
        match outcome {
            ExecOutcome::Result(result) => Ok(result),
            ExecOutcome::Payload(Value::Object(map)) => {
                let is_envelope =
                    map.contains_key("success") || map.contains_key("output") || map.contains_key("error");
                let meta = NodeMetadata::begin(&node.id, node.kind);
                if is_envelope {
                    let success = map.get("success").and_then(Value::as_bool).unwrap_or(true);
                    let usage = map
                        .get("usage")
                        .and_then(|u| serde_json::from_value::<NodeUsage>(u.clone()).ok());
                    if success {
                        let output = map.get("output").cloned().unwrap_or(Value::Null);
                        let mut result = NodeResult::success(output, meta);
                        if let Some(usage) = usage {
                            result = result.with_usage(usage);
                        }
                        Ok(result)
                    } else {
                        let error = map
                            .get("error")
                            .and_then(Value::as_str)
                            .unwrap_or("executor reported failure")
                            .to_string();
                        Ok(NodeResult::failure(ErrorKind::ExecutorError, error, meta))
                    }
                } else {
                    Ok(NodeResult::success(Value::Object(map), meta))
                }
            }
            ExecOutcome::Payload(other) => Err(ExecutorFailure::new(
                ErrorKind::UnexpectedResultType,
                format!(
                    "unexpected result type from node '{}': expected a mapping, got {}",
                    node.id,
                    json_type(&other)
                ),
            )),
        }
    }

    /// Opportunistic JSON repair: an LLM that returned fenced JSON text
    /// under a declared output schema gets one parse attempt.
    fn repair_string_output(&self, node: &NodeConfig, result: &mut NodeResult) {
        if node.output_schema.is_empty() {
            return;
        }
        let Some(Value::String(raw)) = &result.output else {
            return;
        };
        if let Some(repaired) = parse_fenced_json(raw) {
            debug!(node_id = %node.id, "repaired string output into JSON");
            result.output = Some(repaired);
        }
        // Leave unrepairable strings unchanged; output validation reports them.
    }

    /// Bind output aliases. Path misses are expected and skipped.
    fn apply_output_mappings(&self, node: &NodeConfig, result: &mut NodeResult) {
        if node.output_mappings.is_empty() {
            return;
        }
        let Some(Value::Object(output)) = &mut result.output else {
            return;
        };
        let mut resolved: Vec<(String, Value)> = Vec::new();
        for (alias, alias_path) in &node.output_mappings {
            if let Ok(value) = path::resolve(&Value::Object(output.clone()), alias_path) {
                resolved.push((alias.clone(), value));
            }
        }
        for (alias, value) in resolved {
            output.insert(alias, value);
        }
    }

    /// Coerce the output against the declared schema; a mismatch converts
    /// the result to failure.
    fn validate_output(&self, node: &NodeConfig, result: &mut NodeResult) {
        if !self.validate_outputs || node.output_schema.is_empty() || !result.success {
            return;
        }

        let verdict: Result<(), String> = match &mut result.output {
            Some(Value::Object(output)) => {
                let mut verdict = Ok(());
                for (field, expected) in &node.output_schema {
                    match output.get(field) {
                        None => {
                            verdict = Err(format!("missing declared field '{}'", field));
                            break;
                        }
                        Some(value) => match expected.coerce(value) {
                            Ok(coerced) => {
                                output.insert(field.clone(), coerced);
                            }
                            Err(err) => {
                                verdict = Err(format!("field '{}': {}", field, err));
                                break;
                            }
                        },
                    }
                }
                verdict
            }
            _ => Err("output must be a mapping".to_string()),
        };

        if let Err(message) = verdict {
            let meta = result
                .metadata
                .clone()
                .with_error_kind(ErrorKind::SchemaValidationError);
            *result = NodeResult::failure(
                ErrorKind::SchemaValidationError,
                format!("output validation failed for node '{}': {}", node.id, message),
                meta,
            );
        }
    }

    /// Persist the result to the context store, offloading oversized
    /// outputs to the artifact store first (best-effort).
    fn persist(&self, node: &NodeConfig, result: &NodeResult) {
        let mut stored = result.clone();
        if let (Some(store), Some(output)) = (&self.artifacts, &stored.output) {
            if stored.success {
                let size = serde_json::to_string(output).map(|s| s.len()).unwrap_or(0);
                if size > LARGE_OUTPUT_THRESHOLD {
                    match store.put(output) {
                        Ok(artifact_ref) => {
                            debug!(
                                node_id = %node.id,
                                size,
                                artifact_ref = %artifact_ref,
                                "offloaded large output"
                            );
                            stored.output = Some(artifact_stub(&artifact_ref));
                        }
                        Err(err) => {
                            warn!(node_id = %node.id, error = %err, "artifact offload failed");
                        }
                    }
                }
            }
        }
        self.context.put_result(&node.id, stored);
    }

    /// Emit the terminal event and write the result to the context store.
    async fn finalize(&self, node: &NodeConfig, result: NodeResult) -> NodeResult {
        let duration_ms = (result.metadata.duration_seconds * 1000.0) as u64;
        if result.success {
            self.events
                .emit(EventKind::NodeEnd {
                    node_id: node.id.clone(),
                    cached: false,
                    duration_ms,
                    attempts: result.metadata.attempts,
                })
                .await;
        } else {
            self.events
                .emit(EventKind::NodeError {
                    node_id: node.id.clone(),
                    error: result.error.clone().unwrap_or_default(),
                    error_kind: result.error_kind().unwrap_or(ErrorKind::ExecutorError),
                    duration_ms,
                })
                .await;
        }
        self.persist(node, &result);
        result
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Strip a fenced code block and parse the remainder as JSON.
fn parse_fenced_json(raw: &str) -> Option<Value> {
    let mut text = raw.trim();
    if text.starts_with("```") {
        text = text.strip_suffix("```").map(str::trim_end).unwrap_or(text);
        if let Some(newline) = text.find('\n') {
            text = &text[newline + 1..];
        }
    }
    serde_json::from_str(text).ok()
}
