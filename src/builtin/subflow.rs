//! Nested workflow executor
//!
//! `workflow` nodes resolve `workflow_ref` to a registered plan, run it
//! under a fresh coordinator and project only `exposed_outputs` to the
//! parent. With no exposure list, every node output is projected.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};

use crate::executor::{ExecOutcome, ExecutionEnv, Executor, ExecutorFailure};
use crate::path;
use crate::plan::{KindConfig, Plan};

use super::{run_subplan, subplan_outputs};

/// Named plans available to `workflow` nodes
#[derive(Clone, Default)]
pub struct PlanLibrary {
    plans: Arc<DashMap<String, Arc<Plan>>>,
}

impl PlanLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, plan: Arc<Plan>) {
        self.plans.insert(name.into(), plan);
    }

    pub fn get(&self, name: &str) -> Option<Arc<Plan>> {
        self.plans.get(name).map(|p| Arc::clone(&p))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plans.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for PlanLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanLibrary")
            .field("plans", &self.plans.len())
            .finish()
    }
}

pub struct WorkflowExecutor {
    library: PlanLibrary,
}

impl WorkflowExecutor {
    pub fn new(library: PlanLibrary) -> Self {
        WorkflowExecutor { library }
    }
}

#[async_trait]
impl Executor for WorkflowExecutor {
    fn validate(&self, config: &crate::plan::NodeConfig) -> Result<(), ExecutorFailure> {
        match &config.spec {
            KindConfig::Workflow { workflow_ref, .. } => {
                if self.library.get(workflow_ref).is_none() {
                    Err(ExecutorFailure::validation(format!(
                        "unknown workflow reference '{}'",
                        workflow_ref
                    )))
                } else {
                    Ok(())
                }
            }
            _ => Err(ExecutorFailure::validation(
                "workflow executor received a non-workflow node config",
            )),
        }
    }

    async fn execute(&self, env: ExecutionEnv<'_>) -> Result<ExecOutcome, ExecutorFailure> {
        let KindConfig::Workflow {
            workflow_ref,
            exposed_outputs,
        } = &env.node.spec
        else {
            return Err(ExecutorFailure::validation(
                "workflow executor received a non-workflow node config",
            ));
        };

        let nested = self.library.get(workflow_ref).ok_or_else(|| {
            ExecutorFailure::execution(format!("unknown workflow reference '{}'", workflow_ref))
        })?;

        let run = run_subplan(
            Arc::clone(env.registry),
            env.cancel.child_token(),
            format!("{}/{}:{}", env.run_id, env.node.id, workflow_ref),
            nested.nodes().to_vec(),
            env.inputs.clone(),
        )
        .await?;

        if !run.success {
            return Err(ExecutorFailure::execution(format!(
                "nested workflow '{}' failed: {}",
                workflow_ref,
                run.error.as_deref().unwrap_or("unknown error")
            )));
        }

        if exposed_outputs.is_empty() {
            return Ok(ExecOutcome::Payload(subplan_outputs(&run)));
        }

        // Project only the exposed aliases; each path is `node_id` or
        // `node_id.<dotted path into that node's output>`.
        let mut projected = Map::new();
        for (alias, exposure) in exposed_outputs {
            let (node_id, inner_path) = match exposure.split_once('.') {
                Some((node_id, rest)) => (node_id, Some(rest)),
                None => (exposure.as_str(), None),
            };
            let output = run
                .node(node_id)
                .and_then(|r| r.output.clone())
                .ok_or_else(|| {
                    ExecutorFailure::execution(format!(
                        "exposed output '{}' names unknown node '{}'",
                        alias, node_id
                    ))
                })?;
            let value = match inner_path {
                None => output,
                Some(inner) => path::resolve(&output, inner).map_err(|err| {
                    ExecutorFailure::execution(format!(
                        "exposed output '{}' cannot resolve '{}': {}",
                        alias, exposure, err.reason
                    ))
                })?,
            };
            projected.insert(alias.clone(), value);
        }

        Ok(ExecOutcome::Payload(Value::Object(projected)))
    }

    fn description(&self) -> Option<&str> {
        Some("runs a registered nested plan and projects exposed outputs")
    }
}
