//! Run coordinator: the entry point that drives a compiled plan
//!
//! Accepts a plan plus per-run options, wires up the context store, cache,
//! event bus and scheduler, and produces the final [`RunResult`]. Holds no
//! state between runs beyond the process-lifetime cache it owns.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::artifact::ArtifactStore;
use crate::cache::ResultCache;
use crate::context::ContextStore;
use crate::error::StrataError;
use crate::events::{EventBus, EventKind, Observer};
use crate::executor::NodeRunner;
use crate::graph::DependencyGraph;
use crate::metrics::RunMetrics;
use crate::outcome::RunResult;
use crate::plan::Plan;
use crate::registry::Registry;
use crate::scheduler::{FailurePolicy, LevelScheduler};

/// Hard bounds on the per-run parallelism knob
pub const MAX_PARALLEL_RANGE: std::ops::RangeInclusive<usize> = 1..=20;

/// Per-run configuration
pub struct RunOptions {
    /// Concurrent node executions within a level (clamped to 1..=20)
    pub max_parallel: usize,
    pub failure_policy: FailurePolicy,
    /// Generated (UUID v4) when absent
    pub run_id: Option<String>,
    /// Overrides the plan's baked-in initial context when present
    pub initial_context: Option<Map<String, Value>>,
    /// Whole-run deadline; elapsing cancels the run
    pub timeout: Option<Duration>,
    pub use_cache: bool,
    pub validate_outputs: bool,
    pub observers: Vec<Arc<dyn Observer>>,
    /// External cancellation handle for the run
    pub cancel: Option<CancellationToken>,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            max_parallel: 5,
            failure_policy: FailurePolicy::default(),
            run_id: None,
            initial_context: None,
            timeout: None,
            use_cache: true,
            validate_outputs: true,
            observers: Vec::new(),
            cancel: None,
        }
    }
}

impl RunOptions {
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_initial_context(mut self, context: Map<String, Value>) -> Self {
        self.initial_context = Some(context);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Entry point for executing compiled plans
pub struct RunCoordinator {
    registry: Arc<Registry>,
    cache: ResultCache,
    artifacts: Option<Arc<dyn ArtifactStore>>,
}

impl RunCoordinator {
    pub fn new(registry: Arc<Registry>) -> Self {
        RunCoordinator {
            registry,
            cache: ResultCache::new(),
            artifacts: None,
        }
    }

    pub fn with_artifact_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(store);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The process-lifetime cache shared across this coordinator's runs.
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Execute a plan to completion.
    #[instrument(skip(self, plan, options), fields(nodes = plan.len()))]
    pub async fn run(
        &self,
        plan: Arc<Plan>,
        options: RunOptions,
    ) -> Result<RunResult, StrataError> {
        let run_id: Arc<str> = match options.run_id {
            Some(id) => Arc::from(id.as_str()),
            None => Arc::from(Uuid::new_v4().to_string().as_str()),
        };
        let max_parallel = options
            .max_parallel
            .clamp(*MAX_PARALLEL_RANGE.start(), *MAX_PARALLEL_RANGE.end());

        let plan = match options.initial_context {
            Some(context) => Arc::new((*plan).clone().with_initial_context(context)),
            None => plan,
        };
        let graph = DependencyGraph::build(&plan)?;

        let events = EventBus::new(options.observers);
        let cancel = options.cancel.unwrap_or_else(CancellationToken::new);
        let metrics = RunMetrics::new();

        let runner = Arc::new(NodeRunner::new(
            Arc::clone(&plan),
            Arc::clone(&self.registry),
            ContextStore::new(),
            options.use_cache.then(|| self.cache.clone()),
            self.artifacts.clone(),
            events.clone(),
            Arc::clone(&run_id),
            options.failure_policy,
            options.validate_outputs,
            cancel.clone(),
        ));
        let scheduler = LevelScheduler::new(
            Arc::clone(&plan),
            graph,
            runner,
            metrics.clone(),
            max_parallel,
            options.failure_policy,
            cancel.clone(),
        );

        info!(run_id = %run_id, nodes = plan.len(), "run starting");
        let started = Instant::now();
        events
            .emit(EventKind::RunStart {
                run_id: run_id.to_string(),
                node_count: plan.len(),
            })
            .await;

        let outcome = match options.timeout {
            None => scheduler.run().await?,
            Some(deadline) => {
                let run_future = scheduler.run();
                tokio::pin!(run_future);
                tokio::select! {
                    outcome = &mut run_future => outcome?,
                    _ = tokio::time::sleep(deadline) => {
                        warn!(run_id = %run_id, "run deadline elapsed; cancelling");
                        cancel.cancel();
                        // Cooperative executors observe the token; the
                        // scheduler marks everything unstarted as cancelled.
                        run_future.await?
                    }
                }
            }
        };

        let duration_seconds = started.elapsed().as_secs_f64();
        let success = outcome.errors.is_empty();
        let error = if success {
            None
        } else {
            Some(outcome.errors.join("\n"))
        };

        events
            .emit(EventKind::RunEnd {
                run_id: run_id.to_string(),
                success,
                duration_ms: (duration_seconds * 1000.0) as u64,
            })
            .await;
        info!(run_id = %run_id, success, duration_seconds, "run finished");

        Ok(RunResult {
            run_id: run_id.to_string(),
            success,
            cancelled: outcome.cancelled,
            outputs: outcome.results,
            error,
            duration_seconds,
            token_stats: metrics.snapshot(),
        })
    }
}
