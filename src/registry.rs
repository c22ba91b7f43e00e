//! Executor registry
//!
//! Holds executor instances and factory closures keyed by `(kind, name)`,
//! where the name is e.g. a tool name, an LLM provider or an agent package.
//! Populated at process start; re-registration is guarded by the map but
//! in-flight runs are not required to observe it.
//!
//! `resolve` additionally consults per-kind allow/deny sets, typically read
//! from `STRATA_<KIND>_ALLOW` / `STRATA_<KIND>_DENY` environment variables.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use crate::executor::Executor;
use crate::plan::NodeKind;

/// Factory closure for on-demand executor instantiation
pub type ExecutorFactory = Arc<dyn Fn() -> Arc<dyn Executor> + Send + Sync>;

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("no {kind} executor registered under '{name}'")]
    Miss { kind: NodeKind, name: String },

    #[error("policy denies {kind} executor '{name}'")]
    Denied { kind: NodeKind, name: String },
}

#[derive(Debug, Clone, Default)]
struct KindRule {
    /// When present, only listed names resolve
    allow: Option<HashSet<String>>,
    deny: HashSet<String>,
}

/// Per-kind allow/deny sets gating `resolve`
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    rules: HashMap<NodeKind, KindRule>,
}

impl AccessPolicy {
    /// Read `STRATA_<KIND>_ALLOW` / `STRATA_<KIND>_DENY` for every kind.
    /// Values are comma-separated names; unset means no restriction.
    pub fn from_env() -> Self {
        let mut rules = HashMap::new();
        for kind in NodeKind::ALL {
            let upper = kind.as_str().to_uppercase();
            let allow = std::env::var(format!("STRATA_{}_ALLOW", upper))
                .ok()
                .map(|raw| parse_name_set(&raw));
            let deny = std::env::var(format!("STRATA_{}_DENY", upper))
                .ok()
                .map(|raw| parse_name_set(&raw))
                .unwrap_or_default();
            if allow.is_some() || !deny.is_empty() {
                rules.insert(kind, KindRule { allow, deny });
            }
        }
        AccessPolicy { rules }
    }

    /// Restrict a kind to an explicit allow list.
    pub fn allow(mut self, kind: NodeKind, names: impl IntoIterator<Item = String>) -> Self {
        self.rules.entry(kind).or_default().allow = Some(names.into_iter().collect());
        self
    }

    /// Deny specific names for a kind.
    pub fn deny(mut self, kind: NodeKind, names: impl IntoIterator<Item = String>) -> Self {
        self.rules
            .entry(kind)
            .or_default()
            .deny
            .extend(names);
        self
    }

    pub fn permits(&self, kind: NodeKind, name: &str) -> bool {
        let Some(rule) = self.rules.get(&kind) else {
            return true;
        };
        if rule.deny.contains(name) {
            return false;
        }
        match &rule.allow {
            Some(allowed) => allowed.contains(name),
            None => true,
        }
    }
}

fn parse_name_set(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Process-wide store of executors and factories
pub struct Registry {
    executors: DashMap<(NodeKind, String), Arc<dyn Executor>>,
    factories: DashMap<(NodeKind, String), ExecutorFactory>,
    policy: AccessPolicy,
}

impl Registry {
    /// An empty registry with a permissive policy.
    pub fn new() -> Self {
        Self::with_policy(AccessPolicy::default())
    }

    /// An empty registry gated by environment-driven allow/deny sets.
    pub fn with_env_policy() -> Self {
        Self::with_policy(AccessPolicy::from_env())
    }

    pub fn with_policy(policy: AccessPolicy) -> Self {
        Registry {
            executors: DashMap::new(),
            factories: DashMap::new(),
            policy,
        }
    }

    /// Register an executor instance under `(kind, name)`.
    pub fn register(
        &self,
        kind: NodeKind,
        name: impl Into<String>,
        executor: Arc<dyn Executor>,
    ) {
        let name = name.into();
        debug!(kind = %kind, name = %name, "registering executor");
        self.executors.insert((kind, name), executor);
    }

    /// Register a factory for on-demand instantiation. The first `get`
    /// memoizes the instance.
    pub fn register_factory(
        &self,
        kind: NodeKind,
        name: impl Into<String>,
        factory: ExecutorFactory,
    ) {
        self.factories.insert((kind, name.into()), factory);
    }

    /// Look up an executor, instantiating from a factory when needed.
    pub fn get(&self, kind: NodeKind, name: &str) -> Result<Arc<dyn Executor>, RegistryError> {
        let key = (kind, name.to_string());
        if let Some(executor) = self.executors.get(&key) {
            return Ok(Arc::clone(&executor));
        }

        if let Some(factory) = self.factories.get(&key) {
            // Entry API makes the memoization atomic against a concurrent get.
            let instance = factory();
            use dashmap::mapref::entry::Entry;
            return Ok(match self.executors.entry(key) {
                Entry::Occupied(e) => Arc::clone(e.get()),
                Entry::Vacant(e) => {
                    e.insert(Arc::clone(&instance));
                    instance
                }
            });
        }

        Err(RegistryError::Miss {
            kind,
            name: name.to_string(),
        })
    }

    /// Policy-gated lookup.
    pub fn resolve(&self, kind: NodeKind, name: &str) -> Result<Arc<dyn Executor>, RegistryError> {
        if !self.policy.permits(kind, name) {
            return Err(RegistryError::Denied {
                kind,
                name: name.to_string(),
            });
        }
        self.get(kind, name)
    }

    /// Sorted names registered for a kind (instances and factories).
    pub fn list(&self, kind: NodeKind) -> Vec<String> {
        let mut names: BTreeSet<String> = BTreeSet::new();
        for entry in self.executors.iter() {
            if entry.key().0 == kind {
                names.insert(entry.key().1.clone());
            }
        }
        for entry in self.factories.iter() {
            if entry.key().0 == kind {
                names.insert(entry.key().1.clone());
            }
        }
        names.into_iter().collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("executors", &self.executors.len())
            .field("factories", &self.factories.len())
            .finish()
    }
}
