//! Typed plan model: node kinds, configs and the compiled plan
//!
//! A [`Plan`] is the validated form of a blueprint. Node configs are
//! immutable once compiled; the scheduler and executor only read them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::SchemaMap;

/// Registry name used by the built-in control-flow executors
pub const BUILTIN_EXECUTOR: &str = "builtin";

/// Closed set of node families.
///
/// The core treats kinds uniformly; kind-specific behavior lives behind the
/// executor interface resolved through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Tool,
    Llm,
    Agent,
    Condition,
    Loop,
    Parallel,
    Code,
    Workflow,
    Human,
    Monitor,
    Recursive,
    Swarm,
}

impl NodeKind {
    pub const ALL: [NodeKind; 12] = [
        NodeKind::Tool,
        NodeKind::Llm,
        NodeKind::Agent,
        NodeKind::Condition,
        NodeKind::Loop,
        NodeKind::Parallel,
        NodeKind::Code,
        NodeKind::Workflow,
        NodeKind::Human,
        NodeKind::Monitor,
        NodeKind::Recursive,
        NodeKind::Swarm,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "tool" => Some(NodeKind::Tool),
            "llm" => Some(NodeKind::Llm),
            "agent" => Some(NodeKind::Agent),
            "condition" => Some(NodeKind::Condition),
            "loop" => Some(NodeKind::Loop),
            "parallel" => Some(NodeKind::Parallel),
            "code" => Some(NodeKind::Code),
            "workflow" => Some(NodeKind::Workflow),
            "human" => Some(NodeKind::Human),
            "monitor" => Some(NodeKind::Monitor),
            "recursive" => Some(NodeKind::Recursive),
            "swarm" => Some(NodeKind::Swarm),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Tool => "tool",
            NodeKind::Llm => "llm",
            NodeKind::Agent => "agent",
            NodeKind::Condition => "condition",
            NodeKind::Loop => "loop",
            NodeKind::Parallel => "parallel",
            NodeKind::Code => "code",
            NodeKind::Workflow => "workflow",
            NodeKind::Human => "human",
            NodeKind::Monitor => "monitor",
            NodeKind::Recursive => "recursive",
            NodeKind::Swarm => "swarm",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of `input_mappings`: a literal, or a reference into an
/// upstream node's output.
///
/// Untagged on the wire; a mapping carrying `source_node_id` is a
/// reference, anything else is a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputMapping {
    Reference {
        source_node_id: String,
        #[serde(alias = "source_output_key", default)]
        source_output_path: String,
    },
    Literal(Value),
}

impl InputMapping {
    pub fn literal(value: impl Into<Value>) -> Self {
        InputMapping::Literal(value.into())
    }

    pub fn reference(node_id: impl Into<String>, path: impl Into<String>) -> Self {
        InputMapping::Reference {
            source_node_id: node_id.into(),
            source_output_path: path.into(),
        }
    }

    pub fn as_reference(&self) -> Option<(&str, &str)> {
        match self {
            InputMapping::Reference {
                source_node_id,
                source_output_path,
            } => Some((source_node_id, source_output_path)),
            InputMapping::Literal(_) => None,
        }
    }
}

/// Provider settings for `llm` nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

fn default_provider() -> String {
    "mock".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            provider: default_provider(),
            temperature: None,
            max_tokens: None,
        }
    }
}

/// Kind-specific payload of a node config
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KindConfig {
    Tool {
        tool_name: String,
        #[serde(default)]
        tool_args: Map<String, Value>,
    },
    Llm {
        model: String,
        prompt: String,
        #[serde(default)]
        llm_config: LlmConfig,
    },
    Agent {
        package: String,
        #[serde(default)]
        tools: Vec<String>,
        #[serde(default)]
        memory: Option<Value>,
        #[serde(default = "default_agent_iterations")]
        max_iterations: u32,
    },
    Condition {
        expression: String,
        #[serde(default)]
        true_branch: Vec<NodeConfig>,
        #[serde(default)]
        false_branch: Vec<NodeConfig>,
    },
    Loop {
        items_source: String,
        item_var: String,
        body: Vec<NodeConfig>,
        #[serde(default)]
        parallel: bool,
        #[serde(default)]
        max_iterations: Option<u32>,
    },
    Parallel {
        branches: Vec<Vec<NodeConfig>>,
        #[serde(default = "default_branch_concurrency")]
        max_concurrency: usize,
    },
    Workflow {
        workflow_ref: String,
        #[serde(default)]
        exposed_outputs: std::collections::BTreeMap<String, String>,
    },
    Code {
        code: String,
        language: String,
        #[serde(default = "default_true")]
        sandbox: bool,
    },
    /// Kinds whose semantics live entirely behind a registered executor
    /// (human, monitor, recursive, swarm); the payload passes through.
    Opaque {
        #[serde(default)]
        raw: Map<String, Value>,
    },
}

fn default_agent_iterations() -> u32 {
    10
}

fn default_branch_concurrency() -> usize {
    5
}

fn default_true() -> bool {
    true
}

/// Validated, immutable description of one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    pub kind: NodeKind,

    /// Peer node ids this node waits for; ordered, no duplicates, no self
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub input_schema: SchemaMap,
    #[serde(default)]
    pub output_schema: SchemaMap,

    /// Placeholder name -> literal or upstream reference
    #[serde(default)]
    pub input_mappings: std::collections::BTreeMap<String, InputMapping>,

    /// Alias -> dotted path into this node's own output
    #[serde(default)]
    pub output_mappings: std::collections::BTreeMap<String, String>,

    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub backoff_seconds: f64,
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
    #[serde(default = "default_true")]
    pub use_cache: bool,

    pub spec: KindConfig,
}

impl NodeConfig {
    /// The registry name this node's executor resolves under.
    ///
    /// Tools resolve by tool name, llm nodes by provider, agents by
    /// package, code by language; control-flow kinds share the builtin
    /// executor name, and opaque kinds fall back to a `package`/`name`
    /// field when present.
    pub fn executor_name(&self) -> &str {
        match &self.spec {
            KindConfig::Tool { tool_name, .. } => tool_name,
            KindConfig::Llm { llm_config, .. } => &llm_config.provider,
            KindConfig::Agent { package, .. } => package,
            KindConfig::Code { language, .. } => language,
            KindConfig::Condition { .. }
            | KindConfig::Loop { .. }
            | KindConfig::Parallel { .. }
            | KindConfig::Workflow { .. } => BUILTIN_EXECUTOR,
            KindConfig::Opaque { raw } => raw
                .get("package")
                .or_else(|| raw.get("name"))
                .and_then(Value::as_str)
                .unwrap_or(BUILTIN_EXECUTOR),
        }
    }

    /// Provider name recorded in result metadata, when the kind has one.
    pub fn provider_name(&self) -> Option<&str> {
        match &self.spec {
            KindConfig::Llm { llm_config, .. } => Some(llm_config.provider.as_str()),
            _ => None,
        }
    }
}

/// Ordered collection of validated nodes plus the run-seed context.
///
/// Serialize-only: plans are compiled from blueprints, not deserialized
/// directly (the id index is not part of the wire shape).
#[derive(Debug, Clone, Default, Serialize)]
pub struct Plan {
    nodes: Vec<NodeConfig>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    pub initial_context: Map<String, Value>,
}

impl Plan {
    /// Build a plan from validated nodes. Ids are assumed unique (the
    /// validator enforces this); a duplicate would shadow its predecessor.
    pub fn new(nodes: Vec<NodeConfig>) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        Plan {
            nodes,
            index,
            initial_context: Map::new(),
        }
    }

    pub fn with_initial_context(mut self, initial_context: Map<String, Value>) -> Self {
        self.initial_context = initial_context;
        self
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeConfig> {
        self.index.get(node_id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.index.contains_key(node_id)
    }

    pub fn nodes(&self) -> &[NodeConfig] {
        &self.nodes
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn tool_node(id: &str, tool: &str, deps: &[&str]) -> NodeConfig {
        NodeConfig {
            id: id.to_string(),
            kind: NodeKind::Tool,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            input_schema: SchemaMap::new(),
            output_schema: SchemaMap::new(),
            input_mappings: Default::default(),
            output_mappings: Default::default(),
            retries: 0,
            backoff_seconds: 0.0,
            timeout_seconds: None,
            use_cache: true,
            spec: KindConfig::Tool {
                tool_name: tool.to_string(),
                tool_args: Map::new(),
            },
        }
    }

    #[test]
    fn node_kind_parse_round_trip() {
        for kind in NodeKind::ALL {
            assert_eq!(NodeKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(NodeKind::parse("mystery"), None);
    }

    #[test]
    fn node_kind_serde_is_snake_case() {
        assert_eq!(serde_json::to_value(NodeKind::Tool).unwrap(), json!("tool"));
        let kind: NodeKind = serde_json::from_value(json!("workflow")).unwrap();
        assert_eq!(kind, NodeKind::Workflow);
    }

    #[test]
    fn input_mapping_reference_vs_literal() {
        let reference: InputMapping = serde_json::from_value(json!({
            "source_node_id": "fetch",
            "source_output_path": "data.items.0"
        }))
        .unwrap();
        assert_eq!(reference.as_reference(), Some(("fetch", "data.items.0")));

        let literal: InputMapping = serde_json::from_value(json!({"plain": "map"})).unwrap();
        assert_eq!(literal.as_reference(), None);

        let scalar: InputMapping = serde_json::from_value(json!(42)).unwrap();
        assert_eq!(scalar, InputMapping::Literal(json!(42)));
    }

    #[test]
    fn input_mapping_accepts_legacy_key_field() {
        let reference: InputMapping = serde_json::from_value(json!({
            "source_node_id": "fetch",
            "source_output_key": "text"
        }))
        .unwrap();
        assert_eq!(reference.as_reference(), Some(("fetch", "text")));
    }

    #[test]
    fn executor_name_by_kind() {
        let tool = tool_node("a", "echo", &[]);
        assert_eq!(tool.executor_name(), "echo");

        let mut llm = tool_node("b", "unused", &[]);
        llm.kind = NodeKind::Llm;
        llm.spec = KindConfig::Llm {
            model: "mock-small".into(),
            prompt: "hi".into(),
            llm_config: LlmConfig::default(),
        };
        assert_eq!(llm.executor_name(), "mock");

        let mut cond = tool_node("c", "unused", &[]);
        cond.kind = NodeKind::Condition;
        cond.spec = KindConfig::Condition {
            expression: "x > 1".into(),
            true_branch: vec![],
            false_branch: vec![],
        };
        assert_eq!(cond.executor_name(), BUILTIN_EXECUTOR);
    }

    #[test]
    fn plan_lookup() {
        let plan = Plan::new(vec![
            tool_node("a", "echo", &[]),
            tool_node("b", "echo", &["a"]),
        ]);
        assert_eq!(plan.len(), 2);
        assert!(plan.contains("a"));
        assert!(plan.get("b").is_some());
        assert!(plan.get("z").is_none());
        let ids: Vec<&str> = plan.node_ids().collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
