//! Blueprint validation: untyped specs in, typed plan out
//!
//! Validation accumulates every issue it finds instead of stopping at the
//! first, so authors fix a blueprint in one round trip. The pipeline per
//! node:
//!
//! 1. Required fields (`id`, `kind`), id uniqueness and charset
//! 2. Kind resolution against the closed [`NodeKind`] set
//! 3. Kind-specific payload parse (unknown fields tolerated, not kept)
//! 4. Schema parse under the mini-type grammar
//! 5. Per-kind invariants (tool/condition schemas, llm output default)
//!
//! followed by cross-node checks: dependency targets exist, no self-loops,
//! and every input-mapping reference names a transitive dependency.
//! Children of condition/loop/parallel nodes validate recursively as their
//! own sub-plans.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::blueprint::{Blueprint, NodeSpec, SUPPORTED_SCHEMA_VERSION};
use crate::path;
use crate::plan::{InputMapping, KindConfig, LlmConfig, NodeConfig, NodeKind, Plan};
use crate::schema::{self, SchemaMap, ValueType};

static NODE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("node id regex"));

/// One problem found in a blueprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Offending node id when known (nested children use `parent/child`)
    pub node_id: Option<String>,
    /// Offending field when the issue is field-scoped
    pub field: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    fn new(node_id: Option<&str>, field: Option<&str>, message: impl Into<String>) -> Self {
        ValidationIssue {
            node_id: node_id.map(str::to_string),
            field: field.map(str::to_string),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.node_id, &self.field) {
            (Some(node), Some(field)) => {
                write!(f, "node '{}', field '{}': {}", node, field, self.message)
            }
            (Some(node), None) => write!(f, "node '{}': {}", node, self.message),
            (None, Some(field)) => write!(f, "field '{}': {}", field, self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

/// Validation refusal with the full accumulated issue list
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl std::error::Error for ValidationError {}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "blueprint validation failed with {} issue(s):",
            self.issues.len()
        )?;
        for issue in &self.issues {
            writeln!(f, "  - {}", issue)?;
        }
        Ok(())
    }
}

/// Advisory finding that does not block compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub node_id: String,
    pub message: String,
}

/// Successful validation output
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub plan: Plan,
    pub warnings: Vec<ValidationWarning>,
}

/// Stateless blueprint validator
#[derive(Debug, Default)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Validator
    }

    /// Validate a blueprint and compile it to a plan.
    pub fn validate(&self, blueprint: &Blueprint) -> Result<ValidationReport, ValidationError> {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        if blueprint.schema_version != SUPPORTED_SCHEMA_VERSION {
            issues.push(ValidationIssue::new(
                None,
                Some("schema_version"),
                format!(
                    "unsupported schema version '{}' (expected '{}')",
                    blueprint.schema_version, SUPPORTED_SCHEMA_VERSION
                ),
            ));
        }

        let nodes = self.validate_nodes(&blueprint.nodes, None, &mut issues, &mut warnings);

        if issues.is_empty() {
            Ok(ValidationReport {
                plan: Plan::new(nodes),
                warnings,
            })
        } else {
            Err(ValidationError { issues })
        }
    }

    /// Validate a flat node-spec list as one (sub-)plan scope.
    ///
    /// `parent` prefixes nested node ids in issue reports.
    fn validate_nodes(
        &self,
        specs: &[NodeSpec],
        parent: Option<&str>,
        issues: &mut Vec<ValidationIssue>,
        warnings: &mut Vec<ValidationWarning>,
    ) -> Vec<NodeConfig> {
        let mut nodes = Vec::with_capacity(specs.len());
        let mut seen_ids: HashSet<String> = HashSet::new();

        for spec in specs {
            if let Some(node) = self.validate_node(spec, parent, issues, warnings) {
                if !seen_ids.insert(node.id.clone()) {
                    issues.push(ValidationIssue::new(
                        Some(&scoped(parent, &node.id)),
                        Some("id"),
                        "duplicate node id",
                    ));
                }
                nodes.push(node);
            }
        }

        self.cross_check(&nodes, parent, issues);
        nodes
    }

    fn validate_node(
        &self,
        spec: &NodeSpec,
        parent: Option<&str>,
        issues: &mut Vec<ValidationIssue>,
        warnings: &mut Vec<ValidationWarning>,
    ) -> Option<NodeConfig> {
        // Required fields first; without them there is nothing to build.
        let id = match spec.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            Some(_) => {
                issues.push(ValidationIssue::new(
                    parent,
                    Some("id"),
                    "node id must be non-empty",
                ));
                return None;
            }
            None => {
                issues.push(ValidationIssue::new(
                    parent,
                    Some("id"),
                    "missing required field",
                ));
                return None;
            }
        };
        let label = scoped(parent, &id);

        if !NODE_ID_RE.is_match(&id) {
            issues.push(ValidationIssue::new(
                Some(&label),
                Some("id"),
                "node id must be alphanumeric with '-' or '_' (max 64 chars)",
            ));
        }

        let kind = match spec.get("kind").and_then(Value::as_str) {
            Some(raw) => match NodeKind::parse(raw) {
                Some(kind) => kind,
                None => {
                    issues.push(ValidationIssue::new(
                        Some(&label),
                        Some("kind"),
                        format!("unknown node kind '{}'", raw),
                    ));
                    return None;
                }
            },
            None => {
                issues.push(ValidationIssue::new(
                    Some(&label),
                    Some("kind"),
                    "missing required field",
                ));
                return None;
            }
        };

        let dependencies = self.parse_dependencies(spec, &id, &label, issues);
        let input_schema = self.parse_schema_field(spec, "input_schema", &label, issues);
        let mut output_schema = self.parse_schema_field(spec, "output_schema", &label, issues);
        let input_mappings = self.parse_input_mappings(spec, &label, issues);
        let output_mappings = self.parse_output_mappings(spec, &label, issues);

        let retries = match spec.get("retries") {
            None => 0,
            Some(v) => match v.as_u64().and_then(|n| u32::try_from(n).ok()) {
                Some(n) => n,
                None => {
                    issues.push(ValidationIssue::new(
                        Some(&label),
                        Some("retries"),
                        "must be a non-negative integer",
                    ));
                    0
                }
            },
        };

        let backoff_seconds = match spec.get("backoff_seconds") {
            None => 0.0,
            Some(v) => match v.as_f64() {
                Some(f) if f >= 0.0 => f,
                _ => {
                    issues.push(ValidationIssue::new(
                        Some(&label),
                        Some("backoff_seconds"),
                        "must be a non-negative number",
                    ));
                    0.0
                }
            },
        };

        let timeout_seconds = match spec.get("timeout_seconds") {
            None | Some(Value::Null) => None,
            Some(v) => match v.as_f64() {
                Some(f) if f > 0.0 => Some(f),
                _ => {
                    issues.push(ValidationIssue::new(
                        Some(&label),
                        Some("timeout_seconds"),
                        "must be a positive number",
                    ));
                    None
                }
            },
        };

        let use_cache = match spec.get("use_cache") {
            None => true,
            Some(v) => match v.as_bool() {
                Some(b) => b,
                None => {
                    issues.push(ValidationIssue::new(
                        Some(&label),
                        Some("use_cache"),
                        "must be a boolean",
                    ));
                    true
                }
            },
        };

        let kind_spec = self.parse_kind_spec(spec, kind, &label, issues, warnings)?;

        // Per-kind invariants.
        match kind {
            NodeKind::Tool | NodeKind::Condition => {
                if input_schema.is_empty() {
                    issues.push(ValidationIssue::new(
                        Some(&label),
                        Some("input_schema"),
                        format!("{} nodes must declare a non-empty input schema", kind),
                    ));
                }
                if output_schema.is_empty() {
                    issues.push(ValidationIssue::new(
                        Some(&label),
                        Some("output_schema"),
                        format!("{} nodes must declare a non-empty output schema", kind),
                    ));
                }
            }
            NodeKind::Llm => {
                if output_schema.is_empty() {
                    output_schema.insert("text".to_string(), ValueType::Str);
                    warnings.push(ValidationWarning {
                        node_id: label.clone(),
                        message: "llm nodes without an output_schema are deprecated; \
                                  defaulting to {text: str}"
                            .to_string(),
                    });
                }
            }
            _ => {}
        }

        Some(NodeConfig {
            id,
            kind,
            dependencies,
            input_schema,
            output_schema,
            input_mappings,
            output_mappings,
            retries,
            backoff_seconds,
            timeout_seconds,
            use_cache,
            spec: kind_spec,
        })
    }

    fn parse_dependencies(
        &self,
        spec: &NodeSpec,
        id: &str,
        label: &str,
        issues: &mut Vec<ValidationIssue>,
    ) -> Vec<String> {
        let raw = match spec.get("dependencies") {
            None | Some(Value::Null) => return Vec::new(),
            Some(Value::Array(items)) => items,
            Some(_) => {
                issues.push(ValidationIssue::new(
                    Some(label),
                    Some("dependencies"),
                    "must be a list of node ids",
                ));
                return Vec::new();
            }
        };

        let mut deps = Vec::with_capacity(raw.len());
        let mut seen: HashSet<&str> = HashSet::new();
        for item in raw {
            match item.as_str() {
                Some(dep) => {
                    if dep == id {
                        issues.push(ValidationIssue::new(
                            Some(label),
                            Some("dependencies"),
                            "node cannot depend on itself",
                        ));
                        continue;
                    }
                    if !seen.insert(dep) {
                        issues.push(ValidationIssue::new(
                            Some(label),
                            Some("dependencies"),
                            format!("duplicate dependency '{}'", dep),
                        ));
                        continue;
                    }
                    deps.push(dep.to_string());
                }
                None => issues.push(ValidationIssue::new(
                    Some(label),
                    Some("dependencies"),
                    "dependency entries must be strings",
                )),
            }
        }
        deps
    }

    fn parse_schema_field(
        &self,
        spec: &NodeSpec,
        field: &str,
        label: &str,
        issues: &mut Vec<ValidationIssue>,
    ) -> SchemaMap {
        let raw = match spec.get(field) {
            None | Some(Value::Null) => return SchemaMap::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                issues.push(ValidationIssue::new(
                    Some(label),
                    Some(field),
                    "must be a mapping of field name to type",
                ));
                return SchemaMap::new();
            }
        };

        match schema::parse_schema(raw) {
            Ok(parsed) => parsed,
            Err(failures) => {
                for (schema_field, err) in failures {
                    issues.push(ValidationIssue::new(
                        Some(label),
                        Some(&format!("{}.{}", field, schema_field)),
                        err.to_string(),
                    ));
                }
                SchemaMap::new()
            }
        }
    }

    fn parse_input_mappings(
        &self,
        spec: &NodeSpec,
        label: &str,
        issues: &mut Vec<ValidationIssue>,
    ) -> BTreeMap<String, InputMapping> {
        let raw = match spec.get("input_mappings") {
            None | Some(Value::Null) => return BTreeMap::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                issues.push(ValidationIssue::new(
                    Some(label),
                    Some("input_mappings"),
                    "must be a mapping of placeholder name to value or reference",
                ));
                return BTreeMap::new();
            }
        };

        let mut mappings = BTreeMap::new();
        for (placeholder, value) in raw {
            // Untagged deserialization cannot fail: any non-reference shape
            // is a literal.
            let mapping: InputMapping =
                serde_json::from_value(value.clone()).unwrap_or(InputMapping::Literal(value.clone()));
            if let Some((_, source_path)) = mapping.as_reference() {
                if let Err(err) = path::validate(source_path) {
                    issues.push(ValidationIssue::new(
                        Some(label),
                        Some(&format!("input_mappings.{}", placeholder)),
                        err.to_string(),
                    ));
                    continue;
                }
            }
            mappings.insert(placeholder.clone(), mapping);
        }
        mappings
    }

    fn parse_output_mappings(
        &self,
        spec: &NodeSpec,
        label: &str,
        issues: &mut Vec<ValidationIssue>,
    ) -> BTreeMap<String, String> {
        let raw = match spec.get("output_mappings") {
            None | Some(Value::Null) => return BTreeMap::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                issues.push(ValidationIssue::new(
                    Some(label),
                    Some("output_mappings"),
                    "must be a mapping of alias to dotted path",
                ));
                return BTreeMap::new();
            }
        };

        let mut mappings = BTreeMap::new();
        for (alias, value) in raw {
            match value.as_str() {
                Some(p) => match path::validate(p) {
                    Ok(()) => {
                        mappings.insert(alias.clone(), p.to_string());
                    }
                    Err(err) => issues.push(ValidationIssue::new(
                        Some(label),
                        Some(&format!("output_mappings.{}", alias)),
                        err.to_string(),
                    )),
                },
                None => issues.push(ValidationIssue::new(
                    Some(label),
                    Some(&format!("output_mappings.{}", alias)),
                    "path must be a string",
                )),
            }
        }
        mappings
    }

    fn parse_kind_spec(
        &self,
        spec: &NodeSpec,
        kind: NodeKind,
        label: &str,
        issues: &mut Vec<ValidationIssue>,
        warnings: &mut Vec<ValidationWarning>,
    ) -> Option<KindConfig> {
        match kind {
            NodeKind::Tool => {
                let tool_name = self.require_str(spec, "tool_name", label, issues)?;
                let tool_args = match spec.get("tool_args") {
                    None | Some(Value::Null) => Map::new(),
                    Some(Value::Object(map)) => map.clone(),
                    Some(_) => {
                        issues.push(ValidationIssue::new(
                            Some(label),
                            Some("tool_args"),
                            "must be a mapping",
                        ));
                        Map::new()
                    }
                };
                Some(KindConfig::Tool {
                    tool_name,
                    tool_args,
                })
            }
            NodeKind::Llm => {
                let model = self.require_str(spec, "model", label, issues)?;
                let prompt = self.require_str(spec, "prompt", label, issues)?;
                let llm_config = match spec.get("llm_config") {
                    None | Some(Value::Null) => LlmConfig::default(),
                    Some(v) => match serde_json::from_value::<LlmConfig>(v.clone()) {
                        Ok(cfg) => cfg,
                        Err(err) => {
                            issues.push(ValidationIssue::new(
                                Some(label),
                                Some("llm_config"),
                                err.to_string(),
                            ));
                            LlmConfig::default()
                        }
                    },
                };
                Some(KindConfig::Llm {
                    model,
                    prompt,
                    llm_config,
                })
            }
            NodeKind::Agent => {
                let package = self.require_str(spec, "package", label, issues)?;
                let tools = match spec.get("tools") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(items)) => items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect(),
                    Some(_) => {
                        issues.push(ValidationIssue::new(
                            Some(label),
                            Some("tools"),
                            "must be a list of tool names",
                        ));
                        Vec::new()
                    }
                };
                let memory = spec.get("memory").filter(|v| !v.is_null()).cloned();
                let max_iterations = spec
                    .get("max_iterations")
                    .and_then(Value::as_u64)
                    .and_then(|n| u32::try_from(n).ok())
                    .unwrap_or(10);
                Some(KindConfig::Agent {
                    package,
                    tools,
                    memory,
                    max_iterations,
                })
            }
            NodeKind::Condition => {
                let expression = self.require_str(spec, "expression", label, issues)?;
                let true_branch = self.parse_branch(spec, "true_branch", label, issues, warnings);
                let false_branch = self.parse_branch(spec, "false_branch", label, issues, warnings);
                Some(KindConfig::Condition {
                    expression,
                    true_branch,
                    false_branch,
                })
            }
            NodeKind::Loop => {
                let items_source = self.require_str(spec, "items_source", label, issues)?;
                let item_var = self.require_str(spec, "item_var", label, issues)?;
                let body = self.parse_branch(spec, "body", label, issues, warnings);
                if body.is_empty() {
                    issues.push(ValidationIssue::new(
                        Some(label),
                        Some("body"),
                        "loop body must contain at least one node",
                    ));
                }
                let parallel = spec
                    .get("parallel")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let max_iterations = spec
                    .get("max_iterations")
                    .and_then(Value::as_u64)
                    .and_then(|n| u32::try_from(n).ok());
                Some(KindConfig::Loop {
                    items_source,
                    item_var,
                    body,
                    parallel,
                    max_iterations,
                })
            }
            NodeKind::Parallel => {
                let branches = match spec.get("branches") {
                    Some(Value::Array(items)) if !items.is_empty() => {
                        let mut branches = Vec::with_capacity(items.len());
                        for (i, branch) in items.iter().enumerate() {
                            match branch {
                                Value::Array(specs) => {
                                    let child_specs: Vec<NodeSpec> = specs
                                        .iter()
                                        .filter_map(|v| v.as_object().cloned())
                                        .collect();
                                    branches.push(self.validate_nodes(
                                        &child_specs,
                                        Some(label),
                                        issues,
                                        warnings,
                                    ));
                                }
                                _ => issues.push(ValidationIssue::new(
                                    Some(label),
                                    Some(&format!("branches[{}]", i)),
                                    "each branch must be a list of node specs",
                                )),
                            }
                        }
                        branches
                    }
                    _ => {
                        issues.push(ValidationIssue::new(
                            Some(label),
                            Some("branches"),
                            "parallel nodes require a non-empty list of branches",
                        ));
                        return None;
                    }
                };
                let max_concurrency = spec
                    .get("max_concurrency")
                    .and_then(Value::as_u64)
                    .map(|n| n.max(1) as usize)
                    .unwrap_or(5);
                Some(KindConfig::Parallel {
                    branches,
                    max_concurrency,
                })
            }
            NodeKind::Workflow => {
                let workflow_ref = self.require_str(spec, "workflow_ref", label, issues)?;
                let mut exposed_outputs = BTreeMap::new();
                if let Some(Value::Object(map)) = spec.get("exposed_outputs") {
                    for (alias, value) in map {
                        match value.as_str() {
                            Some(p) => {
                                exposed_outputs.insert(alias.clone(), p.to_string());
                            }
                            None => issues.push(ValidationIssue::new(
                                Some(label),
                                Some(&format!("exposed_outputs.{}", alias)),
                                "path must be a string",
                            )),
                        }
                    }
                }
                Some(KindConfig::Workflow {
                    workflow_ref,
                    exposed_outputs,
                })
            }
            NodeKind::Code => {
                let code = self.require_str(spec, "code", label, issues)?;
                let language = self.require_str(spec, "language", label, issues)?;
                let sandbox = spec.get("sandbox").and_then(Value::as_bool).unwrap_or(true);
                Some(KindConfig::Code {
                    code,
                    language,
                    sandbox,
                })
            }
            NodeKind::Human | NodeKind::Monitor | NodeKind::Recursive | NodeKind::Swarm => {
                Some(KindConfig::Opaque { raw: spec.clone() })
            }
        }
    }

    fn parse_branch(
        &self,
        spec: &NodeSpec,
        field: &str,
        label: &str,
        issues: &mut Vec<ValidationIssue>,
        warnings: &mut Vec<ValidationWarning>,
    ) -> Vec<NodeConfig> {
        match spec.get(field) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => {
                let child_specs: Vec<NodeSpec> = items
                    .iter()
                    .filter_map(|v| v.as_object().cloned())
                    .collect();
                if child_specs.len() != items.len() {
                    issues.push(ValidationIssue::new(
                        Some(label),
                        Some(field),
                        "every entry must be a node spec mapping",
                    ));
                }
                self.validate_nodes(&child_specs, Some(label), issues, warnings)
            }
            Some(_) => {
                issues.push(ValidationIssue::new(
                    Some(label),
                    Some(field),
                    "must be a list of node specs",
                ));
                Vec::new()
            }
        }
    }

    fn require_str(
        &self,
        spec: &NodeSpec,
        field: &str,
        label: &str,
        issues: &mut Vec<ValidationIssue>,
    ) -> Option<String> {
        match spec.get(field).and_then(Value::as_str) {
            Some(s) if !s.is_empty() => Some(s.to_string()),
            Some(_) => {
                issues.push(ValidationIssue::new(
                    Some(label),
                    Some(field),
                    "must be non-empty",
                ));
                None
            }
            None => {
                issues.push(ValidationIssue::new(
                    Some(label),
                    Some(field),
                    "missing required field",
                ));
                None
            }
        }
    }

    /// Cross-node checks within one plan scope.
    fn cross_check(
        &self,
        nodes: &[NodeConfig],
        parent: Option<&str>,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let deps_by_id: HashMap<&str, &[String]> = nodes
            .iter()
            .map(|n| (n.id.as_str(), n.dependencies.as_slice()))
            .collect();

        for node in nodes {
            let label = scoped(parent, &node.id);

            for dep in &node.dependencies {
                if !ids.contains(dep.as_str()) {
                    issues.push(ValidationIssue::new(
                        Some(&label),
                        Some("dependencies"),
                        format!("dependency '{}' does not exist", dep),
                    ));
                }
            }

            if node.input_mappings.is_empty() {
                continue;
            }

            // Transitive dependency closure; a visited set keeps this safe
            // even on (not yet rejected) cyclic input.
            let mut reachable: HashSet<&str> = HashSet::new();
            let mut queue: VecDeque<&str> =
                node.dependencies.iter().map(String::as_str).collect();
            while let Some(current) = queue.pop_front() {
                if !reachable.insert(current) {
                    continue;
                }
                if let Some(deps) = deps_by_id.get(current) {
                    queue.extend(deps.iter().map(String::as_str));
                }
            }

            for (placeholder, mapping) in &node.input_mappings {
                if let Some((source, _)) = mapping.as_reference() {
                    if !reachable.contains(source) {
                        issues.push(ValidationIssue::new(
                            Some(&label),
                            Some(&format!("input_mappings.{}", placeholder)),
                            format!(
                                "reference source '{}' is not among the node's \
                                 transitive dependencies",
                                source
                            ),
                        ));
                    }
                }
            }
        }
    }
}

fn scoped(parent: Option<&str>, id: &str) -> String {
    match parent {
        Some(parent) => format!("{}/{}", parent, id),
        None => id.to_string(),
    }
}
