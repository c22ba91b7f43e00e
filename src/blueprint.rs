//! Untyped blueprint format (the validator's input)
//!
//! A blueprint is what authors hand us: a versioned mapping with a flat node
//! list. Node specs stay untyped here; the validator turns them into
//! [`crate::plan::NodeConfig`]s.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StrataError;

/// The blueprint shape this runtime accepts
pub const SUPPORTED_SCHEMA_VERSION: &str = "1.1.0";

/// An untyped node spec: at minimum `id` and `kind`, everything else
/// kind-specific and left for the validator
pub type NodeSpec = Map<String, Value>;

/// User-authored workflow description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blueprint {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    pub nodes: Vec<NodeSpec>,

    /// Opaque author metadata, carried but never interpreted
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_schema_version() -> String {
    SUPPORTED_SCHEMA_VERSION.to_string()
}

impl Blueprint {
    /// Build a blueprint around a node list with the supported version.
    pub fn new(nodes: Vec<NodeSpec>) -> Self {
        Blueprint {
            schema_version: default_schema_version(),
            nodes,
            metadata: Map::new(),
        }
    }

    /// Parse a blueprint from YAML or JSON text.
    ///
    /// JSON is a YAML subset, so a single YAML parse covers both; the JSON
    /// fallback only exists to produce a JSON-flavored error for `.json`
    /// inputs that fail.
    pub fn from_str(text: &str) -> Result<Self, StrataError> {
        match serde_yaml::from_str::<Blueprint>(text) {
            Ok(blueprint) => Ok(blueprint),
            Err(yaml_err) => {
                let trimmed = text.trim_start();
                if trimmed.starts_with('{') {
                    Ok(serde_json::from_str::<Blueprint>(text)?)
                } else {
                    Err(yaml_err.into())
                }
            }
        }
    }

    /// Load a blueprint file from disk.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, StrataError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_yaml_blueprint() {
        let yaml = r#"
schema_version: "1.1.0"
nodes:
  - id: fetch
    kind: tool
    tool_name: echo
  - id: summarize
    kind: llm
    model: mock-small
    prompt: "Summarize {text}"
    dependencies: [fetch]
metadata:
  author: tests
"#;
        let blueprint = Blueprint::from_str(yaml).unwrap();
        assert_eq!(blueprint.schema_version, "1.1.0");
        assert_eq!(blueprint.nodes.len(), 2);
        assert_eq!(blueprint.nodes[0]["id"], json!("fetch"));
        assert_eq!(blueprint.metadata["author"], json!("tests"));
    }

    #[test]
    fn parses_json_blueprint() {
        let text = r#"{"schema_version": "1.1.0", "nodes": [{"id": "a", "kind": "tool"}]}"#;
        let blueprint = Blueprint::from_str(text).unwrap();
        assert_eq!(blueprint.nodes.len(), 1);
    }

    #[test]
    fn missing_version_defaults() {
        let blueprint = Blueprint::from_str("nodes: []").unwrap();
        assert_eq!(blueprint.schema_version, SUPPORTED_SCHEMA_VERSION);
    }

    #[test]
    fn missing_nodes_is_an_error() {
        assert!(Blueprint::from_str("schema_version: \"1.1.0\"").is_err());
    }
}
