//! Dependency graph: topological levels, cycle detection and queries
//!
//! Built from a plan's top-level nodes only; children nested inside
//! condition/loop/parallel nodes belong to those nodes' executors.

use std::collections::{HashMap, HashSet};

use crate::error::StrataError;
use crate::plan::Plan;

/// Advisory schema misalignment along a dependency edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMismatch {
    pub node_id: String,
    pub placeholder: String,
    pub source_node_id: String,
    /// Type the downstream input schema declares
    pub expected: String,
    /// Type the upstream output schema provides
    pub found: String,
}

/// Immutable dependency graph over a compiled plan
#[derive(Debug)]
pub struct DependencyGraph {
    dependencies: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
    /// Node ids grouped by topological depth; insertion order within a level
    levels: Vec<Vec<String>>,
    level_of: HashMap<String, usize>,
    order: Vec<String>,
}

impl DependencyGraph {
    /// Build the graph and compute topological levels.
    ///
    /// Level 0 holds all nodes with no dependencies; level L+1 holds nodes
    /// whose dependencies all lie in levels <= L. A full pass that assigns
    /// nothing while nodes remain means a cycle.
    pub fn build(plan: &Plan) -> Result<Self, StrataError> {
        let mut dependencies: HashMap<String, Vec<String>> = HashMap::with_capacity(plan.len());
        let mut dependents: HashMap<String, Vec<String>> = HashMap::with_capacity(plan.len());
        let mut order: Vec<String> = Vec::with_capacity(plan.len());

        for node in plan.nodes() {
            order.push(node.id.clone());
            dependencies.insert(node.id.clone(), node.dependencies.clone());
            dependents.entry(node.id.clone()).or_default();
        }

        for node in plan.nodes() {
            for dep in &node.dependencies {
                if !plan.contains(dep) {
                    return Err(StrataError::ConfigMissing(dep.clone()));
                }
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(node.id.clone());
            }
        }

        let mut level_of: HashMap<String, usize> = HashMap::with_capacity(plan.len());
        let mut levels: Vec<Vec<String>> = Vec::new();
        let mut remaining: Vec<&str> = order.iter().map(String::as_str).collect();

        while !remaining.is_empty() {
            let mut assigned_this_pass = Vec::new();
            for &id in &remaining {
                let deps = &dependencies[id];
                let level = deps
                    .iter()
                    .try_fold(0usize, |acc, dep| {
                        level_of.get(dep.as_str()).map(|&l| acc.max(l + 1))
                    });
                // try_fold over an empty iterator yields 0: no deps -> level 0
                if let Some(level) = level {
                    assigned_this_pass.push((id, level));
                }
            }

            if assigned_this_pass.is_empty() {
                return Err(StrataError::CycleDetected {
                    involved: remaining.iter().map(|s| s.to_string()).collect(),
                });
            }

            for &(id, level) in &assigned_this_pass {
                level_of.insert(id.to_string(), level);
                if levels.len() <= level {
                    levels.resize_with(level + 1, Vec::new);
                }
                levels[level].push(id.to_string());
            }
            let assigned: HashSet<&str> = assigned_this_pass.iter().map(|&(id, _)| id).collect();
            remaining.retain(|id| !assigned.contains(id));
        }

        Ok(DependencyGraph {
            dependencies,
            dependents,
            levels,
            level_of,
            order,
        })
    }

    /// Node ids grouped by topological depth.
    pub fn topological_levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    pub fn dependencies(&self, node_id: &str) -> &[String] {
        self.dependencies
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn dependents(&self, node_id: &str) -> &[String] {
        self.dependents
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Nodes with no dependents.
    pub fn leaves(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.dependents(id).is_empty())
            .cloned()
            .collect()
    }

    pub fn level_of(&self, node_id: &str) -> Option<usize> {
        self.level_of.get(node_id).copied()
    }

    pub fn node_count(&self) -> usize {
        self.order.len()
    }

    /// Whether `node_id` transitively depends on any node in `ancestors`.
    pub fn depends_transitively_on(&self, node_id: &str, ancestors: &HashSet<&str>) -> bool {
        let mut stack: Vec<&str> = self.dependencies(node_id).iter().map(String::as_str).collect();
        let mut visited: HashSet<&str> = HashSet::new();
        while let Some(current) = stack.pop() {
            if ancestors.contains(current) {
                return true;
            }
            if visited.insert(current) {
                stack.extend(self.dependencies(current).iter().map(String::as_str));
            }
        }
        false
    }

    /// Advisory check of mapped types along dependency edges.
    ///
    /// Only single-segment reference paths can be checked against the
    /// upstream output schema; deeper paths land inside `dict` values the
    /// grammar cannot see into.
    pub fn schema_alignment(plan: &Plan) -> Vec<SchemaMismatch> {
        let mut mismatches = Vec::new();

        for node in plan.nodes() {
            for (placeholder, mapping) in &node.input_mappings {
                let Some((source, source_path)) = mapping.as_reference() else {
                    continue;
                };
                let Some(expected) = node.input_schema.get(placeholder) else {
                    continue;
                };
                let Some(upstream) = plan.get(source) else {
                    continue;
                };
                if source_path.contains('.') || source_path.is_empty() {
                    continue;
                }
                let Some(found) = upstream.output_schema.get(source_path) else {
                    continue;
                };
                if !found.compatible_with(*expected) {
                    mismatches.push(SchemaMismatch {
                        node_id: node.id.clone(),
                        placeholder: placeholder.clone(),
                        source_node_id: source.to_string(),
                        expected: expected.to_string(),
                        found: found.to_string(),
                    });
                }
            }
        }

        mismatches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{InputMapping, NodeConfig};
    use crate::schema::parse_type;

    fn node(id: &str, deps: &[&str]) -> NodeConfig {
        crate::plan::tests::tool_node(id, "echo", deps)
    }

    fn graph(nodes: Vec<NodeConfig>) -> DependencyGraph {
        DependencyGraph::build(&Plan::new(nodes)).unwrap()
    }

    #[test]
    fn single_node_single_level() {
        let g = graph(vec![node("only", &[])]);
        assert_eq!(g.topological_levels(), &[vec!["only".to_string()]]);
        assert_eq!(g.level_of("only"), Some(0));
        assert_eq!(g.leaves(), vec!["only"]);
    }

    #[test]
    fn diamond_levels() {
        //   a
        //  / \
        // b   c
        //  \ /
        //   d
        let g = graph(vec![
            node("a", &[]),
            node("b", &["a"]),
            node("c", &["a"]),
            node("d", &["b", "c"]),
        ]);
        assert_eq!(
            g.topological_levels(),
            &[
                vec!["a".to_string()],
                vec!["b".to_string(), "c".to_string()],
                vec!["d".to_string()],
            ]
        );
        assert_eq!(g.dependents("a"), &["b".to_string(), "c".to_string()]);
        assert_eq!(g.dependencies("d"), &["b".to_string(), "c".to_string()]);
        assert_eq!(g.leaves(), vec!["d"]);
    }

    #[test]
    fn levels_cover_every_node_exactly_once() {
        let g = graph(vec![
            node("a", &[]),
            node("b", &["a"]),
            node("c", &[]),
            node("d", &["b", "c"]),
            node("e", &["d"]),
        ]);
        let mut seen = std::collections::HashSet::new();
        let mut total = 0;
        for level in g.topological_levels() {
            for id in level {
                assert!(seen.insert(id.clone()), "node {} appears twice", id);
                total += 1;
            }
        }
        assert_eq!(total, g.node_count());
    }

    #[test]
    fn tie_break_is_insertion_order() {
        let g = graph(vec![node("z", &[]), node("a", &[]), node("m", &[])]);
        assert_eq!(
            g.topological_levels()[0],
            vec!["z".to_string(), "a".to_string(), "m".to_string()]
        );
    }

    #[test]
    fn cycle_is_detected_with_involved_nodes() {
        let err = DependencyGraph::build(&Plan::new(vec![
            node("a", &["c"]),
            node("b", &["a"]),
            node("c", &["b"]),
        ]))
        .unwrap_err();
        match err {
            StrataError::CycleDetected { involved } => {
                assert_eq!(involved.len(), 3);
                assert!(involved.contains(&"a".to_string()));
            }
            other => panic!("expected CycleDetected, got {:?}", other),
        }
    }

    #[test]
    fn partial_cycle_reports_only_stuck_nodes() {
        let err = DependencyGraph::build(&Plan::new(vec![
            node("root", &[]),
            node("a", &["b", "root"]),
            node("b", &["a"]),
        ]))
        .unwrap_err();
        match err {
            StrataError::CycleDetected { involved } => {
                assert_eq!(involved.len(), 2);
                assert!(!involved.contains(&"root".to_string()));
            }
            other => panic!("expected CycleDetected, got {:?}", other),
        }
    }

    #[test]
    fn transitive_dependency_query() {
        let g = graph(vec![
            node("a", &[]),
            node("b", &["a"]),
            node("c", &["b"]),
            node("d", &[]),
        ]);
        let failed: HashSet<&str> = ["a"].into_iter().collect();
        assert!(g.depends_transitively_on("c", &failed));
        assert!(g.depends_transitively_on("b", &failed));
        assert!(!g.depends_transitively_on("d", &failed));
    }

    #[test]
    fn schema_alignment_flags_mismatch() {
        let mut upstream = node("a", &[]);
        upstream
            .output_schema
            .insert("count".to_string(), parse_type("str").unwrap());

        let mut downstream = node("b", &["a"]);
        downstream
            .input_schema
            .insert("n".to_string(), parse_type("int").unwrap());
        downstream
            .input_mappings
            .insert("n".to_string(), InputMapping::reference("a", "count"));

        let plan = Plan::new(vec![upstream, downstream]);
        let mismatches = DependencyGraph::schema_alignment(&plan);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].placeholder, "n");
        assert_eq!(mismatches[0].expected, "int");
        assert_eq!(mismatches[0].found, "str");
    }

    #[test]
    fn schema_alignment_accepts_widening() {
        let mut upstream = node("a", &[]);
        upstream
            .output_schema
            .insert("n".to_string(), parse_type("int").unwrap());

        let mut downstream = node("b", &["a"]);
        downstream
            .input_schema
            .insert("n".to_string(), parse_type("float").unwrap());
        downstream
            .input_mappings
            .insert("n".to_string(), InputMapping::reference("a", "n"));

        let plan = Plan::new(vec![upstream, downstream]);
        assert!(DependencyGraph::schema_alignment(&plan).is_empty());
    }

    #[test]
    fn deep_paths_are_not_checked() {
        let mut upstream = node("a", &[]);
        upstream
            .output_schema
            .insert("data".to_string(), parse_type("dict").unwrap());

        let mut downstream = node("b", &["a"]);
        downstream
            .input_schema
            .insert("n".to_string(), parse_type("int").unwrap());
        downstream
            .input_mappings
            .insert("n".to_string(), InputMapping::reference("a", "data.count"));

        let plan = Plan::new(vec![upstream, downstream]);
        assert!(DependencyGraph::schema_alignment(&plan).is_empty());
    }
}
