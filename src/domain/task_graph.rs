//! Planner output and the typed task DAG (spec §4.2), grounded on the
//! teacher's `TaskDag`/`DagNode` shape (`domain/models/dag.rs`) and cycle
//! detection via DFS, adapted to the planner's normalization rules and a
//! deterministic `task_index` assignment instead of database-backed tasks.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A single node in the planner's raw, unvalidated output.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTaskNode {
    pub id: String,
    pub objective: String,
    #[serde(default)]
    pub tools: RawStringList,
    #[serde(default)]
    pub depends_on: RawStringList,
    #[serde(default)]
    pub exit_criteria: Option<String>,
    #[serde(default)]
    pub affinity: HashMap<String, f64>,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// A planner field that may arrive as a bare string or a list (normalization
/// rule 1: "coerce scalar strings to single-element lists").
#[derive(Debug, Clone, Default)]
pub struct RawStringList(pub Vec<String>);

impl<'de> Deserialize<'de> for RawStringList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Shape {
            One(String),
            Many(Vec<String>),
        }
        Ok(match Shape::deserialize(deserializer)? {
            Shape::One(s) => RawStringList(vec![s]),
            Shape::Many(v) => RawStringList(v),
        })
    }
}

/// The planner's raw payload: `{ tasks: [...] }`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPlan {
    #[serde(default)]
    pub tasks: Vec<RawTaskNode>,
}

/// A normalized node in the task DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: String,
    pub objective: String,
    pub tools: Vec<String>,
    pub depends_on: Vec<String>,
    pub exit_criteria: Option<String>,
    pub affinity: HashMap<String, f64>,
    pub explanation: Option<String>,
    /// Deterministic insertion-order index (normalization rule 5).
    pub task_index: usize,
}

/// A warning recorded during normalization, surfaced via `react_log` as a
/// `planner.normalization` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationWarning {
    pub task_id: String,
    pub reason: String,
}

/// The normalized, acyclic task DAG held by `QueryState`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskGraph {
    pub nodes: Vec<TaskNode>,
    pub warnings: Vec<NormalizationWarning>,
    /// Set when the planner returned no parseable tasks and a synthetic
    /// single-task graph was substituted (spec §4.2 "Failure").
    pub fallback: bool,
}

impl TaskGraph {
    /// Normalize a raw planner payload into an acyclic `TaskGraph`.
    ///
    /// Rules applied in order (spec §4.2):
    /// 1. scalar->list coercion happens during deserialization of `RawTaskNode`.
    /// 2. drop dangling `depends_on` entries.
    /// 3. detect cycles by DFS, drop the latest back-edge.
    /// 4. default missing `affinity`/`tools`.
    /// 5. assign `task_index` in insertion order.
    pub fn from_raw(raw: RawPlan, fallback_objective: &str) -> Self {
        if raw.tasks.is_empty() {
            return Self::fallback_graph(fallback_objective);
        }

        let known_ids: HashSet<String> = raw.tasks.iter().map(|t| t.id.clone()).collect();
        let mut warnings = Vec::new();

        let mut nodes: Vec<TaskNode> = raw
            .tasks
            .into_iter()
            .enumerate()
            .map(|(task_index, raw_node)| {
                let mut depends_on = Vec::new();
                for dep in raw_node.depends_on.0 {
                    if known_ids.contains(&dep) && dep != raw_node.id {
                        depends_on.push(dep);
                    } else {
                        warnings.push(NormalizationWarning {
                            task_id: raw_node.id.clone(),
                            reason: format!("dropped dangling dependency: {dep}"),
                        });
                    }
                }
                TaskNode {
                    id: raw_node.id,
                    objective: raw_node.objective,
                    tools: raw_node.tools.0,
                    depends_on,
                    exit_criteria: raw_node.exit_criteria,
                    affinity: raw_node.affinity,
                    explanation: raw_node.explanation,
                    task_index,
                }
            })
            .collect();

        break_cycles(&mut nodes, &mut warnings);

        if nodes.is_empty() {
            return Self::fallback_graph(fallback_objective);
        }

        Self {
            nodes,
            warnings,
            fallback: false,
        }
    }

    fn fallback_graph(objective: &str) -> Self {
        Self {
            nodes: vec![TaskNode {
                id: "root".to_string(),
                objective: objective.to_string(),
                tools: Vec::new(),
                depends_on: Vec::new(),
                exit_criteria: None,
                affinity: HashMap::new(),
                explanation: None,
                task_index: 0,
            }],
            warnings: Vec::new(),
            fallback: true,
        }
    }

    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Longest dependency-chain depth to a root, for every node.
    pub fn depths(&self) -> HashMap<String, usize> {
        let mut depths = HashMap::new();
        let by_id: HashMap<&str, &TaskNode> = self.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        fn depth_of<'a>(
            id: &'a str,
            by_id: &HashMap<&'a str, &'a TaskNode>,
            memo: &mut HashMap<String, usize>,
        ) -> usize {
            if let Some(&d) = memo.get(id) {
                return d;
            }
            let node = match by_id.get(id) {
                Some(n) => n,
                None => return 0,
            };
            let d = node
                .depends_on
                .iter()
                .map(|dep| depth_of(dep, by_id, memo) + 1)
                .max()
                .unwrap_or(0);
            memo.insert(id.to_string(), d);
            d
        }

        for node in &self.nodes {
            let d = depth_of(&node.id, &by_id, &mut depths);
            depths.insert(node.id.clone(), d);
        }
        depths
    }

    pub fn has_cycle(&self) -> bool {
        let by_id: HashMap<&str, &TaskNode> = self.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let mut visited = HashSet::new();
        let mut stack = HashSet::new();
        for node in &self.nodes {
            if detect_cycle_dfs(&node.id, &by_id, &mut visited, &mut stack) {
                return true;
            }
        }
        false
    }
}

fn detect_cycle_dfs<'a>(
    id: &'a str,
    by_id: &HashMap<&'a str, &'a TaskNode>,
    visited: &mut HashSet<String>,
    stack: &mut HashSet<String>,
) -> bool {
    if stack.contains(id) {
        return true;
    }
    if visited.contains(id) {
        return false;
    }
    visited.insert(id.to_string());
    stack.insert(id.to_string());
    if let Some(node) = by_id.get(id) {
        for dep in &node.depends_on {
            if detect_cycle_dfs(dep, by_id, visited, stack) {
                return true;
            }
        }
    }
    stack.remove(id);
    false
}

/// Detect cycles and drop the latest back-edge causing each, recording a
/// warning, until the graph is acyclic.
fn break_cycles(nodes: &mut [TaskNode], warnings: &mut Vec<NormalizationWarning>) {
    loop {
        let by_id: HashMap<String, usize> = nodes.iter().enumerate().map(|(i, n)| (n.id.clone(), i)).collect();
        let mut visited = HashSet::new();
        let mut stack: Vec<String> = Vec::new();
        let mut found = None;

        for node in nodes.iter() {
            if find_back_edge(&node.id, nodes, &by_id, &mut visited, &mut stack, &mut found) {
                break;
            }
        }

        match found {
            Some((from, to)) => {
                let idx = by_id[&from];
                nodes[idx].depends_on.retain(|d| d != &to);
                warnings.push(NormalizationWarning {
                    task_id: from,
                    reason: format!("dropped back-edge to {to} to break cycle"),
                });
            }
            None => break,
        }
    }
}

fn find_back_edge(
    id: &str,
    nodes: &[TaskNode],
    by_id: &HashMap<String, usize>,
    visited: &mut HashSet<String>,
    stack: &mut Vec<String>,
    found: &mut Option<(String, String)>,
) -> bool {
    if found.is_some() {
        return true;
    }
    if stack.contains(&id.to_string()) {
        // The edge we just traversed (stack.last() -> id) is the latest back-edge.
        if let Some(from) = stack.last() {
            *found = Some((from.clone(), id.to_string()));
        }
        return true;
    }
    if visited.contains(id) {
        return false;
    }
    visited.insert(id.to_string());
    stack.push(id.to_string());
    if let Some(&idx) = by_id.get(id) {
        for dep in &nodes[idx].depends_on {
            if find_back_edge(dep, nodes, by_id, visited, stack, found) {
                stack.pop();
                return true;
            }
        }
    }
    stack.pop();
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(tasks: serde_json::Value) -> RawPlan {
        serde_json::from_value(json!({ "tasks": tasks })).unwrap()
    }

    #[test]
    fn scalar_depends_on_is_coerced_to_list() {
        let raw = raw(json!([
            { "id": "a", "objective": "do a" },
            { "id": "b", "objective": "do b", "depends_on": "a" },
        ]));
        let graph = TaskGraph::from_raw(raw, "fallback");
        assert_eq!(graph.node("b").unwrap().depends_on, vec!["a".to_string()]);
    }

    #[test]
    fn dangling_dependency_is_dropped_with_warning() {
        let raw = raw(json!([
            { "id": "a", "objective": "do a", "depends_on": ["ghost"] },
        ]));
        let graph = TaskGraph::from_raw(raw, "fallback");
        assert!(graph.node("a").unwrap().depends_on.is_empty());
        assert_eq!(graph.warnings.len(), 1);
    }

    #[test]
    fn cycle_is_broken_and_graph_acyclic() {
        let raw = raw(json!([
            { "id": "a", "objective": "a", "depends_on": ["b"] },
            { "id": "b", "objective": "b", "depends_on": ["a"] },
        ]));
        let graph = TaskGraph::from_raw(raw, "fallback");
        assert!(!graph.has_cycle());
        assert!(!graph.warnings.is_empty());
    }

    #[test]
    fn empty_plan_falls_back_to_single_root_task() {
        let graph = TaskGraph::from_raw(RawPlan::default(), "the query text");
        assert!(graph.fallback);
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.nodes[0].id, "root");
        assert_eq!(graph.nodes[0].objective, "the query text");
    }

    #[test]
    fn task_index_is_insertion_order() {
        let raw = raw(json!([
            { "id": "a", "objective": "a" },
            { "id": "b", "objective": "b" },
        ]));
        let graph = TaskGraph::from_raw(raw, "fallback");
        assert_eq!(graph.node("a").unwrap().task_index, 0);
        assert_eq!(graph.node("b").unwrap().task_index, 1);
    }

    #[test]
    fn depths_follow_longest_chain() {
        let raw = raw(json!([
            { "id": "a", "objective": "a" },
            { "id": "b", "objective": "b", "depends_on": ["a"] },
            { "id": "c", "objective": "c", "depends_on": ["b"] },
        ]));
        let graph = TaskGraph::from_raw(raw, "fallback");
        let depths = graph.depths();
        assert_eq!(depths["a"], 0);
        assert_eq!(depths["b"], 1);
        assert_eq!(depths["c"], 2);
    }
}
