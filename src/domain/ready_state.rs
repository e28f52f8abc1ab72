//! `ReadyState` and the `TaskCoordinator`'s deterministic scheduling
//! function (spec §4.3), grounded on the teacher's `TaskDag::is_ready`
//! readiness check but reworked as a pure function of a status map instead
//! of a database query.

use crate::domain::task_graph::TaskGraph;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyState {
    pub depth: usize,
    pub status: TaskStatus,
    pub unlocked_at_cycle: Option<u32>,
}

/// An `unlock_event` appended to `react_log` on every status transition
/// (spec §4.3: "lists every node whose `depends_on` becomes satisfied").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockEvent {
    pub trigger_task_id: String,
    pub unlocked_task_ids: Vec<String>,
    pub cycle: u32,
}

/// Per-query scheduling state: one `ReadyState` per task graph node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskCoordinator {
    pub ready_states: HashMap<String, ReadyState>,
}

impl TaskCoordinator {
    /// Initialize ready-states from a freshly normalized graph: nodes with
    /// no dependencies start `ready`, everything else starts `pending`.
    pub fn from_graph(graph: &TaskGraph) -> Self {
        let depths = graph.depths();
        let mut ready_states = HashMap::new();
        for node in &graph.nodes {
            let status = if node.depends_on.is_empty() {
                TaskStatus::Ready
            } else {
                TaskStatus::Pending
            };
            ready_states.insert(
                node.id.clone(),
                ReadyState {
                    depth: depths[&node.id],
                    status,
                    unlocked_at_cycle: if status == TaskStatus::Ready { Some(0) } else { None },
                },
            );
        }
        Self { ready_states }
    }

    /// Deterministic ready-set ordering (spec §4.3):
    /// ascending depth, descending max affinity over `active_tools`, ascending task_index.
    pub fn ready_set<'a>(&self, graph: &'a TaskGraph, active_tools: &[String]) -> Vec<&'a crate::domain::task_graph::TaskNode> {
        let mut ready: Vec<&crate::domain::task_graph::TaskNode> = graph
            .nodes
            .iter()
            .filter(|n| {
                matches!(
                    self.ready_states.get(&n.id).map(|s| s.status),
                    Some(TaskStatus::Pending) | Some(TaskStatus::Ready)
                ) && n.depends_on.iter().all(|dep| {
                    matches!(self.ready_states.get(dep).map(|s| s.status), Some(TaskStatus::Done))
                })
            })
            .collect();

        ready.sort_by(|a, b| {
            let depth_a = self.ready_states[&a.id].depth;
            let depth_b = self.ready_states[&b.id].depth;
            let aff_a = max_affinity(a, active_tools);
            let aff_b = max_affinity(b, active_tools);
            depth_a
                .cmp(&depth_b)
                .then(aff_b.partial_cmp(&aff_a).unwrap_or(std::cmp::Ordering::Equal))
                .then(a.task_index.cmp(&b.task_index))
        });

        ready
    }

    fn unlocked_by(&self, graph: &TaskGraph, completed_id: &str) -> Vec<String> {
        graph
            .nodes
            .iter()
            .filter(|n| n.depends_on.iter().any(|d| d == completed_id))
            .filter(|n| {
                n.depends_on.iter().all(|dep| {
                    dep == completed_id
                        || matches!(self.ready_states.get(dep).map(|s| s.status), Some(TaskStatus::Done))
                })
            })
            .map(|n| n.id.clone())
            .collect()
    }

    pub fn mark_running(&mut self, id: &str) {
        if let Some(state) = self.ready_states.get_mut(id) {
            state.status = TaskStatus::Running;
        }
    }

    pub fn mark_done(&mut self, graph: &TaskGraph, id: &str, cycle: u32) -> UnlockEvent {
        let unlocked = self.unlocked_by(graph, id);
        if let Some(state) = self.ready_states.get_mut(id) {
            state.status = TaskStatus::Done;
        }
        for unlocked_id in &unlocked {
            if let Some(state) = self.ready_states.get_mut(unlocked_id) {
                state.status = TaskStatus::Ready;
                state.unlocked_at_cycle = Some(cycle);
            }
        }
        UnlockEvent {
            trigger_task_id: id.to_string(),
            unlocked_task_ids: unlocked,
            cycle,
        }
    }

    pub fn mark_failed(&mut self, id: &str) {
        if let Some(state) = self.ready_states.get_mut(id) {
            state.status = TaskStatus::Failed;
        }
    }
}

fn max_affinity(node: &crate::domain::task_graph::TaskNode, active_tools: &[String]) -> f64 {
    active_tools
        .iter()
        .filter_map(|tool| node.affinity.get(tool))
        .copied()
        .fold(0.0_f64, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task_graph::{RawPlan, TaskGraph};
    use serde_json::json;

    fn graph() -> TaskGraph {
        let raw: RawPlan = serde_json::from_value(json!({
            "tasks": [
                { "id": "a", "objective": "a" },
                { "id": "b", "objective": "b", "depends_on": ["a"] },
                { "id": "c", "objective": "c", "depends_on": ["a"] },
            ]
        }))
        .unwrap();
        TaskGraph::from_raw(raw, "fallback")
    }

    #[test]
    fn initial_ready_set_is_only_root() {
        let graph = graph();
        let coord = TaskCoordinator::from_graph(&graph);
        let ready = coord.ready_set(&graph, &[]);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "a");
    }

    #[test]
    fn ready_set_is_deterministic_and_orders_by_task_index_on_ties() {
        let graph = graph();
        let mut coord = TaskCoordinator::from_graph(&graph);
        coord.mark_running("a");
        let event = coord.mark_done(&graph, "a", 0);
        assert_eq!(event.unlocked_task_ids, vec!["b".to_string(), "c".to_string()]);

        let ready1 = coord.ready_set(&graph, &[]);
        let ready2 = coord.ready_set(&graph, &[]);
        let ids1: Vec<&str> = ready1.iter().map(|n| n.id.as_str()).collect();
        let ids2: Vec<&str> = ready2.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids1, ids2);
        assert_eq!(ids1, vec!["b", "c"]);
    }

    #[test]
    fn mark_failed_removes_node_from_ready_set() {
        let graph = graph();
        let mut coord = TaskCoordinator::from_graph(&graph);
        coord.mark_failed("a");
        let ready = coord.ready_set(&graph, &[]);
        assert!(ready.is_empty());
    }
}
