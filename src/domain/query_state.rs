//! `QueryState` and the `StateRegistry` (spec §4.1), grounded on the
//! teacher's `Arc<RwLock<Inner>>` registry shape (`services/budget_tracker.rs`,
//! `services/circuit_breaker.rs::CircuitBreakerService`) rather than its
//! database-backed domain models — this state lives entirely in memory for
//! the lifetime of one query.

use crate::domain::claim::Claim;
use crate::domain::ready_state::{TaskCoordinator, UnlockEvent};
use crate::domain::task_graph::{RawPlan, TaskGraph};
use crate::error::OrchestratorError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A directed or coalition-broadcast message between agents (spec §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub sender: String,
    /// `None` means a coalition broadcast.
    pub recipient: Option<String>,
    pub content: String,
    pub cycle: u32,
    pub sent_at: DateTime<Utc>,
}

/// An append-only `react_log` entry. Kept loosely typed (`kind` + `detail`)
/// so every subsystem (planner normalization, unlock events, breaker trips,
/// gate decisions) can append through one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactLogEntry {
    pub kind: String,
    pub detail: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// Per-cycle timing/token bookkeeping (feeds `QueryResponse.metrics`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleMetrics {
    pub cycle: u32,
    pub agents_run: Vec<String>,
    pub token_usage: HashMap<String, u64>,
    pub duration_ms: u64,
}

/// Scout-pass bookkeeping, set when AUTO mode runs a scout and retained
/// through escalation (spec §4.4.1, §8 "AUTO scout preservation").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoutMetadata {
    pub scout_claim_id: String,
    pub escalated: bool,
    pub gate_scores: HashMap<String, f64>,
}

/// The immutable, deep-copy read view returned by `QueryState::snapshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryStateSnapshot {
    pub query_id: Uuid,
    pub query_text: String,
    pub cycle: u32,
    pub primus_index: usize,
    pub claims: Vec<Claim>,
    pub messages: Vec<AgentMessage>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub react_log: Vec<ReactLogEntry>,
    pub task_graph: Option<TaskGraph>,
    pub metrics: Vec<CycleMetrics>,
    pub scout_metadata: Option<ScoutMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Inner {
    query_id: Uuid,
    query_text: String,
    cycle: u32,
    primus_index: usize,
    claims: Vec<Claim>,
    messages: Vec<AgentMessage>,
    metadata: HashMap<String, serde_json::Value>,
    react_log: Vec<ReactLogEntry>,
    task_graph: Option<TaskGraph>,
    task_coordinator: Option<TaskCoordinator>,
    metrics: Vec<CycleMetrics>,
    scout_metadata: Option<ScoutMetadata>,
    version: u64,
}

/// Holds all mutable per-query data behind a single async lock. Rather than
/// a literal re-entrant mutex (`tokio::sync::RwLock` is not re-entrant), the
/// discipline from spec §4.1 ("an agent callback that records a sub-event
/// during a parent mutation does not self-deadlock") is achieved by every
/// mutating method taking the lock for exactly one critical section and
/// never awaiting another lock-taking call from inside it.
pub struct QueryState {
    inner: RwLock<Inner>,
}

impl QueryState {
    pub fn new(query_id: Uuid, query_text: impl Into<String>, primus_start: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                query_id,
                query_text: query_text.into(),
                cycle: 0,
                primus_index: primus_start,
                claims: Vec::new(),
                messages: Vec::new(),
                metadata: HashMap::new(),
                react_log: Vec::new(),
                task_graph: None,
                task_coordinator: None,
                metrics: Vec::new(),
                scout_metadata: None,
                version: 0,
            }),
        }
    }

    pub async fn query_id(&self) -> Uuid {
        self.inner.read().await.query_id
    }

    pub async fn cycle(&self) -> u32 {
        self.inner.read().await.cycle
    }

    pub async fn advance_cycle(&self) {
        let mut inner = self.inner.write().await;
        inner.cycle += 1;
        inner.version += 1;
    }

    pub async fn primus_index(&self) -> usize {
        self.inner.read().await.primus_index
    }

    pub async fn set_primus_index(&self, index: usize) {
        let mut inner = self.inner.write().await;
        inner.primus_index = index;
        inner.version += 1;
    }

    /// Append a claim, enforcing id uniqueness.
    pub async fn add_claim(&self, claim: Claim) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.write().await;
        if inner.claims.iter().any(|c| c.id == claim.id) {
            return Err(OrchestratorError::DuplicateClaimId(claim.id));
        }
        inner.claims.push(claim);
        inner.version += 1;
        Ok(())
    }

    /// Replace a claim's content, bumping its version; id is preserved.
    pub async fn update_claim(
        &self,
        id: &str,
        content: String,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.write().await;
        let claim = inner
            .claims
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| OrchestratorError::ClaimNotFound(id.to_string()))?;
        claim.content = content;
        if let Some(metadata) = metadata {
            claim.metadata.extend(metadata);
        }
        claim.version += 1;
        inner.version += 1;
        Ok(())
    }

    /// Normalize a raw planner payload and install it as the current task
    /// graph, recording normalization decisions in `react_log`.
    pub async fn set_task_graph(&self, raw: RawPlan) {
        let mut inner = self.inner.write().await;
        let graph = TaskGraph::from_raw(raw, &inner.query_text);
        let coordinator = TaskCoordinator::from_graph(&graph);

        if graph.fallback {
            inner
                .metadata
                .insert("planner.fallback".to_string(), serde_json::Value::Bool(true));
        }

        let warnings = serde_json::to_value(&graph.warnings).unwrap_or(serde_json::Value::Null);
        let objectives: Vec<&str> = graph.nodes.iter().map(|n| n.objective.as_str()).collect();
        push_react_log(
            &mut inner.react_log,
            "planner.normalization",
            serde_json::json!({
                "warnings": warnings,
                "objectives": objectives,
                "task_count": graph.nodes.len(),
            }),
        );

        inner.task_graph = Some(graph);
        inner.task_coordinator = Some(coordinator);
        inner.version += 1;
    }

    pub async fn add_react_log_entry(&self, kind: impl Into<String>, detail: serde_json::Value) {
        let mut inner = self.inner.write().await;
        push_react_log(&mut inner.react_log, kind, detail);
        inner.version += 1;
    }

    pub async fn record_planner_trace(
        &self,
        prompt: &str,
        raw: &serde_json::Value,
        graph_task_count: usize,
        warnings: &[String],
    ) {
        let mut inner = self.inner.write().await;
        push_react_log(
            &mut inner.react_log,
            "planner.trace",
            serde_json::json!({
                "prompt": prompt,
                "raw": raw,
                "graph_task_count": graph_task_count,
                "warnings": warnings,
            }),
        );
        inner.version += 1;
    }

    pub async fn add_message(&self, message: AgentMessage) {
        let mut inner = self.inner.write().await;
        inner.messages.push(message);
        inner.version += 1;
    }

    pub async fn record_cycle_metrics(&self, metrics: CycleMetrics) {
        let mut inner = self.inner.write().await;
        inner.metrics.push(metrics);
        inner.version += 1;
    }

    pub async fn set_scout_metadata(&self, scout: ScoutMetadata) {
        let mut inner = self.inner.write().await;
        inner.scout_metadata = Some(scout);
        inner.version += 1;
    }

    pub async fn set_metadata(&self, key: impl Into<String>, value: serde_json::Value) {
        let mut inner = self.inner.write().await;
        inner.metadata.insert(key.into(), value);
        inner.version += 1;
    }

    pub async fn record_error(&self, error: crate::error::ResponseError) {
        let mut inner = self.inner.write().await;
        let entry = serde_json::to_value(&error).unwrap_or(serde_json::Value::Null);
        inner
            .metadata
            .entry("errors".to_string())
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));
        if let Some(serde_json::Value::Array(errors)) = inner.metadata.get_mut("errors") {
            errors.push(entry);
        }
        inner.version += 1;
    }

    pub async fn mark_task_running(&self, task_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(coord) = inner.task_coordinator.as_mut() {
            coord.mark_running(task_id);
        }
        inner.version += 1;
    }

    pub async fn mark_task_done(&self, task_id: &str) -> Option<UnlockEvent> {
        let mut inner = self.inner.write().await;
        let cycle = inner.cycle;
        let graph = inner.task_graph.clone();
        let (graph, coord) = match (graph, inner.task_coordinator.as_mut()) {
            (Some(g), Some(c)) => (g, c),
            _ => return None,
        };
        let event = coord.mark_done(&graph, task_id, cycle);
        push_react_log(
            &mut inner.react_log,
            "coordinator.unlock_event",
            serde_json::to_value(&event).unwrap_or(serde_json::Value::Null),
        );
        inner.version += 1;
        Some(event)
    }

    pub async fn mark_task_failed(&self, task_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(coord) = inner.task_coordinator.as_mut() {
            coord.mark_failed(task_id);
        }
        inner.version += 1;
    }

    /// Deterministic ready-set for the current state (spec §4.3).
    pub async fn ready_set(&self, active_tools: &[String]) -> Vec<crate::domain::task_graph::TaskNode> {
        let inner = self.inner.read().await;
        match (&inner.task_graph, &inner.task_coordinator) {
            (Some(graph), Some(coord)) => coord.ready_set(graph, active_tools).into_iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// `merge_from_group`: set-union semantics over claim ids, idempotent on
    /// re-merge, messages concatenated in emission order (spec §4.1, §4.4.3).
    pub async fn merge_from_group(
        &self,
        _group_id: &str,
        claims: Vec<Claim>,
        messages: Vec<AgentMessage>,
    ) {
        let mut inner = self.inner.write().await;
        for claim in claims {
            if !inner.claims.iter().any(|c| c.id == claim.id) {
                inner.claims.push(claim);
            }
        }
        inner.messages.extend(messages);
        inner.version += 1;
    }

    /// A deep-copy, internally-consistent read view.
    pub async fn snapshot(&self) -> QueryStateSnapshot {
        let inner = self.inner.read().await;
        QueryStateSnapshot {
            query_id: inner.query_id,
            query_text: inner.query_text.clone(),
            cycle: inner.cycle,
            primus_index: inner.primus_index,
            claims: inner.claims.clone(),
            messages: inner.messages.clone(),
            metadata: inner.metadata.clone(),
            react_log: inner.react_log.clone(),
            task_graph: inner.task_graph.clone(),
            metrics: inner.metrics.clone(),
            scout_metadata: inner.scout_metadata.clone(),
        }
    }

    /// Serialize for distributed dispatch (spec §4.1).
    pub async fn encode(&self) -> Result<Vec<u8>, OrchestratorError> {
        let inner = self.inner.read().await;
        Ok(serde_json::to_vec(&*inner)?)
    }

    /// Reconstruct a `QueryState` from `encode`'s output.
    pub fn decode(bytes: &[u8]) -> Result<Self, OrchestratorError> {
        let inner: Inner = serde_json::from_slice(bytes)?;
        Ok(Self {
            inner: RwLock::new(inner),
        })
    }
}

fn push_react_log(log: &mut Vec<ReactLogEntry>, kind: impl Into<String>, detail: serde_json::Value) {
    log.push(ReactLogEntry {
        kind: kind.into(),
        detail,
        recorded_at: Utc::now(),
    });
}

/// Maps `query_id` to the authoritative in-process state object.
#[derive(Default)]
pub struct StateRegistry {
    states: RwLock<HashMap<Uuid, Arc<QueryState>>>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, state: Arc<QueryState>) {
        let id = state.query_id().await;
        self.states.write().await.insert(id, state);
    }

    pub async fn get(&self, query_id: Uuid) -> Option<Arc<QueryState>> {
        self.states.read().await.get(&query_id).cloned()
    }

    pub async fn remove(&self, query_id: Uuid) -> Option<Arc<QueryState>> {
        self.states.write().await.remove(&query_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::claim::ClaimType;

    fn state() -> QueryState {
        QueryState::new(Uuid::new_v4(), "test query", 0)
    }

    #[tokio::test]
    async fn duplicate_claim_id_is_rejected() {
        let state = state();
        state
            .add_claim(Claim::new("c1", ClaimType::Thesis, "first", "thesis"))
            .await
            .unwrap();
        let err = state
            .add_claim(Claim::new("c1", ClaimType::Thesis, "second", "thesis"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateClaimId(_)));
    }

    #[tokio::test]
    async fn update_claim_preserves_id_and_bumps_version() {
        let state = state();
        state
            .add_claim(Claim::new("c1", ClaimType::Thesis, "v0", "thesis"))
            .await
            .unwrap();
        state.update_claim("c1", "v1".to_string(), None).await.unwrap();
        let snap = state.snapshot().await;
        let claim = &snap.claims[0];
        assert_eq!(claim.id, "c1");
        assert_eq!(claim.content, "v1");
        assert_eq!(claim.version, 1);
    }

    #[tokio::test]
    async fn merge_from_group_is_idempotent_and_commutative() {
        let state = state();
        let c1 = Claim::new("g1c1", ClaimType::ResearchFindings, "a", "research_findings");
        let c2 = Claim::new("g2c1", ClaimType::ResearchFindings, "b", "research_findings");

        // Group 2 finishes first, then group 1 — merge order is by call order here,
        // the Executor is responsible for calling merge in group-index order.
        state.merge_from_group("g1", vec![c1.clone()], vec![]).await;
        state.merge_from_group("g2", vec![c2.clone()], vec![]).await;
        // Re-merging group 1 is a no-op (idempotent).
        state.merge_from_group("g1", vec![c1], vec![]).await;

        let snap = state.snapshot().await;
        assert_eq!(snap.claims.len(), 2);
        assert_eq!(snap.claims[0].id, "g1c1");
        assert_eq!(snap.claims[1].id, "g2c1");
    }

    #[tokio::test]
    async fn encode_decode_round_trips() {
        let state = state();
        state
            .add_claim(Claim::new("c1", ClaimType::Thesis, "v0", "thesis"))
            .await
            .unwrap();
        let bytes = state.encode().await.unwrap();
        let restored = QueryState::decode(&bytes).unwrap();
        let snap = restored.snapshot().await;
        assert_eq!(snap.claims.len(), 1);
        assert_eq!(snap.claims[0].id, "c1");
    }

    #[tokio::test]
    async fn set_task_graph_records_normalization_entry() {
        let state = state();
        let raw: RawPlan = serde_json::from_value(serde_json::json!({
            "tasks": [{ "id": "a", "objective": "do a" }]
        }))
        .unwrap();
        state.set_task_graph(raw).await;
        let snap = state.snapshot().await;
        assert!(snap.react_log.iter().any(|e| e.kind == "planner.normalization"));
        assert!(snap.task_graph.is_some());
    }
}
