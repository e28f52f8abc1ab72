//! Remote/distributed dispatch contract (spec §4.4.4).
//!
//! The core never implements a concrete process/ray/redis worker — those
//! are external collaborators (spec §1) reached through the [`Broker`]
//! port. This module only encodes the dispatch *contract*: serialize a
//! `(state_snapshot, task_spec)` pair, publish it, and merge whatever the
//! worker returns back under lock, at-most-once per task id.

use crate::domain::query_state::QueryStateSnapshot;
use crate::domain::{AgentMessage, Claim, QueryState};
use crate::error::ResponseError;
use crate::ports::{AdapterError, Broker};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_id: String,
    pub agent_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchEnvelope {
    pub state_snapshot: Vec<u8>,
    pub task_spec: TaskSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResult {
    pub task_id: String,
    pub claims: Vec<Claim>,
    pub messages: Vec<AgentMessage>,
    pub token_usage: u64,
    pub error: Option<String>,
}

/// Tracks delivered task ids so re-delivery is a no-op (at-most-once
/// delivery, spec §4.4.4).
#[derive(Default)]
pub struct DeliveryLedger {
    delivered: Mutex<HashSet<String>>,
}

impl DeliveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    async fn already_delivered(&self, task_id: &str) -> bool {
        !self.delivered.lock().await.insert(task_id.to_string())
    }
}

/// Dispatch a single task to a broker queue and merge its eventual result
/// back into `state` under lock. Returns `Ok(true)` if the task was
/// actually dispatched, `Ok(false)` if it was a duplicate delivery.
pub async fn dispatch_task(
    state: &QueryState,
    broker: &dyn Broker,
    ledger: &DeliveryLedger,
    queue: &str,
    spec: TaskSpec,
) -> Result<bool, AdapterError> {
    if ledger.already_delivered(&spec.task_id).await {
        return Ok(false);
    }

    let snapshot_bytes = state.encode().await.map_err(|e| AdapterError {
        category: crate::error::ErrorCategory::Critical,
        message: e.to_string(),
    })?;

    let envelope = DispatchEnvelope {
        state_snapshot: snapshot_bytes,
        task_spec: spec.clone(),
    };
    broker
        .put(queue, serde_json::to_value(&envelope).unwrap_or(serde_json::Value::Null))
        .await?;

    if let Some(value) = broker.get(queue).await? {
        if let Ok(result) = serde_json::from_value::<DispatchResult>(value) {
            merge_result(state, result).await.map_err(|e| AdapterError {
                category: e.category(),
                message: e.to_string(),
            })?;
        }
    }

    Ok(true)
}

async fn merge_result(state: &QueryState, result: DispatchResult) -> Result<(), crate::error::OrchestratorError> {
    let group_id = format!("remote-{}", result.task_id);
    state.merge_from_group(&group_id, result.claims, result.messages).await;
    if let Some(error) = result.error {
        let claim = Claim::new(
            format!("diag-remote-{}", result.task_id),
            crate::domain::ClaimType::Diagnostic,
            error,
            "diagnostic",
        );
        if let Err(err) = state.add_claim(claim).await {
            state
                .record_error(ResponseError::new(err.category(), "duplicate_claim_id", err.to_string()))
                .await;
            return Err(err);
        }
    }
    Ok(())
}

/// `O(M/P + P)` shutdown: drain every queue up to `max_drain` messages and
/// report how many were flushed, so callers can join workers once drained.
pub async fn drain_queue(broker: &dyn Broker, queue: &str, max_drain: usize) -> Result<usize, AdapterError> {
    let mut drained = 0;
    while drained < max_drain {
        match broker.get(queue).await? {
            Some(_) => drained += 1,
            None => break,
        }
    }
    Ok(drained)
}

#[allow(dead_code)]
fn _assert_snapshot_is_cloneable(s: &QueryStateSnapshot) -> QueryStateSnapshot {
    s.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::AdapterError as PortAdapterError;
    use async_trait::async_trait;
    use tokio::sync::Mutex as TokioMutex;
    use uuid::Uuid;

    struct InMemoryBroker {
        queues: TokioMutex<std::collections::HashMap<String, Vec<serde_json::Value>>>,
    }

    impl InMemoryBroker {
        fn new() -> Self {
            Self {
                queues: TokioMutex::new(std::collections::HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl Broker for InMemoryBroker {
        async fn publish(&self, _message: serde_json::Value) -> Result<(), PortAdapterError> {
            Ok(())
        }

        async fn put(&self, queue: &str, message: serde_json::Value) -> Result<(), PortAdapterError> {
            self.queues.lock().await.entry(queue.to_string()).or_default().push(message);
            Ok(())
        }

        async fn get(&self, queue: &str) -> Result<Option<serde_json::Value>, PortAdapterError> {
            Ok(self.queues.lock().await.get_mut(queue).and_then(|q| if q.is_empty() { None } else { Some(q.remove(0)) }))
        }
    }

    #[tokio::test]
    async fn redelivery_of_same_task_id_is_a_no_op() {
        let state = QueryState::new(Uuid::new_v4(), "q", 0);
        let broker = InMemoryBroker::new();
        let ledger = DeliveryLedger::new();
        let spec = TaskSpec {
            task_id: "t1".to_string(),
            agent_name: "Synthesizer".to_string(),
        };

        let first = dispatch_task(&state, &broker, &ledger, "q", spec.clone()).await.unwrap();
        let second = dispatch_task(&state, &broker, &ledger, "q", spec).await.unwrap();
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn drain_queue_counts_messages_until_empty() {
        let broker = InMemoryBroker::new();
        broker.put("q", serde_json::json!({"a": 1})).await.unwrap();
        broker.put("q", serde_json::json!({"a": 2})).await.unwrap();
        let drained = drain_queue(&broker, "q", 10).await.unwrap();
        assert_eq!(drained, 2);
    }
}
