//! Parallel-group execution (spec §4.4.3).
//!
//! Each group runs its agents sequentially against a cloned snapshot; the
//! Executor merges group results into the authoritative state once all
//! groups finish (or their deadline passes), in group-index order — never
//! completion order, so the merge is deterministic regardless of which
//! group happens to finish first (spec §8 scenario 4).

use crate::agent::{Agent, AgentRegistry};
use crate::config::ConfigSnapshot;
use crate::domain::query_state::QueryStateSnapshot;
use crate::domain::{AgentMessage, Claim, QueryState};
use crate::error::{OrchestratorError, ResponseError};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio_util::sync::CancellationToken;

/// One group's isolated outcome before merge.
pub struct GroupResult {
    pub group_index: usize,
    pub claims: Vec<Claim>,
    pub messages: Vec<AgentMessage>,
    pub errors: Vec<String>,
    pub abandoned: bool,
}

/// Run every group concurrently against a read-only snapshot of `state`,
/// then merge results back in group-index order.
pub async fn run_cycle(
    state: &QueryState,
    config: &ConfigSnapshot,
    agents: &AgentRegistry,
    group_deadline: StdDuration,
    cancel: &CancellationToken,
) -> Result<(), OrchestratorError> {
    let snapshot = state.snapshot().await;

    let tasks = config.agent_groups.iter().enumerate().map(|(group_index, names)| {
        let resolved: Vec<Arc<dyn Agent>> = names.iter().filter_map(|n| agents.get(n)).collect();
        let snapshot = snapshot.clone();
        let config = config.clone();
        let cancel = cancel.clone();
        async move { run_group(group_index, &resolved, &snapshot, &config, &cancel).await }
    });

    let deadline_tasks = tasks.map(|fut| {
        let deadline = group_deadline;
        async move {
            match tokio::time::timeout(deadline, fut).await {
                Ok(result) => result,
                Err(_) => GroupResult {
                    group_index: usize::MAX,
                    claims: Vec::new(),
                    messages: Vec::new(),
                    errors: vec!["group deadline exceeded".to_string()],
                    abandoned: true,
                },
            }
        }
    });

    let mut results: Vec<GroupResult> = futures::future::join_all(deadline_tasks).await;
    results.sort_by_key(|r| r.group_index);

    for result in results {
        let group_id = format!("group-{}", result.group_index);
        if !result.abandoned {
            state.merge_from_group(&group_id, result.claims, result.messages).await;
        }
        for error in result.errors {
            let claim = Claim::new(
                format!("diag-{group_id}-{}", uuid::Uuid::new_v4()),
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
    }
    Ok(())
}

/// Execute one group's agents sequentially against a cloned snapshot
/// (spec §4.4.3 step 1); the group's local claims never touch shared state
/// until the caller merges them.
async fn run_group(
    group_index: usize,
    group_agents: &[Arc<dyn Agent>],
    snapshot: &QueryStateSnapshot,
    config: &ConfigSnapshot,
    cancel: &CancellationToken,
) -> GroupResult {
    let mut local = snapshot.clone();
    let mut claims = Vec::new();
    let mut messages = Vec::new();
    let mut errors = Vec::new();

    for agent in group_agents {
        if cancel.is_cancelled() {
            break;
        }
        if !agent.can_execute(&local, config).await {
            continue;
        }
        match agent.execute(&local, config).await {
            Ok(result) => {
                local.claims.extend(result.claims.clone());
                claims.extend(result.claims);
                messages.extend(result.messages);
            }
            Err(err) => errors.push(format!("{}: {err}", agent.name())),
        }
    }

    GroupResult {
        group_index,
        claims,
        messages,
        errors,
        abandoned: false,
    }
}
