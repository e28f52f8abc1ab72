//! Sequential cycle execution (spec §4.4.2).

use crate::agent::AgentRegistry;
use crate::config::ConfigSnapshot;
use crate::domain::{Claim, ClaimType, QueryState};
use crate::error::{OrchestratorError, ResponseError};
use crate::metrics::CoreMetrics;
use crate::services::{CircuitBreakerService, RecoveryStrategy, TokenBudgetManager, UsageSample};
use chrono::Duration;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Run one cycle's worth of agents, in `agent_order`, against `state`.
/// Implements spec §4.4.2 steps 1-5.
pub async fn run_cycle(
    state: &QueryState,
    config: &ConfigSnapshot,
    agents: &AgentRegistry,
    agent_order: &[String],
    breaker: &CircuitBreakerService,
    budget: &TokenBudgetManager,
    metrics: &CoreMetrics,
    cancel: &CancellationToken,
) -> Result<(), OrchestratorError> {
    let cycle = state.cycle().await;
    let mut agents_run = Vec::new();
    let mut token_usage: HashMap<String, u64> = HashMap::new();

    for agent_name in agent_order {
        if cancel.is_cancelled() {
            break;
        }

        let Some(agent) = agents.get(agent_name) else {
            continue;
        };

        let snapshot = state.snapshot().await;

        // Step 1: precondition.
        if !agent.can_execute(&snapshot, config).await {
            continue;
        }

        // Step 2: circuit breaker.
        if !breaker.allows(agent_name).await {
            metrics.agent_skipped_breaker();
            let claim = diagnostic_claim(
                agent_name,
                "circuit_breaker_open",
                "agent skipped: circuit breaker open",
            );
            state.record_error(ResponseError::new(crate::error::ErrorCategory::Transient, "breaker_skip", "circuit open").with_agent(agent_name.clone())).await;
            if let Err(err) = state.add_claim(claim).await {
                return hard_stop(state, err).await;
            }
            continue;
        }

        // Step 3: budget reservation via prompt compression.
        let current_budget = budget.suggest_budget().await;
        let prompt = TokenBudgetManager::compress_if_needed(&snapshot.query_text, current_budget);
        if prompt.split_whitespace().count() as i64 > current_budget && current_budget <= 1 {
            metrics.agent_skipped_budget();
            let claim = diagnostic_claim(agent_name, "budget_exhausted", "agent skipped: token budget exhausted");
            if let Err(err) = state.add_claim(claim).await {
                return hard_stop(state, err).await;
            }
            continue;
        }

        // Step 4: execute.
        agents_run.push(agent_name.clone());
        match agent.execute(&snapshot, config).await {
            Ok(result) => {
                // Step 5: merge under lock.
                for claim in result.claims {
                    if let Err(err) = state.add_claim(claim).await {
                        return hard_stop(state, err).await;
                    }
                }
                for message in result.messages {
                    if config.messaging_enabled {
                        state.add_message(message).await;
                    }
                }
                *token_usage.entry(agent_name.clone()).or_insert(0) += result.token_usage;
                budget
                    .record_usage(UsageSample {
                        total_used: result.token_usage as i64,
                        per_agent: [(agent_name.clone(), result.token_usage as i64)].into_iter().collect(),
                    })
                    .await;
                breaker.record_success(agent_name).await;
            }
            Err(err) => {
                let category = err.category();
                breaker.record_failure(agent_name, category).await;
                let strategy = RecoveryStrategy::for_category(category, Duration::seconds(1), 0, None);
                let (event, debug) = match &strategy {
                    RecoveryStrategy::RetryWithBackoff { .. } => ("retry_with_backoff", "transient failure, retry scheduled"),
                    RecoveryStrategy::FallbackAgent { .. } => ("fallback_agent", "recoverable failure, fallback substituted"),
                    RecoveryStrategy::FailGracefully => ("fail_gracefully", "critical failure, agent skipped this cycle"),
                };
                tracing::warn!(agent = %agent_name, ?category, event, "agent failed, recovery applied");
                let response_error = ResponseError::new(category, event, err.to_string()).with_agent(agent_name.clone());
                state.record_error(response_error).await;
                let claim = diagnostic_claim(agent_name, event, debug);
                if let Err(err) = state.add_claim(claim).await {
                    return hard_stop(state, err).await;
                }
            }
        }
    }

    state
        .record_cycle_metrics(crate::domain::CycleMetrics {
            cycle,
            agents_run,
            token_usage,
            duration_ms: 0,
        })
        .await;
    metrics.cycle_run();
    Ok(())
}

/// A duplicate claim id (or any other `add_claim` rejection) is a critical,
/// query-terminating error (spec: duplicate ids "surface as hard errors that
/// terminate the query with a `critical` status in `QueryResponse.errors`").
async fn hard_stop(state: &QueryState, err: OrchestratorError) -> Result<(), OrchestratorError> {
    state
        .record_error(ResponseError::new(err.category(), "duplicate_claim_id", err.to_string()))
        .await;
    Err(err)
}

fn diagnostic_claim(agent: &str, event: &str, message: &str) -> Claim {
    let mut claim = Claim::new(
        format!("diag-{}", Uuid::new_v4()),
        ClaimType::Diagnostic,
        message.to_string(),
        "diagnostic",
    );
    claim
        .metadata
        .insert("agent".to_string(), serde_json::Value::String(agent.to_string()));
    claim
        .metadata
        .insert("event".to_string(), serde_json::Value::String(event.to_string()));
    claim
}

/// Rotate `agents` so the agent at `primus_index` comes first; the Primus
/// pointer itself advances between queries, not loops, per spec §4.4.1.
pub fn rotate_from(agents: &[String], primus_index: usize) -> Vec<String> {
    if agents.is_empty() {
        return Vec::new();
    }
    let start = primus_index % agents.len();
    agents[start..].iter().chain(agents[..start].iter()).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotate_from_wraps_around() {
        let agents = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        assert_eq!(rotate_from(&agents, 1), vec!["B", "C", "A"]);
        assert_eq!(rotate_from(&agents, 0), vec!["A", "B", "C"]);
        assert_eq!(rotate_from(&agents, 3), vec!["A", "B", "C"]);
    }
}
