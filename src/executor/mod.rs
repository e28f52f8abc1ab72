//! The `Executor`: mode selection and the top-level `run` entry point
//! (spec §4.4.1). Everything else in this module is a building block this
//! file composes: `sequential::run_cycle` for `direct`/`chain_of_thought`/
//! `dialectical`, `parallel::run_cycle` when `agent_groups` is configured,
//! `gate_signals`/`services::evaluate_gate` for `auto`, and
//! `distributed` for the remote dispatch contract.

pub mod distributed;
pub mod gate_signals;
pub mod parallel;
pub mod response;
pub mod sequential;

use crate::agent::AgentRegistry;
use crate::config::{ConfigSnapshot, ReasoningMode, UserOverride};
use crate::domain::{ClaimType, QueryState, RawPlan, ScoutMetadata};
use crate::error::{OrchestratorError, ResponseError};
use crate::metrics::CoreMetrics;
use crate::ports::Planner;
use crate::services::{CircuitBreakerConfig, CircuitBreakerService, TokenBudgetManager};
use chrono::Duration;
use futures::channel::mpsc::UnboundedSender;
use response::{QueryResponse, StreamUpdate};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio_util::sync::CancellationToken;

/// Owns the services shared across a query's cycles: the agent registry,
/// the planner, per-agent circuit breakers, the adaptive budget manager, and
/// process counters. One `Executor` can drive many concurrent queries — all
/// of its fields are internally synchronized.
pub struct Executor {
    agents: AgentRegistry,
    planner: Arc<dyn Planner>,
    breaker: CircuitBreakerService,
    budget: TokenBudgetManager,
    metrics: CoreMetrics,
}

impl Executor {
    pub fn new(agents: AgentRegistry, planner: Arc<dyn Planner>, config: &ConfigSnapshot) -> Self {
        Self {
            agents,
            planner,
            breaker: CircuitBreakerService::new(CircuitBreakerConfig {
                failure_threshold: config.circuit_breaker_threshold,
                cooldown: Duration::seconds(config.circuit_breaker_cooldown_secs as i64),
            }),
            budget: TokenBudgetManager::new(config.token_budget, config.adaptive_max_factor, config.adaptive_min_buffer as i64),
            metrics: CoreMetrics::new(),
        }
    }

    pub fn metrics(&self) -> &CoreMetrics {
        &self.metrics
    }

    /// Run a query to completion, dispatching on `config.reasoning_mode`
    /// (spec §4.4.1). Returns the terminal `QueryResponse` built from
    /// whatever claims/errors/metrics accumulated in `state`.
    pub async fn run(&self, state: &QueryState, config: &ConfigSnapshot, cancel: &CancellationToken) -> QueryResponse {
        self.run_inner(state, config, cancel, None).await
    }

    /// Like `run`, but also emits a `StreamUpdate::Cycle` after every
    /// completed cycle, followed by a final `StreamUpdate::Final` once the
    /// query is done (spec §6: `run_query_stream`).
    pub async fn run_streaming(
        &self,
        state: &QueryState,
        config: &ConfigSnapshot,
        cancel: &CancellationToken,
        updates: UnboundedSender<StreamUpdate>,
    ) {
        let response = self.run_inner(state, config, cancel, Some(&updates)).await;
        let _ = updates.unbounded_send(StreamUpdate::Final(response));
    }

    async fn run_inner(
        &self,
        state: &QueryState,
        config: &ConfigSnapshot,
        cancel: &CancellationToken,
        updates: Option<&UnboundedSender<StreamUpdate>>,
    ) -> QueryResponse {
        self.metrics.query_started();
        let query_id = state.query_id().await;
        tracing::info!(query_id = %query_id, mode = ?config.reasoning_mode, "query started");

        self.plan(state).await;

        let outcome = match config.reasoning_mode {
            ReasoningMode::Direct => self.run_direct(state, config, cancel, updates).await,
            ReasoningMode::ChainOfThought => self.run_chain_of_thought(state, config, cancel, updates).await,
            ReasoningMode::Dialectical => self.run_dialectical(state, config, cancel, updates).await,
            ReasoningMode::Auto => self.run_auto(state, config, cancel, updates).await,
        };
        if let Err(err) = outcome {
            tracing::warn!(%err, "query terminated early on a critical error");
        }

        self.metrics.query_completed();
        tracing::info!("query completed");
        self.finalize(state).await
    }

    /// Run a Planner pass and install the resulting `TaskGraph` before any
    /// cycle executes (spec §4.2: "the core creates a `QueryState`, runs a
    /// Planner pass producing a `TaskGraph`, then iterates over `loops`
    /// cycles"). A failing planner falls back to the single-task graph
    /// `TaskGraph::from_raw` already substitutes for an empty plan.
    async fn plan(&self, state: &QueryState) {
        let query_text = state.snapshot().await.query_text;
        match self.planner.plan(&query_text).await {
            Ok(raw) => state.set_task_graph(raw).await,
            Err(err) => {
                tracing::warn!(error = %err.message, "planner failed, falling back to a single-task graph");
                state
                    .record_error(ResponseError::new(err.category, "planner_failed", err.message))
                    .await;
                state.set_task_graph(RawPlan::default()).await;
            }
        }
    }

    /// `direct`: exactly one cycle, `loops` is ignored (spec §4.4.1
    /// scenario 1: "direct mode always produces `loops_used=1`").
    async fn run_direct(
        &self,
        state: &QueryState,
        config: &ConfigSnapshot,
        cancel: &CancellationToken,
        updates: Option<&UnboundedSender<StreamUpdate>>,
    ) -> Result<(), OrchestratorError> {
        self.run_one_cycle(state, config, &config.agents, cancel, updates).await
    }

    /// `chain_of_thought`: the same single-agent order runs `loops` times,
    /// each cycle seeing the claims the previous one produced.
    async fn run_chain_of_thought(
        &self,
        state: &QueryState,
        config: &ConfigSnapshot,
        cancel: &CancellationToken,
        updates: Option<&UnboundedSender<StreamUpdate>>,
    ) -> Result<(), OrchestratorError> {
        for i in 0..config.loops {
            if cancel.is_cancelled() {
                break;
            }
            self.run_one_cycle(state, config, &config.agents, cancel, updates).await?;
            if i + 1 < config.loops {
                state.advance_cycle().await;
            }
        }
        Ok(())
    }

    /// `dialectical`: rotate `[Synthesizer, Contrarian, FactChecker]` (plus
    /// any configured specialists) for `loops` cycles. The Primus pointer
    /// advances between queries, not between loops within one (spec §4.4.1).
    async fn run_dialectical(
        &self,
        state: &QueryState,
        config: &ConfigSnapshot,
        cancel: &CancellationToken,
        updates: Option<&UnboundedSender<StreamUpdate>>,
    ) -> Result<(), OrchestratorError> {
        let primus_index = state.primus_index().await;
        let order = sequential::rotate_from(&config.agents, primus_index);

        for i in 0..config.loops {
            if cancel.is_cancelled() {
                break;
            }
            self.run_one_cycle(state, config, &order, cancel, updates).await?;
            if i + 1 < config.loops {
                state.advance_cycle().await;
            }
        }
        Ok(())
    }

    /// `auto`: a single Synthesizer-only scout cycle, gated by the scout's
    /// synthesis claim; escalates into a dialectical continuation on an
    /// unfavorable gate score, preserving `ScoutMetadata` either way
    /// (spec §4.4.1, §8 "AUTO scout preservation").
    async fn run_auto(
        &self,
        state: &QueryState,
        config: &ConfigSnapshot,
        cancel: &CancellationToken,
        updates: Option<&UnboundedSender<StreamUpdate>>,
    ) -> Result<(), OrchestratorError> {
        let scout_agents = vec!["Synthesizer".to_string()];
        self.run_one_cycle(state, config, &scout_agents, cancel, updates).await?;

        let snapshot = state.snapshot().await;
        let Some(scout_claim) = snapshot
            .claims
            .iter()
            .rev()
            .find(|c| matches!(c.claim_type, ClaimType::Thesis | ClaimType::Synthesis))
        else {
            // No scout claim at all: nothing to gate on, finalize as-is.
            return Ok(());
        };

        let signals = gate_signals::compute(&snapshot.query_text, scout_claim);
        let user_override = config
            .gate
            .user_overrides
            .get(&snapshot.query_id.to_string())
            .copied()
            .unwrap_or(UserOverride::None);
        let outcome = crate::services::evaluate_gate(signals, &config.gate, user_override);

        state
            .set_scout_metadata(ScoutMetadata {
                scout_claim_id: scout_claim.id.clone(),
                escalated: outcome.decision == crate::services::GateDecision::Escalate,
                gate_scores: outcome.component_scores.clone(),
            })
            .await;
        state
            .set_metadata("gate", serde_json::to_value(&outcome).unwrap_or(serde_json::Value::Null))
            .await;

        if outcome.decision == crate::services::GateDecision::Escalate {
            self.metrics.gate_escalation();
            state.advance_cycle().await;
            self.run_dialectical(state, config, cancel, updates).await?;
        }
        Ok(())
    }

    /// Dispatch one cycle to `parallel::run_cycle` when `agent_groups` is
    /// configured, else `sequential::run_cycle` over `agent_order`
    /// (spec §4.4.3: "when `agent_groups` is non-empty, each loop runs all
    /// groups concurrently"). Brackets the cycle with the `TaskCoordinator`:
    /// whatever the current ready-set is goes `running` before the cycle and
    /// `done` after, advancing the task graph's unlock frontier one cycle at
    /// a time (spec §4.3).
    async fn run_one_cycle(
        &self,
        state: &QueryState,
        config: &ConfigSnapshot,
        agent_order: &[String],
        cancel: &CancellationToken,
        updates: Option<&UnboundedSender<StreamUpdate>>,
    ) -> Result<(), OrchestratorError> {
        let active_tools: Vec<String> = agent_order
            .iter()
            .filter_map(|name| self.agents.get(name))
            .flat_map(|agent| agent.declared_tools().to_vec())
            .collect();
        let ready = state.ready_set(&active_tools).await;
        for task in &ready {
            state.mark_task_running(&task.id).await;
        }

        let result = if !config.agent_groups.is_empty() {
            let deadline = StdDuration::from_secs(config.distributed.group_deadline_secs);
            parallel::run_cycle(state, config, &self.agents, deadline, cancel).await
        } else {
            sequential::run_cycle(
                state,
                config,
                &self.agents,
                agent_order,
                &self.breaker,
                &self.budget,
                &self.metrics,
                cancel,
            )
            .await
        };

        for task in &ready {
            state.mark_task_done(&task.id).await;
        }

        if let Some(tx) = updates {
            let snapshot = state.snapshot().await;
            if let Some(latest) = snapshot.metrics.last() {
                let _ = tx.unbounded_send(StreamUpdate::Cycle(latest.clone()));
            }
        }

        result
    }

    /// Build the terminal `QueryResponse` from whatever `state` has
    /// accumulated: the latest synthesis (or thesis) claim as the answer,
    /// its sources as citations, every claim as the reasoning trail
    /// (spec §3/§7).
    async fn finalize(&self, state: &QueryState) -> QueryResponse {
        let snapshot = state.snapshot().await;
        let errors: Vec<crate::error::ResponseError> = snapshot
            .metadata
            .get("errors")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| serde_json::from_value(v.clone()).ok()).collect())
            .unwrap_or_default();

        let answer_claim = snapshot
            .claims
            .iter()
            .rev()
            .find(|c| matches!(c.claim_type, ClaimType::Synthesis | ClaimType::Thesis));

        match answer_claim {
            Some(claim) => {
                let citations = claim
                    .sources
                    .iter()
                    .map(|s| response::Citation {
                        claim_id: claim.id.clone(),
                        url: s.url.clone(),
                    })
                    .collect();
                QueryResponse {
                    answer: claim.content.clone(),
                    citations,
                    reasoning: snapshot.claims,
                    metrics: snapshot.metrics,
                    errors,
                }
            }
            None => QueryResponse::no_answer(&snapshot.query_text, snapshot.claims, snapshot.metrics, errors),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Contrarian, FactChecker, Synthesizer};
    use crate::config::ConfigSnapshot;
    use crate::domain::QueryState;
    use crate::ports::mock::MockLlmAdapter;
    use std::sync::Arc;
    use uuid::Uuid;

    fn llm(text: &str) -> Arc<MockLlmAdapter> {
        Arc::new(MockLlmAdapter {
            response: text.to_string(),
            token_usage: 10,
        })
    }

    fn registry() -> AgentRegistry {
        let mut agents = AgentRegistry::new();
        agents.register(Arc::new(Synthesizer {
            llm: llm("synthesized answer"),
            model: "mock".to_string(),
        }));
        agents.register(Arc::new(Contrarian {
            llm: llm("counterpoint"),
            model: "mock".to_string(),
        }));
        agents.register(Arc::new(FactChecker {
            llm: llm("verified"),
            model: "mock".to_string(),
        }));
        agents
    }

    #[tokio::test]
    async fn direct_mode_runs_exactly_one_cycle_regardless_of_loops() {
        let mut config = ConfigSnapshot::default();
        config.reasoning_mode = ReasoningMode::Direct;
        config.loops = 5;
        config.agents = vec!["Synthesizer".to_string()];

        let state = QueryState::new(Uuid::new_v4(), "what is ownership", 0);
        let executor = Executor::new(registry(), Arc::new(crate::ports::mock::NoopPlanner), &config);
        let response = executor.run(&state, &config, &CancellationToken::new()).await;

        assert_eq!(state.cycle().await, 0);
        assert_eq!(response.answer, "synthesized answer");
    }

    #[tokio::test]
    async fn chain_of_thought_runs_the_configured_loop_count() {
        let mut config = ConfigSnapshot::default();
        config.reasoning_mode = ReasoningMode::ChainOfThought;
        config.loops = 2;
        config.agents = vec!["Synthesizer".to_string()];

        let state = QueryState::new(Uuid::new_v4(), "what is ownership", 0);
        let executor = Executor::new(registry(), Arc::new(crate::ports::mock::NoopPlanner), &config);
        executor.run(&state, &config, &CancellationToken::new()).await;

        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.metrics.len(), 2);
        assert_eq!(state.cycle().await, 1);
    }

    #[tokio::test]
    async fn dialectical_mode_produces_thesis_antithesis_and_verification() {
        let mut config = ConfigSnapshot::default();
        config.reasoning_mode = ReasoningMode::Dialectical;
        config.loops = 1;
        config.agents = vec!["Synthesizer".to_string(), "Contrarian".to_string(), "FactChecker".to_string()];

        let state = QueryState::new(Uuid::new_v4(), "what is ownership", 0);
        let executor = Executor::new(registry(), Arc::new(crate::ports::mock::NoopPlanner), &config);
        executor.run(&state, &config, &CancellationToken::new()).await;

        let snapshot = state.snapshot().await;
        assert!(snapshot.claims.iter().any(|c| c.claim_type == ClaimType::Thesis));
        assert!(snapshot.claims.iter().any(|c| c.claim_type == ClaimType::Antithesis));
        assert!(snapshot.claims.iter().any(|c| c.claim_type == ClaimType::Verification));
    }

    #[tokio::test]
    async fn auto_mode_preserves_scout_metadata_even_when_escalating() {
        let mut config = ConfigSnapshot::default();
        config.reasoning_mode = ReasoningMode::Auto;
        config.loops = 1;
        config.agents = vec!["Synthesizer".to_string(), "Contrarian".to_string(), "FactChecker".to_string()];
        // Short, assertive query with no evidence at all: retrieval overlap
        // stays at 0, well under threshold, forcing an escalation.
        config.gate.retrieval_overlap_threshold = 0.9;

        let state = QueryState::new(Uuid::new_v4(), "is rust memory safe", 0);
        let executor = Executor::new(registry(), Arc::new(crate::ports::mock::NoopPlanner), &config);
        executor.run(&state, &config, &CancellationToken::new()).await;

        let snapshot = state.snapshot().await;
        assert!(snapshot.scout_metadata.is_some());
        assert!(snapshot.scout_metadata.unwrap().escalated);
    }

    #[tokio::test]
    async fn pre_cancelled_token_runs_no_agents_and_still_returns_a_response() {
        let mut config = ConfigSnapshot::default();
        config.reasoning_mode = ReasoningMode::ChainOfThought;
        config.loops = 3;
        config.agents = vec!["Synthesizer".to_string()];

        let state = QueryState::new(Uuid::new_v4(), "cancel me", 0);
        let executor = Executor::new(registry(), Arc::new(crate::ports::mock::NoopPlanner), &config);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let response = executor.run(&state, &config, &cancel).await;

        let snapshot = state.snapshot().await;
        assert!(snapshot.claims.is_empty());
        assert_eq!(response.answer, "No answer found for 'cancel me'.");
    }

    #[tokio::test]
    async fn no_answer_claim_produces_the_fallback_string() {
        let mut config = ConfigSnapshot::default();
        config.reasoning_mode = ReasoningMode::Direct;
        config.agents = vec!["Contrarian".to_string()];

        let state = QueryState::new(Uuid::new_v4(), "orphan query", 0);
        let executor = Executor::new(registry(), Arc::new(crate::ports::mock::NoopPlanner), &config);
        let response = executor.run(&state, &config, &CancellationToken::new()).await;

        assert_eq!(response.answer, "No answer found for 'orphan query'.");
        assert!(response.citations.is_empty());
    }
}
