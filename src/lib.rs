//! Dialectical multi-agent research orchestration core.
//!
//! Drives a query through thesis/antithesis/synthesis cycles across a
//! rotating agent roster, with an adaptive token budget, per-agent circuit
//! breakers, and an AUTO-mode gate deciding between a cheap scout pass and
//! full debate. Storage, search, LLM, and transport concerns are reached
//! only through the trait boundaries in [`ports`]; the core never depends
//! on a concrete backend.

pub mod agent;
pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod ports;
pub mod services;

pub use config::ConfigSnapshot;
pub use domain::{Claim, ClaimType, QueryState, StateRegistry};
pub use error::{ErrorCategory, OrchestratorError};
pub use executor::response::{QueryResponse, StreamUpdate};
pub use executor::Executor;
pub use ports::Planner;

use futures::channel::mpsc::UnboundedReceiver;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Run a single query to completion with a fresh `QueryState` (spec §6).
pub async fn run_query(
    query_text: &str,
    config: &ConfigSnapshot,
    agents: agent::AgentRegistry,
    planner: Arc<dyn Planner>,
    cancel: CancellationToken,
) -> QueryResponse {
    let executor = Executor::new(agents, planner, config);
    let state = QueryState::new(Uuid::new_v4(), query_text, config.primus_start);
    executor.run(&state, config, &cancel).await
}

/// Run a query against an existing, possibly-decoded `QueryState` — the
/// entry point distributed workers use to resume a dispatched task
/// (spec §4.4.4).
pub async fn run_query_with_state(
    state: Arc<QueryState>,
    config: &ConfigSnapshot,
    agents: agent::AgentRegistry,
    planner: Arc<dyn Planner>,
    cancel: CancellationToken,
) -> QueryResponse {
    let executor = Executor::new(agents, planner, config);
    executor.run(&state, config, &cancel).await
}

/// Run a query, yielding a `StreamUpdate` after every completed cycle and a
/// final `StreamUpdate::Final` once the query is done (spec §6:
/// "`run_query_stream(query_text, config_snapshot, cancel_ctx) → stream of
/// partial updates`"). The query itself runs on a spawned task; dropping the
/// returned stream before it's exhausted does not cancel it — use `cancel`
/// for that.
pub async fn run_query_stream(
    query_text: &str,
    config: ConfigSnapshot,
    agents: agent::AgentRegistry,
    planner: Arc<dyn Planner>,
    cancel: CancellationToken,
) -> UnboundedReceiver<StreamUpdate> {
    let executor = Arc::new(Executor::new(agents, planner, &config));
    let state = Arc::new(QueryState::new(Uuid::new_v4(), query_text, config.primus_start));
    let (tx, rx) = futures::channel::mpsc::unbounded();

    tokio::spawn(async move {
        executor.run_streaming(&state, &config, &cancel, tx).await;
    });

    rx
}
