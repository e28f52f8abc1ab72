//! Agent protocol & messaging (spec §4.8).
//!
//! The capability set is an `async_trait`, matching the teacher's
//! port-trait convention (`domain/ports/*.rs`: `async_trait`-based
//! capabilities implemented by swappable adapters). Built-in agent kinds
//! are ordinary `Agent` implementations registered by name in
//! `AgentRegistry`, mirroring the teacher's name-keyed
//! `infrastructure/substrates/registry.rs` pattern, so hosts can add custom
//! agent kinds without an exhaustive enum in the core.

use crate::domain::query_state::QueryStateSnapshot;
use crate::domain::{AgentMessage, Claim};
use crate::config::ConfigSnapshot;
use crate::error::OrchestratorError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// The result of one agent invocation (spec §4.4.2 step 4).
#[derive(Debug, Clone, Default)]
pub struct AgentResult {
    pub claims: Vec<Claim>,
    pub messages: Vec<AgentMessage>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub token_usage: u64,
}

/// Every agent is polymorphic over this capability set. Agents are
/// side-effect-free with respect to global state: all state changes happen
/// through the Executor's merge step, never inside `execute`.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn declared_tools(&self) -> &[String];

    /// Precondition check (e.g. Contrarian requires a thesis claim).
    async fn can_execute(&self, state: &QueryStateSnapshot, config: &ConfigSnapshot) -> bool;

    async fn execute(&self, state: &QueryStateSnapshot, config: &ConfigSnapshot) -> Result<AgentResult, OrchestratorError>;
}

/// Name-keyed registry of available agents (mirrors the teacher's
/// substrate/provider registries).
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.name().to_string(), agent);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }
}

pub mod builtin;

pub use builtin::{Contrarian, DomainSpecialist, FactChecker, Synthesizer};
