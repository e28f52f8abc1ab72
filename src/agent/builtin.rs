//! Built-in agent kinds (spec §4.8 names four of the ten variants that the
//! `direct`/`chain_of_thought`/`dialectical` modes actually drive;
//! Researcher/Planner/Critic/Summarizer/Moderator/UserAgent are left to
//! hosts since the core treats them identically through the `Agent` trait).

use crate::agent::{Agent, AgentResult};
use crate::config::{ConfigSnapshot, ReasoningMode};
use crate::domain::query_state::QueryStateSnapshot;
use crate::domain::{Claim, ClaimType};
use crate::error::{ErrorCategory, OrchestratorError};
use crate::ports::LlmAdapter;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

fn claim_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

/// Produces the thesis/synthesis claim; the only agent `direct` mode runs.
pub struct Synthesizer {
    pub llm: Arc<dyn LlmAdapter>,
    pub model: String,
}

#[async_trait]
impl Agent for Synthesizer {
    fn name(&self) -> &str {
        "Synthesizer"
    }

    fn declared_tools(&self) -> &[String] {
        &[]
    }

    async fn can_execute(&self, _state: &QueryStateSnapshot, _config: &ConfigSnapshot) -> bool {
        true
    }

    async fn execute(&self, state: &QueryStateSnapshot, config: &ConfigSnapshot) -> Result<AgentResult, OrchestratorError> {
        let response = self
            .llm
            .generate(&state.query_text, &config.llm_backend, config.token_budget)
            .await
            .map_err(|e| OrchestratorError::Adapter {
                category: e.category,
                message: e.message,
            })?;

        // `direct` runs the Synthesizer exactly once with no debate to
        // conclude, and the AUTO scout pass is the same single-shot call
        // before any escalation has happened (`scout_metadata` unset) — both
        // produce a synthesis outright rather than waiting on claim history.
        // `chain_of_thought`/`dialectical`, and AUTO's escalated continuation
        // (`scout_metadata` already set), key off whether a thesis already
        // exists in the debate so far.
        let single_shot_synthesis = match config.reasoning_mode {
            ReasoningMode::Direct => true,
            ReasoningMode::Auto => state.scout_metadata.is_none(),
            ReasoningMode::ChainOfThought | ReasoningMode::Dialectical => false,
        };
        let phase = if single_shot_synthesis || state.claims.iter().any(|c| c.claim_type == ClaimType::Thesis) {
            "synthesis"
        } else {
            "thesis"
        };
        let claim_type = if phase == "synthesis" { ClaimType::Synthesis } else { ClaimType::Thesis };

        Ok(AgentResult {
            claims: vec![Claim::new(claim_id("synth"), claim_type, response.text, phase)],
            messages: Vec::new(),
            metadata: Default::default(),
            token_usage: response.token_usage,
        })
    }
}

/// Produces an antithesis claim; requires a thesis to contest (spec §4.4.2
/// step 1: "Contrarian requires a thesis claim").
pub struct Contrarian {
    pub llm: Arc<dyn LlmAdapter>,
    pub model: String,
}

#[async_trait]
impl Agent for Contrarian {
    fn name(&self) -> &str {
        "Contrarian"
    }

    fn declared_tools(&self) -> &[String] {
        &[]
    }

    async fn can_execute(&self, state: &QueryStateSnapshot, _config: &ConfigSnapshot) -> bool {
        // A scout synthesis stands in for a thesis once AUTO mode escalates
        // (spec: "subsequent dialectical loops treat the scout synthesis as
        // the current thesis").
        state
            .claims
            .iter()
            .any(|c| matches!(c.claim_type, ClaimType::Thesis | ClaimType::Synthesis))
    }

    async fn execute(&self, state: &QueryStateSnapshot, config: &ConfigSnapshot) -> Result<AgentResult, OrchestratorError> {
        let thesis = state
            .claims
            .iter()
            .rev()
            .find(|c| matches!(c.claim_type, ClaimType::Thesis | ClaimType::Synthesis))
            .map(|c| c.content.as_str())
            .unwrap_or_default();

        let response = self
            .llm
            .generate(&format!("Challenge: {thesis}"), &config.llm_backend, config.token_budget)
            .await
            .map_err(|e| OrchestratorError::Adapter {
                category: e.category,
                message: e.message,
            })?;

        Ok(AgentResult {
            claims: vec![Claim::new(claim_id("anti"), ClaimType::Antithesis, response.text, "antithesis")],
            messages: Vec::new(),
            metadata: Default::default(),
            token_usage: response.token_usage,
        })
    }
}

/// Produces a verification claim over the existing dialogue.
pub struct FactChecker {
    pub llm: Arc<dyn LlmAdapter>,
    pub model: String,
}

#[async_trait]
impl Agent for FactChecker {
    fn name(&self) -> &str {
        "FactChecker"
    }

    fn declared_tools(&self) -> &[String] {
        &[]
    }

    async fn can_execute(&self, _state: &QueryStateSnapshot, _config: &ConfigSnapshot) -> bool {
        true
    }

    async fn execute(&self, state: &QueryStateSnapshot, config: &ConfigSnapshot) -> Result<AgentResult, OrchestratorError> {
        let response = self
            .llm
            .generate(&format!("Verify claims for: {}", state.query_text), &config.llm_backend, config.token_budget)
            .await
            .map_err(|e| OrchestratorError::Adapter {
                category: e.category,
                message: e.message,
            })?;

        Ok(AgentResult {
            claims: vec![Claim::new(claim_id("verify"), ClaimType::Verification, response.text, "verification")],
            messages: Vec::new(),
            metadata: Default::default(),
            token_usage: response.token_usage,
        })
    }
}

/// A configurable specialist agent for a named domain, used as a fallback
/// target by the recovery policy's `FallbackAgent` strategy.
pub struct DomainSpecialist {
    pub domain: String,
    pub llm: Arc<dyn LlmAdapter>,
}

#[async_trait]
impl Agent for DomainSpecialist {
    fn name(&self) -> &str {
        &self.domain
    }

    fn declared_tools(&self) -> &[String] {
        &[]
    }

    async fn can_execute(&self, _state: &QueryStateSnapshot, _config: &ConfigSnapshot) -> bool {
        true
    }

    async fn execute(&self, state: &QueryStateSnapshot, config: &ConfigSnapshot) -> Result<AgentResult, OrchestratorError> {
        let response = self
            .llm
            .generate(&state.query_text, &config.llm_backend, config.token_budget)
            .await
            .map_err(|e| OrchestratorError::Adapter {
                category: e.category,
                message: e.message,
            })?;

        Ok(AgentResult {
            claims: vec![Claim::new(claim_id("domain"), ClaimType::DomainAnalysis, response.text, "domain_analysis")],
            messages: Vec::new(),
            metadata: Default::default(),
            token_usage: response.token_usage,
        })
    }
}

/// Never reported to the circuit breaker: a malformed-input diagnostic.
pub fn category_for_adapter_failure(message: &str) -> ErrorCategory {
    if message.contains("timeout") || message.contains("rate limit") {
        ErrorCategory::Transient
    } else if message.contains("unavailable") || message.contains("malformed") {
        ErrorCategory::Recoverable
    } else {
        ErrorCategory::Critical
    }
}
