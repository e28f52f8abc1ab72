//! AUTO-mode gate policy: scout -> debate escalation heuristics (spec §4.7).
//!
//! Shaped after the teacher's `ConvergencePolicy`
//! (`domain/models/convergence/policy.rs`): a policy struct assembled from
//! weighted signals with an explicit accept/escalate branch, adapted to the
//! spec's exact three-heuristic linear score and `user_override`
//! short-circuits. Weights and thresholds are left to `ConfigSnapshot`
//! (spec §9 Open Question) rather than fixed here.

use crate::config::{GateConfig, UserOverride};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The three heuristic inputs computed over the scout pass (spec §4.7).
#[derive(Debug, Clone, Copy, Default)]
pub struct GateSignals {
    pub retrieval_overlap: f64,
    pub nli_conflict: f64,
    pub complexity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Finalize,
    Escalate,
}

/// Recorded in `state.metadata.gate` (spec §4.7 step 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateOutcome {
    pub decision: GateDecision,
    pub score: f64,
    pub component_scores: HashMap<String, f64>,
    pub reason: String,
}

/// Decide whether to finalize on the scout answer or escalate to full
/// dialectical debate.
pub fn evaluate(signals: GateSignals, config: &GateConfig, user_override: UserOverride) -> GateOutcome {
    let mut component_scores = HashMap::new();
    component_scores.insert("retrieval_overlap".to_string(), signals.retrieval_overlap);
    component_scores.insert("nli_conflict".to_string(), signals.nli_conflict);
    component_scores.insert("complexity".to_string(), signals.complexity);

    match user_override {
        UserOverride::Exit => {
            return GateOutcome {
                decision: GateDecision::Finalize,
                score: 0.0,
                component_scores,
                reason: "user_override=exit".to_string(),
            };
        }
        UserOverride::Debate => {
            return GateOutcome {
                decision: GateDecision::Escalate,
                score: 1.0,
                component_scores,
                reason: "user_override=debate".to_string(),
            };
        }
        UserOverride::None => {}
    }

    let score = config.weight_retrieval_overlap * (1.0 - signals.retrieval_overlap)
        + config.weight_nli_conflict * signals.nli_conflict
        + config.weight_complexity * signals.complexity;

    let retrieval_breach = signals.retrieval_overlap < config.retrieval_overlap_threshold;
    let nli_breach = signals.nli_conflict > config.nli_conflict_threshold;
    let complexity_breach = signals.complexity > config.complexity_threshold;

    let escalate = !config.policy_enabled || retrieval_breach || nli_breach || complexity_breach;

    let reason = if !config.policy_enabled {
        "gate policy disabled: always escalate".to_string()
    } else if escalate {
        format!(
            "heuristic threshold exceeded (retrieval_breach={retrieval_breach}, nli_breach={nli_breach}, complexity_breach={complexity_breach}, score={score:.3})"
        )
    } else {
        format!("all heuristics within threshold (score={score:.3})")
    };

    let decision = if escalate { GateDecision::Escalate } else { GateDecision::Finalize };
    tracing::debug!(?decision, score, %reason, "gate evaluated");

    GateOutcome {
        decision,
        score,
        component_scores,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GateConfig {
        GateConfig::default()
    }

    #[test]
    fn user_override_exit_always_finalizes() {
        let signals = GateSignals {
            retrieval_overlap: 0.0,
            nli_conflict: 1.0,
            complexity: 1.0,
        };
        let outcome = evaluate(signals, &config(), UserOverride::Exit);
        assert_eq!(outcome.decision, GateDecision::Finalize);
    }

    #[test]
    fn user_override_debate_always_escalates() {
        let signals = GateSignals {
            retrieval_overlap: 1.0,
            nli_conflict: 0.0,
            complexity: 0.0,
        };
        let outcome = evaluate(signals, &config(), UserOverride::Debate);
        assert_eq!(outcome.decision, GateDecision::Escalate);
    }

    #[test]
    fn clean_signals_finalize() {
        let signals = GateSignals {
            retrieval_overlap: 0.9,
            nli_conflict: 0.0,
            complexity: 0.1,
        };
        let outcome = evaluate(signals, &config(), UserOverride::None);
        assert_eq!(outcome.decision, GateDecision::Finalize);
    }

    #[test]
    fn conflicting_signals_escalate() {
        let signals = GateSignals {
            retrieval_overlap: 0.1,
            nli_conflict: 0.8,
            complexity: 0.9,
        };
        let outcome = evaluate(signals, &config(), UserOverride::None);
        assert_eq!(outcome.decision, GateDecision::Escalate);
    }

    #[test]
    fn disabled_policy_always_escalates() {
        let mut cfg = config();
        cfg.policy_enabled = false;
        let signals = GateSignals {
            retrieval_overlap: 1.0,
            nli_conflict: 0.0,
            complexity: 0.0,
        };
        let outcome = evaluate(signals, &cfg, UserOverride::None);
        assert_eq!(outcome.decision, GateDecision::Escalate);
    }
}
