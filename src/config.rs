//! Configuration snapshot consumed by a query.
//!
//! Mirrors the teacher's layered `Config` (nested structs, `#[serde(default)]`
//! per field) but construction goes through [`ConfigSnapshot::from_value`],
//! which validates a raw [`serde_json::Value`] map against the recognized key
//! set and rejects anything unexpected before the core ever sees it — the
//! teacher's `#[serde(default)]` pattern alone silently drops unknown keys,
//! which spec §3/§6 explicitly forbids.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningMode {
    Direct,
    ChainOfThought,
    Dialectical,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributedMode {
    Local,
    Process,
    Ray,
    Redis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserOverride {
    Exit,
    Debate,
    None,
}

/// Gate-policy configuration (spec §4.7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub policy_enabled: bool,
    pub retrieval_overlap_threshold: f64,
    pub nli_conflict_threshold: f64,
    pub complexity_threshold: f64,
    pub weight_retrieval_overlap: f64,
    pub weight_nli_conflict: f64,
    pub weight_complexity: f64,
    /// Forces `exit`/`debate`, or pins a heuristic score, per query.
    pub user_overrides: HashMap<String, UserOverride>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            policy_enabled: true,
            retrieval_overlap_threshold: 0.4,
            nli_conflict_threshold: 0.3,
            complexity_threshold: 0.5,
            weight_retrieval_overlap: 0.34,
            weight_nli_conflict: 0.33,
            weight_complexity: 0.33,
            user_overrides: HashMap::new(),
        }
    }
}

/// Distributed-execution configuration (spec §4.4.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributedConfig {
    pub mode: DistributedMode,
    pub group_deadline_secs: u64,
}

impl Default for DistributedConfig {
    fn default() -> Self {
        Self {
            mode: DistributedMode::Local,
            group_deadline_secs: 30,
        }
    }
}

/// Immutable configuration handed to a query at creation (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigSnapshot {
    pub reasoning_mode: ReasoningMode,
    pub loops: u32,
    pub primus_start: usize,
    pub agents: Vec<String>,
    pub agent_groups: Vec<Vec<String>>,
    pub llm_backend: String,
    pub token_budget: i64,
    pub adaptive_max_factor: f64,
    pub adaptive_min_buffer: f64,
    pub circuit_breaker_threshold: f64,
    pub circuit_breaker_cooldown_secs: u64,
    pub gate: GateConfig,
    pub messaging_enabled: bool,
    pub distributed: DistributedConfig,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            reasoning_mode: ReasoningMode::Direct,
            loops: 1,
            primus_start: 0,
            agents: vec!["Synthesizer".to_string()],
            agent_groups: Vec::new(),
            llm_backend: "default".to_string(),
            token_budget: 1_000,
            adaptive_max_factor: 0.2,
            adaptive_min_buffer: 1.0,
            circuit_breaker_threshold: 3.0,
            circuit_breaker_cooldown_secs: 1,
            gate: GateConfig::default(),
            messaging_enabled: true,
            distributed: DistributedConfig::default(),
        }
    }
}

/// The flat set of keys recognized at the top level of a raw config map.
/// Nested keys under `gate`/`distributed` are validated by serde against
/// the nested struct shape once the top level is known-good.
const RECOGNIZED_TOP_LEVEL_KEYS: &[&str] = &[
    "reasoning_mode",
    "loops",
    "primus_start",
    "agents",
    "agent_groups",
    "llm_backend",
    "token_budget",
    "adaptive_max_factor",
    "adaptive_min_buffer",
    "circuit_breaker_threshold",
    "circuit_breaker_cooldown_secs",
    "gate",
    "messaging_enabled",
    "distributed",
];

impl ConfigSnapshot {
    /// Validate and construct a snapshot from a raw JSON-ish map, rejecting
    /// unrecognized top-level keys with the offending key named.
    pub fn from_value(raw: serde_json::Value) -> Result<Self, ConfigError> {
        let Some(map) = raw.as_object() else {
            return Err(ConfigError::ParseError("configuration root must be a map".to_string()));
        };

        for key in map.keys() {
            if !RECOGNIZED_TOP_LEVEL_KEYS.contains(&key.as_str()) {
                return Err(ConfigError::UnknownKey(key.clone()));
            }
        }

        let snapshot: ConfigSnapshot = serde_json::from_value(raw)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        snapshot.validate()?;
        Ok(snapshot)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.loops == 0 {
            return Err(ConfigError::InvalidValue {
                field: "loops".to_string(),
                reason: "must be >= 1".to_string(),
            });
        }
        if self.token_budget < 1 {
            return Err(ConfigError::InvalidValue {
                field: "token_budget".to_string(),
                reason: "must be >= 1".to_string(),
            });
        }
        if self.agents.is_empty() && self.agent_groups.is_empty() {
            return Err(ConfigError::MissingField("agents".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_round_trip_through_value() {
        let value = serde_json::to_value(ConfigSnapshot::default()).unwrap();
        let snapshot = ConfigSnapshot::from_value(value).unwrap();
        assert_eq!(snapshot, ConfigSnapshot::default());
    }

    #[test]
    fn unknown_key_rejected_with_name() {
        let value = json!({ "reasoning_mode": "direct", "bogus_key": 1 });
        let err = ConfigSnapshot::from_value(value).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey(k) if k == "bogus_key"));
    }

    #[test]
    fn zero_loops_rejected() {
        let value = json!({ "loops": 0 });
        assert!(ConfigSnapshot::from_value(value).is_err());
    }

    #[test]
    fn partial_map_fills_remaining_defaults() {
        let value = json!({ "loops": 3 });
        let snapshot = ConfigSnapshot::from_value(value).unwrap();
        assert_eq!(snapshot.loops, 3);
        assert_eq!(snapshot.token_budget, ConfigSnapshot::default().token_budget);
    }
}
