//! `Claim` — an atomic, typed assertion produced by an agent (spec §3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The dialogue stage a claim belongs to (`metadata.phase` in spec terms is
/// kept as a first-class field here since every claim is required to carry
/// one; see spec §3 invariant "every claim carries `metadata.phase`").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    Thesis,
    Antithesis,
    Synthesis,
    Verification,
    ResearchFindings,
    Critique,
    Summary,
    ResearchPlan,
    Moderation,
    Guidance,
    DomainAnalysis,
    UserFeedback,
    Diagnostic,
}

impl ClaimType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Thesis => "thesis",
            Self::Antithesis => "antithesis",
            Self::Synthesis => "synthesis",
            Self::Verification => "verification",
            Self::ResearchFindings => "research_findings",
            Self::Critique => "critique",
            Self::Summary => "summary",
            Self::ResearchPlan => "research_plan",
            Self::Moderation => "moderation",
            Self::Guidance => "guidance",
            Self::DomainAnalysis => "domain_analysis",
            Self::UserFeedback => "user_feedback",
            Self::Diagnostic => "diagnostic",
        }
    }
}

/// Source attribution attached to a claim, used by the gate's retrieval
/// overlap and NLI-conflict heuristics (spec §4.7).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Source {
    pub url: String,
    pub snippet: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Set by fact-checking agents when a source contradicts the claim.
    #[serde(default)]
    pub conflicts: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,
    #[serde(rename = "type")]
    pub claim_type: ClaimType,
    pub content: String,
    pub subtype: Option<String>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Bumped by `update_claim`; id is preserved across updates.
    pub version: u32,
}

impl Claim {
    pub fn new(id: impl Into<String>, claim_type: ClaimType, content: impl Into<String>, phase: impl Into<String>) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("phase".to_string(), serde_json::Value::String(phase.into()));
        Self {
            id: id.into(),
            claim_type,
            content: content.into(),
            subtype: None,
            sources: Vec::new(),
            metadata,
            version: 0,
        }
    }

    pub fn phase(&self) -> Option<&str> {
        self.metadata.get("phase").and_then(|v| v.as_str())
    }
}
