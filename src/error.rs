//! Error taxonomy for the orchestration core.
//!
//! `OrchestratorError` distinguishes the five kinds the core reasons about
//! (transient, recoverable, critical, validation, cancellation) so callers
//! can dispatch on kind rather than parse messages. `ConfigError` is kept
//! separate because validation failures must never reach the core itself.

use thiserror::Error;
use uuid::Uuid;

/// Error kind, used both for classification and for `QueryResponse.errors`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Transient,
    Recoverable,
    Critical,
    Validation,
    Cancellation,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Recoverable => "recoverable",
            Self::Critical => "critical",
            Self::Validation => "validation",
            Self::Cancellation => "cancellation",
        }
    }

    /// Failure weight used by the circuit breaker (spec §4.5).
    pub fn failure_weight(&self) -> f64 {
        match self {
            Self::Transient => 0.5,
            Self::Recoverable | Self::Critical => 1.0,
            Self::Validation | Self::Cancellation => 0.0,
        }
    }
}

/// Errors surfaced by the orchestration core.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("duplicate claim id: {0}")]
    DuplicateClaimId(String),

    #[error("claim not found: {0}")]
    ClaimNotFound(String),

    #[error("task graph invariant violated: {0}")]
    TaskGraphInvariant(String),

    #[error("cycle survived task graph normalization")]
    CycleSurvivedNormalization,

    #[error("query state not found: {0}")]
    QueryNotFound(Uuid),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("query cancelled")]
    Cancelled,

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("adapter error ({category:?}): {message}")]
    Adapter {
        category: ErrorCategory,
        message: String,
    },
}

impl OrchestratorError {
    /// The `ErrorCategory` this error maps to for breaker/recovery purposes.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::DuplicateClaimId(_)
            | Self::TaskGraphInvariant(_)
            | Self::CycleSurvivedNormalization
            | Self::ClaimNotFound(_) => ErrorCategory::Critical,
            Self::QueryNotFound(_) | Self::AgentNotFound(_) => ErrorCategory::Recoverable,
            Self::Serialization(_) => ErrorCategory::Critical,
            Self::Adapter { category, .. } => *category,
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self.category(), ErrorCategory::Critical | ErrorCategory::Validation)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.category(), ErrorCategory::Transient)
    }
}

/// Errors from `ConfigSnapshot` construction — these never reach the core.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown configuration key: {0}")]
    UnknownKey(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("failed to parse configuration: {0}")]
    ParseError(String),
}

/// One entry of `QueryResponse.errors` (spec §7).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResponseError {
    pub agent: Option<String>,
    pub category: ErrorCategory,
    pub event: String,
    pub message: String,
    pub threshold: Option<f64>,
}

impl ResponseError {
    pub fn new(category: ErrorCategory, event: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            agent: None,
            category,
            event: event.into(),
            message: message.into(),
            threshold: None,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_weights_match_spec() {
        assert_eq!(ErrorCategory::Critical.failure_weight(), 1.0);
        assert_eq!(ErrorCategory::Recoverable.failure_weight(), 1.0);
        assert_eq!(ErrorCategory::Transient.failure_weight(), 0.5);
    }

    #[test]
    fn permanence_classification() {
        let err = OrchestratorError::CycleSurvivedNormalization;
        assert!(err.is_permanent());
        assert!(!err.is_transient());
    }
}
