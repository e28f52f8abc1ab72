//! Per-agent circuit breaker and recovery-strategy selection (spec §4.5).
//!
//! Grounded on the teacher's `CircuitBreaker`/`CircuitBreakerService`
//! (`services/circuit_breaker.rs`): same `closed -> open -> half_open`
//! state machine and `Arc<RwLock<HashMap<..>>>` registry shape, reworked so
//! the scope is always an agent name (the teacher's `CircuitScope` enum
//! collapses to one variant here) and failures are weighted floats rather
//! than a failure-record count, per spec §4.5's fractional thresholds.

use crate::error::ErrorCategory;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Configuration shared by every agent's breaker (spec: "Thresholds and
/// cooldown come from `ConfigSnapshot`").
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: f64,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3.0,
            cooldown: Duration::seconds(1),
        }
    }
}

/// Per-agent breaker state (spec §3 `CircuitBreakerState`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreaker {
    pub agent: String,
    pub state: CircuitState,
    pub failure_count: f64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            state: CircuitState::Closed,
            failure_count: 0.0,
            last_failure_at: None,
            cooldown_until: None,
        }
    }

    fn record_failure(&mut self, category: ErrorCategory, now: DateTime<Utc>, config: &CircuitBreakerConfig) {
        self.failure_count += category.failure_weight();
        self.last_failure_at = Some(now);

        match self.state {
            CircuitState::Closed if self.failure_count >= config.failure_threshold => {
                self.open(now, config);
            }
            CircuitState::HalfOpen => {
                // Any failure in half-open reopens with an extended cooldown.
                self.open(now, config);
            }
            _ => {}
        }
    }

    fn record_success(&mut self) {
        if matches!(self.state, CircuitState::HalfOpen) {
            self.state = CircuitState::Closed;
            self.failure_count = 0.0;
            self.cooldown_until = None;
        }
    }

    fn open(&mut self, now: DateTime<Utc>, config: &CircuitBreakerConfig) {
        self.state = CircuitState::Open;
        self.cooldown_until = Some(now + config.cooldown);
        tracing::warn!(agent = %self.agent, failure_count = self.failure_count, "circuit breaker opened");
    }

    /// Evaluate state transitions due to elapsed time, returning whether the
    /// agent may run this cycle.
    fn allows(&mut self, now: DateTime<Utc>) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if self.cooldown_until.is_some_and(|until| now >= until) {
                    self.state = CircuitState::HalfOpen;
                    tracing::info!(agent = %self.agent, "circuit breaker half-open after cooldown");
                    true
                } else {
                    false
                }
            }
        }
    }
}

/// The recovery strategy selected for a given failure category (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecoveryStrategy {
    RetryWithBackoff { next_delay: Duration, attempt: u32 },
    FallbackAgent { fallback: Option<String> },
    FailGracefully,
}

impl RecoveryStrategy {
    pub fn for_category(category: ErrorCategory, initial_delay: Duration, attempt: u32, fallback: Option<String>) -> Self {
        match category {
            ErrorCategory::Transient => RecoveryStrategy::RetryWithBackoff {
                next_delay: initial_delay * 2_i32.pow(attempt),
                attempt,
            },
            ErrorCategory::Recoverable => RecoveryStrategy::FallbackAgent { fallback },
            _ => RecoveryStrategy::FailGracefully,
        }
    }
}

/// Registry of per-agent breakers for one query.
pub struct CircuitBreakerService {
    config: CircuitBreakerConfig,
    breakers: Arc<RwLock<HashMap<String, CircuitBreaker>>>,
}

impl CircuitBreakerService {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Returns `true` if the agent may run this cycle, transitioning
    /// `open -> half_open` when the cooldown has elapsed.
    pub async fn allows(&self, agent: &str) -> bool {
        self.allows_at(agent, Utc::now()).await
    }

    pub async fn allows_at(&self, agent: &str, now: DateTime<Utc>) -> bool {
        let mut breakers = self.breakers.write().await;
        let breaker = breakers
            .entry(agent.to_string())
            .or_insert_with(|| CircuitBreaker::new(agent));
        breaker.allows(now)
    }

    pub async fn record_failure(&self, agent: &str, category: ErrorCategory) {
        self.record_failure_at(agent, category, Utc::now()).await;
    }

    pub async fn record_failure_at(&self, agent: &str, category: ErrorCategory, now: DateTime<Utc>) {
        let mut breakers = self.breakers.write().await;
        let breaker = breakers
            .entry(agent.to_string())
            .or_insert_with(|| CircuitBreaker::new(agent));
        breaker.record_failure(category, now, &self.config);
    }

    pub async fn record_success(&self, agent: &str) {
        let mut breakers = self.breakers.write().await;
        if let Some(breaker) = breakers.get_mut(agent) {
            breaker.record_success();
        }
    }

    pub async fn state(&self, agent: &str) -> CircuitState {
        self.breakers
            .read()
            .await
            .get(agent)
            .map(|b| b.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub async fn snapshot(&self, agent: &str) -> Option<CircuitBreaker> {
        self.breakers.read().await.get(agent).cloned()
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_until_threshold_reached() {
        let service = CircuitBreakerService::new(CircuitBreakerConfig {
            failure_threshold: 3.0,
            cooldown: Duration::seconds(1),
        });
        service.record_failure("A", ErrorCategory::Critical).await;
        service.record_failure("A", ErrorCategory::Critical).await;
        assert_eq!(service.state("A").await, CircuitState::Closed);
        service.record_failure("A", ErrorCategory::Critical).await;
        assert_eq!(service.state("A").await, CircuitState::Open);
    }

    #[tokio::test]
    async fn transient_failures_are_half_weighted() {
        let service = CircuitBreakerService::new(CircuitBreakerConfig {
            failure_threshold: 3.0,
            cooldown: Duration::seconds(1),
        });
        for _ in 0..5 {
            service.record_failure("A", ErrorCategory::Transient).await;
        }
        // 5 * 0.5 = 2.5 < 3.0 threshold
        assert_eq!(service.state("A").await, CircuitState::Closed);
        service.record_failure("A", ErrorCategory::Transient).await;
        // 6 * 0.5 = 3.0 >= 3.0
        assert_eq!(service.state("A").await, CircuitState::Open);
    }

    #[tokio::test]
    async fn open_transitions_to_half_open_after_cooldown_then_closes_on_success() {
        let service = CircuitBreakerService::new(CircuitBreakerConfig {
            failure_threshold: 1.0,
            cooldown: Duration::seconds(1),
        });
        let t0 = Utc::now();
        service.record_failure_at("A", ErrorCategory::Critical, t0).await;
        assert_eq!(service.state("A").await, CircuitState::Open);
        assert!(!service.allows_at("A", t0).await);

        let after_cooldown = t0 + Duration::seconds(2);
        assert!(service.allows_at("A", after_cooldown).await);
        assert_eq!(service.state("A").await, CircuitState::HalfOpen);

        service.record_success("A").await;
        assert_eq!(service.state("A").await, CircuitState::Closed);
        let snap = service.snapshot("A").await.unwrap();
        assert_eq!(snap.failure_count, 0.0);
    }

    #[tokio::test]
    async fn failure_while_half_open_reopens() {
        let service = CircuitBreakerService::new(CircuitBreakerConfig {
            failure_threshold: 1.0,
            cooldown: Duration::seconds(1),
        });
        let t0 = Utc::now();
        service.record_failure_at("A", ErrorCategory::Critical, t0).await;
        service.allows_at("A", t0 + Duration::seconds(2)).await;
        assert_eq!(service.state("A").await, CircuitState::HalfOpen);
        service.record_failure_at("A", ErrorCategory::Critical, t0 + Duration::seconds(2)).await;
        assert_eq!(service.state("A").await, CircuitState::Open);
    }

    #[test]
    fn recovery_strategy_maps_category_to_action() {
        let retry = RecoveryStrategy::for_category(ErrorCategory::Transient, Duration::seconds(1), 0, None);
        assert!(matches!(retry, RecoveryStrategy::RetryWithBackoff { .. }));

        let fallback = RecoveryStrategy::for_category(ErrorCategory::Recoverable, Duration::seconds(1), 0, Some("B".to_string()));
        assert!(matches!(fallback, RecoveryStrategy::FallbackAgent { .. }));

        let fail = RecoveryStrategy::for_category(ErrorCategory::Critical, Duration::seconds(1), 0, None);
        assert!(matches!(fail, RecoveryStrategy::FailGracefully));
    }

    #[test]
    fn retry_delay_doubles_per_attempt() {
        let d0 = RecoveryStrategy::for_category(ErrorCategory::Transient, Duration::seconds(1), 0, None);
        let d1 = RecoveryStrategy::for_category(ErrorCategory::Transient, Duration::seconds(1), 1, None);
        if let (RecoveryStrategy::RetryWithBackoff { next_delay: a, .. }, RecoveryStrategy::RetryWithBackoff { next_delay: b, .. }) = (d0, d1) {
            assert_eq!(b, a * 2);
        } else {
            panic!("expected retry strategies");
        }
    }
}
