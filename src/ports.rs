//! External interfaces the core consumes from host-provided collaborators
//! (spec §6). Each is an `async_trait`, the teacher's convention for
//! swappable capabilities (`domain/ports/llm_substrate.rs`,
//! `domain/ports/embedding.rs`). None are implemented here beyond the
//! `mock` module used by tests — concrete LLM adapters, search/storage
//! backends, and brokers are external per spec §1.

use crate::domain::task_graph::RawPlan;
use crate::error::ErrorCategory;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub text: String,
    pub token_usage: u64,
}

#[derive(Debug, Clone)]
pub struct AdapterError {
    pub category: ErrorCategory,
    pub message: String,
}

#[async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn generate(&self, prompt: &str, model: &str, budget: i64) -> Result<GenerateResponse, AdapterError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSource {
    pub url: String,
    pub snippet: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

#[async_trait]
pub trait SearchAdapter: Send + Sync {
    async fn external_lookup(&self, query: &str, limit: usize, hints: Option<&str>) -> Result<Vec<SearchSource>, AdapterError>;
}

/// Produces the raw task plan a query's `TaskGraph` is normalized from
/// (spec §4.2). Implementations typically prompt an LLM for a task
/// breakdown; an empty `RawPlan` is a legitimate response — `TaskGraph`
/// substitutes a single-task fallback graph rather than erroring.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, query_text: &str) -> Result<RawPlan, AdapterError>;
}

#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Idempotent on `(claim_id, version)`.
    async fn persist_claim(&self, claim: &crate::domain::Claim) -> Result<(), AdapterError>;
    async fn update_claim(&self, id: &str, content: &str) -> Result<(), AdapterError>;
    async fn vector_search(&self, embedding: &[f32], k: usize) -> Result<Vec<(String, f32)>, AdapterError>;
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, message: serde_json::Value) -> Result<(), AdapterError>;
    async fn put(&self, queue: &str, message: serde_json::Value) -> Result<(), AdapterError>;
    async fn get(&self, queue: &str) -> Result<Option<serde_json::Value>, AdapterError>;
}

/// Scoped span acquisition with guaranteed release on all exit paths.
pub trait Tracer: Send + Sync {
    fn span(&self, name: &str, attributes: HashMap<String, String>) -> Box<dyn std::any::Any>;
}

/// Process-wide counters/gauges. Read-only operations (e.g. `monitor
/// metrics`) must not reset state, hence no `reset` method here.
pub trait Metrics: Send + Sync {
    fn counter_inc(&self, name: &str, delta: u64);
    fn gauge_set(&self, name: &str, value: f64);
}

pub mod mock {
    //! Deterministic, in-memory adapter implementations for tests.

    use super::*;
    use tokio::sync::Mutex;

    pub struct MockLlmAdapter {
        pub response: String,
        pub token_usage: u64,
    }

    #[async_trait]
    impl LlmAdapter for MockLlmAdapter {
        async fn generate(&self, _prompt: &str, _model: &str, _budget: i64) -> Result<GenerateResponse, AdapterError> {
            Ok(GenerateResponse {
                text: self.response.clone(),
                token_usage: self.token_usage,
            })
        }
    }

    /// Always returns an empty plan, letting `TaskGraph::from_raw` fall back
    /// to a single root task named after the query.
    #[derive(Default)]
    pub struct NoopPlanner;

    #[async_trait]
    impl Planner for NoopPlanner {
        async fn plan(&self, _query_text: &str) -> Result<RawPlan, AdapterError> {
            Ok(RawPlan::default())
        }
    }

    #[derive(Default)]
    pub struct MockStorageAdapter {
        pub claims: Mutex<Vec<crate::domain::Claim>>,
    }

    #[async_trait]
    impl StorageAdapter for MockStorageAdapter {
        async fn persist_claim(&self, claim: &crate::domain::Claim) -> Result<(), AdapterError> {
            let mut claims = self.claims.lock().await;
            if !claims.iter().any(|c| c.id == claim.id && c.version == claim.version) {
                claims.push(claim.clone());
            }
            Ok(())
        }

        async fn update_claim(&self, id: &str, content: &str) -> Result<(), AdapterError> {
            let mut claims = self.claims.lock().await;
            if let Some(c) = claims.iter_mut().find(|c| c.id == id) {
                c.content = content.to_string();
            }
            Ok(())
        }

        async fn vector_search(&self, _embedding: &[f32], _k: usize) -> Result<Vec<(String, f32)>, AdapterError> {
            Ok(Vec::new())
        }
    }
}
