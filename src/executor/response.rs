//! `QueryResponse` (spec §3) and the per-cycle metrics it aggregates.

use crate::domain::{Claim, CycleMetrics};
use crate::error::ResponseError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub claim_id: String,
    pub url: String,
}

/// Produced once at terminal state (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub reasoning: Vec<Claim>,
    pub metrics: Vec<CycleMetrics>,
    pub errors: Vec<ResponseError>,
}

impl QueryResponse {
    /// spec §7: "When the synthesizer cannot produce an answer, `answer` is
    /// `\"No answer found for '<query>'.\"` with an empty citations list."
    pub fn no_answer(query_text: &str, reasoning: Vec<Claim>, metrics: Vec<CycleMetrics>, errors: Vec<ResponseError>) -> Self {
        Self {
            answer: format!("No answer found for '{query_text}'."),
            citations: Vec::new(),
            reasoning,
            metrics,
            errors,
        }
    }
}

/// One element of `run_query_stream`'s output (spec §6): a partial update
/// per completed cycle, terminated by the final response.
#[derive(Debug, Clone)]
pub enum StreamUpdate {
    Cycle(CycleMetrics),
    Final(QueryResponse),
}
