//! Core domain types: claims, the task graph, the coordinator's ready-state
//! model, and the per-query state machine.

pub mod claim;
pub mod query_state;
pub mod ready_state;
pub mod task_graph;

pub use claim::{Claim, ClaimType, Source};
pub use query_state::{AgentMessage, CycleMetrics, QueryState, QueryStateSnapshot, ReactLogEntry, ScoutMetadata, StateRegistry};
pub use ready_state::{ReadyState, TaskCoordinator, TaskStatus, UnlockEvent};
pub use task_graph::{NormalizationWarning, RawPlan, TaskGraph, TaskNode};
