//! Process-wide counters the `Metrics` port (spec §6) is expected to be
//! backed by. Concrete export (Prometheus, etc.) is out of scope (spec §1);
//! this satisfies only the "Metrics / telemetry" component share (spec §2)
//! that the distilled spec otherwise leaves undetailed. Grounded on the
//! teacher's `event_bus.rs` category/severity shape, collapsed into plain
//! atomic counters.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct CoreMetrics {
    pub queries_started: AtomicU64,
    pub queries_completed: AtomicU64,
    pub agents_skipped_breaker: AtomicU64,
    pub agents_skipped_budget: AtomicU64,
    pub cycles_run: AtomicU64,
    pub gate_escalations: AtomicU64,
}

impl CoreMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query_started(&self) {
        self.queries_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn query_completed(&self) {
        self.queries_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn agent_skipped_breaker(&self) {
        self.agents_skipped_breaker.fetch_add(1, Ordering::Relaxed);
    }

    pub fn agent_skipped_budget(&self) {
        self.agents_skipped_budget.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycle_run(&self) {
        self.cycles_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn gate_escalation(&self) {
        self.gate_escalations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CoreMetricsSnapshot {
        CoreMetricsSnapshot {
            queries_started: self.queries_started.load(Ordering::Relaxed),
            queries_completed: self.queries_completed.load(Ordering::Relaxed),
            agents_skipped_breaker: self.agents_skipped_breaker.load(Ordering::Relaxed),
            agents_skipped_budget: self.agents_skipped_budget.load(Ordering::Relaxed),
            cycles_run: self.cycles_run.load(Ordering::Relaxed),
            gate_escalations: self.gate_escalations.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreMetricsSnapshot {
    pub queries_started: u64,
    pub queries_completed: u64,
    pub agents_skipped_breaker: u64,
    pub agents_skipped_budget: u64,
    pub cycles_run: u64,
    pub gate_escalations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_independently() {
        let metrics = CoreMetrics::new();
        metrics.query_started();
        metrics.cycle_run();
        metrics.cycle_run();
        let snap = metrics.snapshot();
        assert_eq!(snap.queries_started, 1);
        assert_eq!(snap.cycles_run, 2);
        assert_eq!(snap.queries_completed, 0);
    }
}
