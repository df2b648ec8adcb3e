//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `rewards_runs_submitted_total{board}` - Runs ranked per leaderboard
//! - `rewards_rank_updates_total` - Existing entries renumbered by inserts
//! - `rewards_submit_duration_seconds` - Histogram of ranking latencies
//! - `rewards_team_transitions_total{status}` - Team run state changes
//! - `rewards_allocations_total{category}` - Token allocations performed
//! - `rewards_tokens_allocated_total` - Tokens handed out
//! - `rewards_debits_rejected_total` - Debits refused for insufficient balance
//! - `rewards_transient_failures_total` - Operations that ran out of retries

use prometheus::{
    Counter, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Metrics collector
///
/// Each instance owns its own registry so several services can coexist in
/// one process.
#[derive(Clone)]
pub struct Metrics {
    /// Runs ranked, by board
    pub runs_submitted: IntCounterVec,

    /// Existing entries whose rank changed
    pub rank_updates: IntCounter,

    /// Ranking latency
    pub submit_duration: Histogram,

    /// Team state changes, by new status
    pub team_transitions: IntCounterVec,

    /// Allocations, by category
    pub allocations: IntCounterVec,

    /// Tokens handed out
    pub tokens_allocated: Counter,

    /// Rejected debits
    pub debits_rejected: IntCounter,

    /// Operations that surfaced a transient error
    pub transient_failures: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let runs_submitted = IntCounterVec::new(
            Opts::new("rewards_runs_submitted_total", "Runs ranked per leaderboard"),
            &["board"],
        )?;
        registry.register(Box::new(runs_submitted.clone()))?;

        let rank_updates = IntCounter::new(
            "rewards_rank_updates_total",
            "Existing entries renumbered by inserts",
        )?;
        registry.register(Box::new(rank_updates.clone()))?;

        let submit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "rewards_submit_duration_seconds",
                "Histogram of ranking latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(submit_duration.clone()))?;

        let team_transitions = IntCounterVec::new(
            Opts::new("rewards_team_transitions_total", "Team run state changes"),
            &["status"],
        )?;
        registry.register(Box::new(team_transitions.clone()))?;

        let allocations = IntCounterVec::new(
            Opts::new("rewards_allocations_total", "Token allocations performed"),
            &["category"],
        )?;
        registry.register(Box::new(allocations.clone()))?;

        let tokens_allocated =
            Counter::new("rewards_tokens_allocated_total", "Tokens handed out")?;
        registry.register(Box::new(tokens_allocated.clone()))?;

        let debits_rejected = IntCounter::new(
            "rewards_debits_rejected_total",
            "Debits refused for insufficient balance",
        )?;
        registry.register(Box::new(debits_rejected.clone()))?;

        let transient_failures = IntCounter::new(
            "rewards_transient_failures_total",
            "Operations that ran out of transaction retries",
        )?;
        registry.register(Box::new(transient_failures.clone()))?;

        Ok(Self {
            runs_submitted,
            rank_updates,
            submit_duration,
            team_transitions,
            allocations,
            tokens_allocated,
            debits_rejected,
            transient_failures,
            registry,
        })
    }

    /// Record a ranked run
    pub fn record_run(&self, board: &str, renumbered: usize, duration_seconds: f64) {
        self.runs_submitted.with_label_values(&[board]).inc();
        self.rank_updates.inc_by(renumbered as u64);
        self.submit_duration.observe(duration_seconds);
    }

    /// Record a team state change
    pub fn record_team_transition(&self, status: &str) {
        self.team_transitions.with_label_values(&[status]).inc();
    }

    /// Record an allocation
    pub fn record_allocation(&self, category: &str, amount: Decimal) {
        self.allocations.with_label_values(&[category]).inc();
        self.tokens_allocated.inc_by(amount.to_f64().unwrap_or(0.0));
    }

    /// Record a refused debit
    pub fn record_debit_rejected(&self) {
        self.debits_rejected.inc();
    }

    /// Record an error, counting it if transient
    pub fn observe_error(&self, err: &crate::Error) {
        if err.is_retryable() {
            self.transient_failures.inc();
        }
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric in the Prometheus text format
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("rank_updates", &self.rank_updates.get())
            .field("debits_rejected", &self.debits_rejected.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        metrics.record_run("individual", 2, 0.01);
        assert_eq!(metrics.rank_updates.get(), 2);
    }

    #[test]
    fn test_instances_do_not_collide() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_debit_rejected();
        assert_eq!(a.debits_rejected.get(), 1);
        assert_eq!(b.debits_rejected.get(), 0);
    }

    #[test]
    fn test_encode_text_format() {
        let metrics = Metrics::new().unwrap();
        metrics.record_team_transition("started");
        let text = metrics.encode().unwrap();
        assert!(text.contains("rewards_team_transitions_total{status=\"started\"} 1"));
    }
}
