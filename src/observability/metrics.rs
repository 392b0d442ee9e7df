use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

use crate::domain::Outcome;

pub const DECISIONS_TOTAL: &str = "trustgate_decisions_total";
pub const DECISION_LATENCY_SECONDS: &str = "trustgate_decision_latency_seconds";
pub const PROMPTS_TOTAL: &str = "trustgate_prompts_total";
pub const STORE_WRITES_TOTAL: &str = "trustgate_store_writes_total";
pub const RULESET_RELOADS_TOTAL: &str = "trustgate_ruleset_reloads_total";

/// Install the Prometheus recorder for the process.
pub fn install_recorder() -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Record a verdict and which step produced it.
pub fn record_decision(outcome: Outcome, source: &'static str) {
    counter!(DECISIONS_TOTAL, "outcome" => outcome.as_str(), "source" => source).increment(1);
}

/// Record an arbiter event (answered, coalesced, timeout, ...).
pub fn record_prompt(result: &'static str) {
    counter!(PROMPTS_TOTAL, "result" => result).increment(1);
}

pub fn record_store_write(result: &'static str) {
    counter!(STORE_WRITES_TOTAL, "result" => result).increment(1);
}

pub fn record_ruleset_reload(result: &'static str) {
    counter!(RULESET_RELOADS_TOTAL, "result" => result).increment(1);
}

/// Guard for timing decisions. Records latency on drop.
pub struct TimingGuard {
    start: Instant,
}

impl TimingGuard {
    pub fn new() -> Self {
        TimingGuard { start: Instant::now() }
    }
}

impl Default for TimingGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        histogram!(DECISION_LATENCY_SECONDS).record(self.start.elapsed().as_secs_f64());
    }
}
