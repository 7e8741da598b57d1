//! Prometheus metrics for the orchestrator.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Metric names as constants for consistency.
pub mod names {
    pub const TASKS_SUBMITTED_TOTAL: &str = "lingo_tasks_submitted_total";
    pub const TASKS_REJECTED_TOTAL: &str = "lingo_tasks_rejected_total";
    pub const TASKS_COMPLETED_TOTAL: &str = "lingo_tasks_completed_total";
    pub const TASKS_FAILED_TOTAL: &str = "lingo_tasks_failed_total";
    pub const TASKS_RETRIED_TOTAL: &str = "lingo_tasks_retried_total";
    pub const ATTEMPTS_CRASHED_TOTAL: &str = "lingo_attempts_crashed_total";
    pub const ATTEMPTS_IN_FLIGHT: &str = "lingo_attempts_in_flight";
    pub const STAGE_DURATION_SECONDS: &str = "lingo_stage_duration_seconds";
    pub const CHUNKS_SKIPPED_TOTAL: &str = "lingo_chunks_skipped_total";
    pub const LEASES_RECLAIMED_TOTAL: &str = "lingo_leases_reclaimed_total";
}

/// Serve `/metrics` on `addr` via the Prometheus exporter.
pub fn install_prometheus(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}

pub fn record_submitted(kind: &'static str) {
    counter!(names::TASKS_SUBMITTED_TOTAL, "kind" => kind).increment(1);
}

pub fn record_rejected(reason: &'static str) {
    counter!(names::TASKS_REJECTED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_completed(kind: &'static str) {
    counter!(names::TASKS_COMPLETED_TOTAL, "kind" => kind).increment(1);
}

pub fn record_failed(kind: &'static str, error_kind: &'static str) {
    counter!(
        names::TASKS_FAILED_TOTAL,
        "kind" => kind,
        "error_kind" => error_kind
    )
    .increment(1);
}

pub fn record_retried(kind: &'static str) {
    counter!(names::TASKS_RETRIED_TOTAL, "kind" => kind).increment(1);
}

pub fn record_crash() {
    counter!(names::ATTEMPTS_CRASHED_TOTAL).increment(1);
}

pub fn set_in_flight(count: usize) {
    gauge!(names::ATTEMPTS_IN_FLIGHT).set(count as f64);
}

pub fn record_stage(stage: &'static str, duration_secs: f64) {
    histogram!(names::STAGE_DURATION_SECONDS, "stage" => stage).record(duration_secs);
}

pub fn record_chunk_skipped() {
    counter!(names::CHUNKS_SKIPPED_TOTAL).increment(1);
}

pub fn record_reclaimed(count: usize) {
    counter!(names::LEASES_RECLAIMED_TOTAL).increment(count as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_prefixed() {
        for name in [
            names::TASKS_SUBMITTED_TOTAL,
            names::TASKS_FAILED_TOTAL,
            names::STAGE_DURATION_SECONDS,
        ] {
            assert!(name.starts_with("lingo_"));
        }
    }
}
