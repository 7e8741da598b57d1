//! Persistence gateway metrics.

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Chunk commits by outcome (`ok`, `rolled_back`, `rejected`).
    pub const COMMITS_TOTAL: &str = "lingo_store_commits_total";

    /// Commit latency in seconds.
    pub const COMMIT_SECONDS: &str = "lingo_store_commit_seconds";

    /// Read retries by operation.
    pub const RETRIES_TOTAL: &str = "lingo_store_retries_total";
}

/// Record a finished commit attempt.
pub fn record_commit(outcome: &'static str, latency_secs: f64) {
    counter!(names::COMMITS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::COMMIT_SECONDS, "outcome" => outcome).record(latency_secs);
}

/// Record a retry attempt.
pub fn record_retry(operation: &str) {
    counter!(
        names::RETRIES_TOTAL,
        "operation" => operation.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::COMMITS_TOTAL.starts_with("lingo_store_"));
        assert!(names::RETRIES_TOTAL.contains("retries"));
        assert!(names::COMMIT_SECONDS.ends_with("_seconds"));
    }
}
