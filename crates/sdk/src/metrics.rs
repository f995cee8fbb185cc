//! SDK-side metrics for observability and operational monitoring.
//!
//! This module provides a pluggable metrics trait (`SdkMetrics`) that SDK users
//! can implement to collect telemetry from the client. Two implementations are
//! included:
//!
//! - [`NoopSdkMetrics`]: Zero-overhead default that discards all metrics.
//! - [`MetricsSdkMetrics`]: Integration with the [`metrics`](https://docs.rs/metrics) crate facade,
//!   automatically forwarding to whatever recorder is installed (Prometheus, StatsD, etc.).
//!
//! # Metric Names
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `bigtable_sdk_requests_total` | Counter | `method`, `status` | Total requests by method and outcome |
//! | `bigtable_sdk_request_duration_seconds` | Histogram | `method` | Request latency distribution |
//! | `bigtable_sdk_retries_total` | Counter | `method`, `attempt`, `error_type` | Retry attempts by method |
//! | `bigtable_sdk_rows_read_total` | Counter | - | Committed rows delivered to callers |

use std::{fmt, time::Duration};

/// Trait for SDK-side metrics collection.
///
/// All methods have default no-op implementations, so you only need to
/// override the metrics you care about.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` since the SDK shares a single
/// metrics instance across all concurrent reads and writes.
pub trait SdkMetrics: Send + Sync + fmt::Debug {
    /// Records the outcome of a completed request.
    ///
    /// Called once per top-level operation, after retries resolve.
    fn record_request(&self, method: &str, duration: Duration, success: bool) {
        let _ = (method, duration, success);
    }

    /// Records a retry attempt.
    ///
    /// - `attempt`: The attempt that failed (1 = the initial attempt).
    /// - `error_type`: Classification of the error that triggered the retry.
    fn record_retry(&self, method: &str, attempt: u32, error_type: &str) {
        let _ = (method, attempt, error_type);
    }

    /// Records rows handed to the caller by a read.
    fn record_rows_read(&self, count: u64) {
        let _ = count;
    }
}

/// No-op metrics implementation with zero overhead.
#[derive(Debug, Clone, Copy)]
pub struct NoopSdkMetrics;

impl SdkMetrics for NoopSdkMetrics {}

/// Metrics implementation using the [`metrics`](https://docs.rs/metrics) crate facade.
#[derive(Debug, Clone, Copy)]
pub struct MetricsSdkMetrics;

/// Metric name constants for the `metrics` crate facade.
mod metric_names {
    /// Total requests by method and outcome.
    pub const REQUESTS_TOTAL: &str = "bigtable_sdk_requests_total";
    /// Request duration distribution.
    pub const REQUEST_DURATION: &str = "bigtable_sdk_request_duration_seconds";
    /// Retry attempts by method.
    pub const RETRIES_TOTAL: &str = "bigtable_sdk_retries_total";
    /// Rows delivered by reads.
    pub const ROWS_READ_TOTAL: &str = "bigtable_sdk_rows_read_total";
}

impl SdkMetrics for MetricsSdkMetrics {
    fn record_request(&self, method: &str, duration: Duration, success: bool) {
        let status = if success { "success" } else { "error" };
        metrics::counter!(metric_names::REQUESTS_TOTAL, "method" => method.to_owned(), "status" => status).increment(1);
        metrics::histogram!(metric_names::REQUEST_DURATION, "method" => method.to_owned())
            .record(duration.as_secs_f64());
    }

    fn record_retry(&self, method: &str, attempt: u32, error_type: &str) {
        metrics::counter!(
            metric_names::RETRIES_TOTAL,
            "method" => method.to_owned(),
            "attempt" => attempt.to_string(),
            "error_type" => error_type.to_owned(),
        )
        .increment(1);
    }

    fn record_rows_read(&self, count: u64) {
        metrics::counter!(metric_names::ROWS_READ_TOTAL).increment(count);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Default)]
    struct Recording {
        retries: Mutex<Vec<(String, u32, String)>>,
    }

    impl SdkMetrics for Recording {
        fn record_retry(&self, method: &str, attempt: u32, error_type: &str) {
            self.retries.lock().push((method.to_owned(), attempt, error_type.to_owned()));
        }
    }

    #[test]
    fn test_noop_metrics_accept_all_calls() {
        let metrics: Arc<dyn SdkMetrics> = Arc::new(NoopSdkMetrics);
        metrics.record_request("read_rows", Duration::from_millis(3), true);
        metrics.record_retry("read_rows", 1, "unavailable");
        metrics.record_rows_read(10);
    }

    #[test]
    fn test_facade_metrics_without_recorder() {
        let metrics = MetricsSdkMetrics;
        metrics.record_request("mutate_rows", Duration::from_millis(1), false);
        metrics.record_retry("mutate_rows", 2, "aborted");
        metrics.record_rows_read(1);
    }

    #[test]
    fn test_default_methods_are_overridable() {
        let recording = Recording::default();
        recording.record_retry("read_rows", 2, "deadline_exceeded");
        recording.record_rows_read(5);
        assert_eq!(
            *recording.retries.lock(),
            vec![("read_rows".to_owned(), 2, "deadline_exceeded".to_owned())]
        );
    }
}
