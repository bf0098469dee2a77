//! Metrics emitted by scan workers.
//!
//! The worker reports through the [`ScanMetrics`] trait it is handed at
//! construction. [`MetricsRecorder`] forwards to the `metrics` facade, so any
//! installed exporter picks the values up.

use std::fmt;

use metrics::{counter, histogram};

/// Outcome of the crash-stall check on load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashStallOutcome {
    /// Counter incremented, nothing else done.
    Tolerated,
    /// Processor recreated.
    Recreated,
    /// Job given up.
    Surrendered,
}

impl CrashStallOutcome {
    /// Label value for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tolerated => "tolerated",
            Self::Recreated => "recreated",
            Self::Surrendered => "surrendered",
        }
    }
}

impl fmt::Display for CrashStallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink for worker metrics.
pub trait ScanMetrics: Send + Sync {
    /// Items returned by database queries for a job.
    fn items_queried(&self, job_tag: &str, count: u64);

    /// Size of a persisted worker payload.
    fn persisted(&self, num_bytes: usize);

    /// A crash stall was detected on load.
    fn crash_stall(&self, outcome: CrashStallOutcome);
}

/// [`ScanMetrics`] backed by the `metrics` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsRecorder;

impl ScanMetrics for MetricsRecorder {
    fn items_queried(&self, job_tag: &str, count: u64) {
        counter!("shardscan.items_queried", "job_tag" => job_tag.to_string()).increment(count);
    }

    fn persisted(&self, num_bytes: usize) {
        #[allow(clippy::cast_precision_loss)]
        let num_bytes = num_bytes as f64;
        histogram!("shardscan.persist.bytes").record(num_bytes);
    }

    fn crash_stall(&self, outcome: CrashStallOutcome) {
        counter!("shardscan.crash_stall", "outcome" => outcome.as_str()).increment(1);
    }
}

/// [`ScanMetrics`] that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl ScanMetrics for NoopMetrics {
    fn items_queried(&self, _job_tag: &str, _count: u64) {}

    fn persisted(&self, _num_bytes: usize) {}

    fn crash_stall(&self, _outcome: CrashStallOutcome) {}
}
