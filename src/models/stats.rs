//! Scan statistics and status snapshots.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::job::{JobId, WorkPhase};

/// Opaque statistics reported by a processor.
pub type ProcessingStats = Value;

/// Statistics about scanning, kept per job on each worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanStatistics {
    /// Number of items handed out by the database so far.
    pub num_items_scanned: u64,
    /// Estimate in `[0, 1]` of how much of the work shard has been scanned.
    pub scanned_ratio_estimate: f32,
    /// How many times the processor was recreated after crash loops.
    pub num_work_processor_recreations: u32,
    /// 1 if the worker gave up on the job, else 0.
    pub num_surrendered: u32,
    /// Total size of all persisted worker payloads.
    pub worker_persist_total_bytes: u64,
    /// Number of times the worker state was persisted.
    pub worker_persist_count: u64,
}

impl ScanStatistics {
    /// Combines the statistics of several workers.
    ///
    /// Counters are summed. The ratio estimate is a proportion, so it is
    /// averaged over the parts instead.
    #[must_use]
    pub fn aggregate<'a>(parts: impl IntoIterator<Item = &'a Self>) -> Self {
        let mut total = Self::default();
        let mut count = 0u32;
        for part in parts {
            total.num_items_scanned += part.num_items_scanned;
            total.scanned_ratio_estimate += part.scanned_ratio_estimate;
            total.num_work_processor_recreations += part.num_work_processor_recreations;
            total.num_surrendered += part.num_surrendered;
            total.worker_persist_total_bytes += part.worker_persist_total_bytes;
            total.worker_persist_count += part.worker_persist_count;
            count += 1;
        }
        if count > 0 {
            #[allow(clippy::cast_precision_loss)]
            let divisor = count as f32;
            total.scanned_ratio_estimate /= divisor;
        }
        total
    }
}

/// Point-in-time status of a job on one worker.
///
/// Never persisted. Every snapshot taken from the same job gets a larger
/// `status_observation_index`, which lets the coordinator order status
/// messages that may arrive out of order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Job the status is about.
    pub job_id: JobId,
    /// Phase at the time of the snapshot.
    pub phase: WorkPhase,
    /// Scan statistics at the time of the snapshot.
    pub scan_statistics: ScanStatistics,
    /// Processor statistics at the time of the snapshot.
    pub processing_stats: ProcessingStats,
    /// Sequence number of the snapshot.
    pub status_observation_index: u64,
}
