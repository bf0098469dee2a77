//! Serialized form of a worker's state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::cursor::ShardIteratorSet;
use super::job::{JobId, JobSpec, WorkPhase, WorkShard};
use super::stats::ScanStatistics;

/// Persisted state of the job a worker is working on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobWorkRecord {
    /// Job id.
    pub id: JobId,
    /// Job spec, as received from the coordinator.
    pub spec: JobSpec,
    /// This worker's share of the job.
    pub work_shard: WorkShard,
    /// Current phase.
    pub phase: WorkPhase,
    /// Per-database-shard cursors.
    pub iterators: ShardIteratorSet,
    /// Position in the explicit entity list, in list mode.
    #[serde(default)]
    pub explicit_list_index: usize,
    /// Scan statistics.
    #[serde(default)]
    pub scan_statistics: ScanStatistics,
    /// Processor state from `ScanProcessor::persisted_state`.
    #[serde(default)]
    pub processor_state: Value,
    /// Number of loads in the Running phase since the last successful scan.
    #[serde(default)]
    pub crash_stall_counter: u32,
    /// Next status observation index.
    #[serde(default)]
    pub running_status_observation_index: u64,
}

/// Persisted state of a worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerStateRecord {
    /// The job the worker is working on, if any.
    #[serde(default)]
    pub active_job: Option<JobWorkRecord>,
}
