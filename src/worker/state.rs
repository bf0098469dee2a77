//! In-memory state of the active job.

use std::fmt;

use crate::models::{
    JobId, JobSpec, JobWorkRecord, ScanStatistics, ShardIteratorSet, StatusSnapshot, WorkPhase,
    WorkShard,
};
use crate::processor::{ProcessorError, ProcessorRegistry, ScanProcessor};
use crate::scan::entity_id_range_from_work_shard;

/// State of the job a worker is working on.
///
/// This is the runtime counterpart of [`JobWorkRecord`]: the processor is a
/// live object here and only its persisted state goes into the record.
pub struct JobWorkState {
    /// Job id.
    pub id: JobId,
    /// Job spec.
    pub spec: JobSpec,
    /// This worker's share of the job.
    pub work_shard: WorkShard,
    /// Current phase.
    pub phase: WorkPhase,
    /// Per-database-shard cursors and the next shard to query.
    pub iterators: ShardIteratorSet,
    /// Position in the explicit entity list, in list mode.
    pub explicit_list_index: usize,
    /// Scan statistics.
    pub scan_statistics: ScanStatistics,
    /// The processor handling scanned items.
    pub processor: Box<dyn ScanProcessor>,
    /// Number of loads in the Running phase since the last successful scan.
    pub crash_stall_counter: u32,
    /// Index given to the next status snapshot.
    pub running_status_observation_index: u64,
}

impl JobWorkState {
    /// Creates the state of a newly initialized job, in the Paused phase.
    ///
    /// A range-mode work shard that owns no values starts with every cursor
    /// finished.
    #[must_use]
    pub fn new(
        id: JobId,
        spec: JobSpec,
        work_shard: WorkShard,
        num_db_shards: usize,
        processor: Box<dyn ScanProcessor>,
    ) -> Self {
        let mut iterators = ShardIteratorSet::new(work_shard, num_db_shards);
        let mut scan_statistics = ScanStatistics::default();
        let owns_nothing = !spec.is_list_mode()
            && entity_id_range_from_work_shard(&spec.entity_kind, spec.entity_id_value_upper_bound, work_shard)
                .is_none();
        if owns_nothing {
            iterators.finish_all();
            scan_statistics.scanned_ratio_estimate = 1.0;
        }
        Self {
            id,
            spec,
            work_shard,
            phase: WorkPhase::Paused,
            iterators,
            explicit_list_index: 0,
            scan_statistics,
            processor,
            crash_stall_counter: 0,
            running_status_observation_index: 0,
        }
    }

    /// Takes a status snapshot. Each call gets the next observation index.
    pub fn observe_status(&mut self) -> StatusSnapshot {
        let status_observation_index = self.running_status_observation_index;
        self.running_status_observation_index += 1;
        StatusSnapshot {
            job_id: self.id,
            phase: self.phase,
            scan_statistics: self.scan_statistics.clone(),
            processing_stats: self.processor.stats(),
            status_observation_index,
        }
    }

    /// Returns true if some part of the work shard is still unscanned.
    #[must_use]
    pub fn has_more_items_to_scan(&self) -> bool {
        match &self.spec.explicit_entity_list {
            Some(list) => self.explicit_list_index < list.len(),
            None => self.iterators.has_more(),
        }
    }

    /// Replaces the processor with a fresh one that inherits its statistics.
    ///
    /// # Errors
    ///
    /// Returns `ProcessorError` if the new processor cannot be created.
    pub fn recreate_processor(&mut self, registry: &ProcessorRegistry) -> Result<(), ProcessorError> {
        let prior_stats = self.processor.stats();
        self.processor = registry.create(&self.spec.processor, Some(&prior_stats))?;
        self.scan_statistics.num_work_processor_recreations += 1;
        Ok(())
    }

    /// Builds the persisted form.
    ///
    /// # Errors
    ///
    /// Returns `ProcessorError` if the processor state cannot be serialized.
    pub fn to_record(&self) -> Result<JobWorkRecord, ProcessorError> {
        Ok(JobWorkRecord {
            id: self.id,
            spec: self.spec.clone(),
            work_shard: self.work_shard,
            phase: self.phase,
            iterators: self.iterators.clone(),
            explicit_list_index: self.explicit_list_index,
            scan_statistics: self.scan_statistics.clone(),
            processor_state: self.processor.persisted_state()?,
            crash_stall_counter: self.crash_stall_counter,
            running_status_observation_index: self.running_status_observation_index,
        })
    }

    /// Rebuilds the state from its persisted form.
    ///
    /// A record without processor state gets a fresh processor seeded with
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns `ProcessorError` if the processor cannot be restored.
    pub fn from_record(record: JobWorkRecord, registry: &ProcessorRegistry) -> Result<Self, ProcessorError> {
        let processor = if record.processor_state.is_null() {
            registry.create(&record.spec.processor, None)?
        } else {
            registry.restore(&record.spec.processor, record.processor_state)?
        };
        Ok(Self {
            id: record.id,
            spec: record.spec,
            work_shard: record.work_shard,
            phase: record.phase,
            iterators: record.iterators,
            explicit_list_index: record.explicit_list_index,
            scan_statistics: record.scan_statistics,
            processor,
            crash_stall_counter: record.crash_stall_counter,
            running_status_observation_index: record.running_status_observation_index,
        })
    }
}

impl fmt::Debug for JobWorkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobWorkState")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("work_shard", &self.work_shard)
            .field("iterators", &self.iterators)
            .field("explicit_list_index", &self.explicit_list_index)
            .field("scan_statistics", &self.scan_statistics)
            .field("crash_stall_counter", &self.crash_stall_counter)
            .finish_non_exhaustive()
    }
}
