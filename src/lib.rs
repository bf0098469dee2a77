//! shardscan - worker-side engine for sharded, resumable database scan jobs
//!
//! A scan job ("touch every player record") is split into work shards. One
//! [`ScanWorker`] owns each work shard and walks its slice of the entity id
//! space across every database shard, feeding pages of items to a pluggable
//! [`ScanProcessor`]. The worker persists its position so that a restarted
//! worker resumes where it left off, recovers from repeated crashes, adapts to
//! database resharding and reports progress to a coordinator.

pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod processor;
pub mod scan;
pub mod storage;
pub mod worker;

pub use config::{ShardscanConfig, WorkerConfig};
pub use error::WorkerError;
pub use models::{
    EntityId, EntityIdRange, EntityKind, JobId, JobSpec, ProcessorSpec, ScanStatistics,
    ShardCursor, ShardIteratorSet, StatusSnapshot, StopFlavor, WorkPhase, WorkShard,
};
pub use processor::{ProcessorError, ProcessorFactory, ProcessorRegistry, ScanProcessor};
pub use storage::{ScannedItem, ShardedDatabase, StorageError, WorkerStore};
pub use worker::{spawn_worker, ScanWorker, StatusReport, WorkerDeps, WorkerHandle};
